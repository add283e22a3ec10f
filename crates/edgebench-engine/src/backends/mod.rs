// SPDX-License-Identifier: AGPL-3.0-only

//! Engine implementations
//!
//! Only the pure-Rust reference engine ships here. Native engines plug in by
//! implementing [`InterpreterFactory`](crate::InterpreterFactory).

pub mod reference;

pub use reference::{ReferenceEngine, ReferenceInterpreter, ReferenceModelSpec, REFERENCE_MAGIC};
