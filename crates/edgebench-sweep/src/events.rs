// SPDX-License-Identifier: AGPL-3.0-only

//! Worker → UI notifications
//!
//! The worker never touches the UI. It sends [`UiEvent`]s over an unbounded
//! channel and keeps going; the consumer applies them on its own thread
//! through a [`UiBridge`].

use crate::controller::SweepSummary;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender};

/// Lines kept by [`LogView`]
pub const MAX_LOGS: usize = 10;

/// Notification from the sweep worker
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Progress line to display
    LogLine(String),
    /// Sweep ended (finished, cancelled or aborted); controls may be re-enabled
    SweepComplete(SweepSummary),
}

/// Sending half used by the worker
///
/// Every line is also emitted through `tracing`. A dropped receiver is not
/// an error: the sweep keeps running headless.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<Sender<UiEvent>>,
}

impl EventSender {
    /// Sender forwarding to `tx`
    pub fn new(tx: Sender<UiEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sender that only logs
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Emit a progress line
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{line}");
        self.send(UiEvent::LogLine(line));
    }

    /// Emit the completion notice
    pub fn complete(&self, summary: SweepSummary) {
        self.send(UiEvent::SweepComplete(summary));
    }

    fn send(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Consumer-side callbacks
pub trait UiBridge {
    /// A progress line arrived
    fn on_log_line(&mut self, line: &str);

    /// The sweep ended
    fn on_sweep_complete(&mut self, summary: &SweepSummary);
}

/// Bounded log display, newest line first
#[derive(Debug, Clone)]
pub struct LogView {
    lines: VecDeque<String>,
    controls_enabled: bool,
    last_summary: Option<SweepSummary>,
}

impl Default for LogView {
    fn default() -> Self {
        Self {
            lines: VecDeque::with_capacity(MAX_LOGS),
            controls_enabled: true,
            last_summary: None,
        }
    }
}

impl LogView {
    /// Empty view with controls enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable controls and note the start
    pub fn begin_sweep(&mut self) {
        self.controls_enabled = false;
        self.last_summary = None;
        self.push("Tests start");
    }

    /// Whether start controls are usable
    pub const fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    /// Visible lines, newest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Visible lines joined for display
    pub fn text(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }

    /// Summary of the last finished sweep
    pub const fn last_summary(&self) -> Option<&SweepSummary> {
        self.last_summary.as_ref()
    }

    fn push(&mut self, line: &str) {
        self.lines.push_front(line.to_string());
        self.lines.truncate(MAX_LOGS);
    }
}

impl UiBridge for LogView {
    fn on_log_line(&mut self, line: &str) {
        self.push(line);
    }

    fn on_sweep_complete(&mut self, summary: &SweepSummary) {
        self.controls_enabled = true;
        self.last_summary = Some(summary.clone());
    }
}

/// Apply events until the sweep completes or the worker hangs up
///
/// Returns the summary when a completion event arrived.
pub fn pump(rx: &Receiver<UiEvent>, bridge: &mut dyn UiBridge) -> Option<SweepSummary> {
    while let Ok(event) = rx.recv() {
        if let Some(summary) = apply(event, bridge) {
            return Some(summary);
        }
    }
    None
}

/// Apply the events already queued without blocking
///
/// Returns the summary if a completion event was among them.
pub fn drain(rx: &Receiver<UiEvent>, bridge: &mut dyn UiBridge) -> Option<SweepSummary> {
    while let Ok(event) = rx.try_recv() {
        if let Some(summary) = apply(event, bridge) {
            return Some(summary);
        }
    }
    None
}

fn apply(event: UiEvent, bridge: &mut dyn UiBridge) -> Option<SweepSummary> {
    match event {
        UiEvent::LogLine(line) => {
            bridge.on_log_line(&line);
            None
        }
        UiEvent::SweepComplete(summary) => {
            bridge.on_sweep_complete(&summary);
            Some(summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_log_view_keeps_newest_first() {
        let mut view = LogView::new();
        for i in 0..15 {
            view.on_log_line(&format!("line {i}"));
        }
        let lines: Vec<&str> = view.lines().collect();
        assert_eq!(lines.len(), MAX_LOGS);
        assert_eq!(lines[0], "line 14");
        assert_eq!(lines[9], "line 5");
    }

    #[test]
    fn test_controls_toggle_around_sweep() {
        let mut view = LogView::new();
        view.begin_sweep();
        assert!(!view.controls_enabled());
        assert_eq!(view.lines().next(), Some("Tests start"));

        view.on_sweep_complete(&SweepSummary::default());
        assert!(view.controls_enabled());
        assert!(view.last_summary().is_some());
    }

    #[test]
    fn test_pump_stops_at_completion() {
        let (tx, rx) = mpsc::channel();
        let sender = EventSender::new(tx);
        sender.log("loading");
        sender.log("DONE");
        sender.complete(SweepSummary::default());
        sender.log("after");

        let mut view = LogView::new();
        assert!(pump(&rx, &mut view).is_some());
        assert_eq!(view.text(), "DONE\nloading");
    }

    #[test]
    fn test_detached_sender_does_not_fail() {
        let sender = EventSender::detached();
        sender.log("nobody listening");
        sender.complete(SweepSummary::default());
    }

    #[test]
    fn test_drain_is_non_blocking() {
        let (tx, rx) = mpsc::channel();
        let sender = EventSender::new(tx);
        sender.log("one");

        let mut view = LogView::new();
        assert!(drain(&rx, &mut view).is_none());
        assert_eq!(view.lines().count(), 1);

        sender.complete(SweepSummary::default());
        assert!(drain(&rx, &mut view).is_some());
        assert!(view.controls_enabled());
    }
}
