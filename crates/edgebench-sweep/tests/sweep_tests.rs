// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end sweeps against the reference engine on a scratch asset tree

use edgebench_engine::{
    Device, EngineOptions, Interpreter, InterpreterFactory, MappedModel, ReferenceEngine,
    ReferenceModelSpec, Result as EngineResult,
};
use edgebench_models::ImageSet;
use edgebench_sweep::{
    events, CancelToken, EventSender, FinalResult, LogView, MemoryStore, OutputConfig,
    ResultStore, RunnerState, SampleTable, StoreError, SweepConfig, SweepController, SweepError,
    SweepRunner, SweepSummary, UiEvent,
};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tempfile::TempDir;

const LABELS: &[&str] = &["tabby", "goldfish", "tench", "crane", "daisy"];

struct Assets {
    dir: TempDir,
}

impl Assets {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("models/mobilenet_v1")).unwrap();
        fs::create_dir_all(dir.path().join("dataset")).unwrap();
        fs::write(dir.path().join("labels.txt"), LABELS.join("\n")).unwrap();
        Self { dir }
    }

    fn model(&self, name: &str, quantized: bool) -> &Self {
        let spec = ReferenceModelSpec::new(16, 16, LABELS.len(), quantized);
        fs::write(self.dir.path().join("models/mobilenet_v1").join(name), spec.pack()).unwrap();
        self
    }

    fn image(&self, relative: &str, shade: u8) -> &Self {
        let path = self.dir.path().join("dataset").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_fn(40, 30, |x, y| Rgb([shade, (x * 6) as u8, (y * 8) as u8]))
            .save(&path)
            .unwrap();
        self
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self, devices: Vec<Device>, batch_sizes: Vec<usize>) -> SweepConfig {
        SweepConfig {
            models_dir: self.root().join("models"),
            dataset_dir: self.root().join("dataset"),
            labels_path: self.root().join("labels.txt"),
            devices,
            families: vec!["mobilenet_v1".into()],
            batch_sizes,
            rounds: 1,
            samples: SampleTable::default(),
            seed: 11,
            inference_timeout_ms: Some(10_000),
            output: OutputConfig::default(),
            ..SweepConfig::default()
        }
    }
}

/// Reference engine that counts builds and forward passes
#[derive(Debug, Default)]
struct CountingEngine {
    inner: ReferenceEngine,
    builds: Arc<AtomicUsize>,
    invocations: Arc<AtomicUsize>,
    delay: Duration,
    cancel_on_invoke: Option<CancelToken>,
}

struct CountingInterpreter {
    inner: Box<dyn Interpreter>,
    invocations: Arc<AtomicUsize>,
    delay: Duration,
    cancel_on_invoke: Option<CancelToken>,
}

impl Interpreter for CountingInterpreter {
    fn input_spec(&self) -> &edgebench_engine::TensorSpec {
        self.inner.input_spec()
    }

    fn output_spec(&self) -> &edgebench_engine::TensorSpec {
        self.inner.output_spec()
    }

    fn resize_input(&mut self, batch: usize) -> EngineResult<()> {
        self.inner.resize_input(batch)
    }

    fn invoke(&mut self, input: &[u8]) -> EngineResult<Vec<u8>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_invoke {
            token.cancel();
        }
        std::thread::sleep(self.delay);
        self.inner.invoke(input)
    }
}

impl InterpreterFactory for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn build(
        &self,
        model: Arc<MappedModel>,
        options: &EngineOptions,
    ) -> EngineResult<Box<dyn Interpreter>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingInterpreter {
            inner: self.inner.build(model, options)?,
            invocations: Arc::clone(&self.invocations),
            delay: self.delay,
            cancel_on_invoke: self.cancel_on_invoke.clone(),
        }))
    }
}

fn run(
    config: SweepConfig,
    engine: Arc<dyn InterpreterFactory>,
) -> (SweepSummary, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let controller = SweepController::new(Arc::new(config), engine)
        .with_store(Arc::clone(&store) as Arc<dyn ResultStore>);
    (controller.run(), store)
}

#[test]
fn test_single_model_two_images_end_to_end() {
    let assets = Assets::new();
    assets
        .model("mobilenet_v1_1.0_224.tflite", false)
        .image("tabby/1.png", 10)
        .image("goldfish/2.png", 200);

    let config = assets.config(vec![Device::Cpu], vec![1]);
    let expected_order: Vec<String> = ImageSet::scan(&config.dataset_dir)
        .unwrap()
        .sample(config.seed, 0, None)
        .iter()
        .map(|s| s.file_name())
        .collect();

    let (summary, store) = run(config, Arc::new(ReferenceEngine::new()));

    assert_eq!(summary.models_run, 1);
    assert_eq!(summary.batches_executed, 2);
    assert_eq!(summary.tiers_persisted, 1);

    let tiers = store.results();
    assert_eq!(tiers.len(), 1);
    assert!(tiers[0].complete);
    let model = &tiers[0].models[0];
    assert_eq!(model.results.len(), 2);

    let order: Vec<String> = model.results.iter().map(|r| r.images[0].clone()).collect();
    assert_eq!(order, expected_order);
    for result in &model.results {
        assert_eq!(result.predictions.len(), LABELS.len());
        assert!(result.ground_truth.is_some());
        let labels: std::collections::HashSet<_> =
            result.predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels.len(), result.predictions.len());
    }
}

#[test]
fn test_gpu_never_executes_quantized_models() {
    let assets = Assets::new();
    assets
        .model("mobilenet_v1_1.0_224_quant.tflite", true)
        .image("a.png", 1);

    let engine = Arc::new(CountingEngine::default());
    let (summary, store) = run(
        assets.config(vec![Device::Gpu], vec![1]),
        Arc::clone(&engine) as Arc<dyn InterpreterFactory>,
    );

    assert_eq!(engine.builds.load(Ordering::SeqCst), 0);
    assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    assert_eq!(summary.models_skipped, 1);
    assert!(store.results()[0].models.is_empty());
}

#[test]
fn test_edge_accelerator_model_skips_batch_eight() {
    let assets = Assets::new();
    assets.model("mobilenet_v2_1.0_224_quant_edgetpu.tflite", true);
    for i in 0..8 {
        assets.image(&format!("{i}.png"), i * 20);
    }

    let engine = Arc::new(CountingEngine::default());
    let (summary, _) = run(
        assets.config(vec![Device::EdgeAccelerator], vec![8]),
        Arc::clone(&engine) as Arc<dyn InterpreterFactory>,
    );

    assert_eq!(engine.builds.load(Ordering::SeqCst), 0);
    assert_eq!(summary.models_skipped, 1);
    assert_eq!(summary.batches_executed, 0);
}

#[test]
fn test_partial_batch_is_dropped() {
    let assets = Assets::new();
    assets
        .model("mobilenet_v1_1.0_224.tflite", false)
        .image("a.png", 1)
        .image("b.png", 2)
        .image("c.png", 3);

    let engine = Arc::new(CountingEngine::default());
    let (summary, store) = run(
        assets.config(vec![Device::Cpu], vec![4]),
        Arc::clone(&engine) as Arc<dyn InterpreterFactory>,
    );

    assert_eq!(summary.models_run, 1);
    assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    assert!(store.results()[0].models[0].results.is_empty());
}

#[test]
fn test_batched_run_records_one_result_per_full_batch() {
    let assets = Assets::new();
    assets
        .model("mobilenet_v1_1.0_224.tflite", false)
        .model("mobilenet_v1_0.25_128.tflite", false);
    for i in 0..5 {
        assets.image(&format!("{i}.png"), i * 40);
    }

    let (summary, store) = run(
        assets.config(vec![Device::CpuMulti], vec![2]),
        Arc::new(ReferenceEngine::new()),
    );

    // The 128 variant is not the canonical resolution
    assert_eq!(summary.models_skipped, 1);
    let model = &store.results()[0].models[0];
    assert_eq!(model.model, "mobilenet_v1_1.0_224.tflite");
    assert_eq!(model.results.len(), 2);
    assert!(model.results.iter().all(|r| r.predictions.is_empty()));
    assert!(model.results.iter().all(|r| r.images.len() == 2));
}

#[test]
fn test_inference_failure_records_row_and_moves_on() {
    let assets = Assets::new();
    // Quantized weights under a float name: the prepared batch has the wrong size
    assets
        .model("a_1.0_224.tflite", true)
        .model("b_1.0_224.tflite", false)
        .image("x.png", 5)
        .image("y.png", 6);

    let csv_path = assets.root().join("out/results.csv");
    let mut config = assets.config(vec![Device::Cpu], vec![1]);
    config.output.csv_path = Some(csv_path.clone());
    config.top_k = 3;

    let (summary, store) = run(config, Arc::new(ReferenceEngine::new()));

    assert_eq!(summary.inference_failures, 1);
    assert_eq!(summary.batches_executed, 2);

    let models = &store.results()[0].models;
    assert_eq!(models[0].results.len(), 1);
    assert!(models[0].results[0].is_failure());
    assert_eq!(models[1].results.len(), 2);

    let csv = fs::read_to_string(csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "ModelName,Label,InferenceTime,Recognition,Accuracy");
    assert!(lines[1].starts_with("a_1.0_224.tflite,,FAILED,"));
    assert_eq!(lines.len(), 1 + 1 + 2 * 3);
}

#[test]
fn test_timeout_becomes_failure_row() {
    let assets = Assets::new();
    assets
        .model("a_1.0_224.tflite", false)
        .model("b_1.0_224.tflite", false)
        .image("x.png", 5);

    let engine = Arc::new(CountingEngine {
        delay: Duration::from_millis(300),
        ..CountingEngine::default()
    });
    let mut config = assets.config(vec![Device::Cpu], vec![1]);
    config.inference_timeout_ms = Some(20);

    let (summary, store) = run(config, Arc::clone(&engine) as Arc<dyn InterpreterFactory>);

    assert_eq!(summary.inference_failures, 2);
    let models = &store.results()[0].models;
    assert_eq!(models.len(), 2);
    assert!(models.iter().all(|m| m.results.len() == 1 && m.results[0].is_failure()));
}

#[test]
fn test_undecodable_image_fails_only_its_batch() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false).image("good.png", 9);
    fs::write(
        assets.root().join("dataset/bad.png"),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0],
    )
    .unwrap();

    let (summary, store) = run(
        assets.config(vec![Device::Cpu], vec![1]),
        Arc::new(ReferenceEngine::new()),
    );

    assert_eq!(summary.prepare_failures, 1);
    assert_eq!(summary.batches_executed, 1);
    let results = &store.results()[0].models[0].results;
    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|r| r.is_failure()).count(), 1);
}

#[test]
fn test_unloadable_model_is_skipped() {
    let assets = Assets::new();
    assets.model("good_1.0_224.tflite", false).image("x.png", 1);
    fs::write(
        assets.root().join("models/mobilenet_v1/broken_1.0_224.tflite"),
        b"not a model",
    )
    .unwrap();

    let (summary, store) = run(
        assets.config(vec![Device::Cpu], vec![1]),
        Arc::new(ReferenceEngine::new()),
    );

    assert_eq!(summary.load_failures, 1);
    assert_eq!(summary.models_run, 1);
    assert_eq!(store.results()[0].models[0].model, "good_1.0_224.tflite");
}

#[test]
fn test_missing_family_aborts_only_that_combination() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false).image("x.png", 1);

    let mut config = assets.config(vec![Device::Cpu, Device::Nnapi], vec![1]);
    config.families = vec!["inception".into(), "mobilenet_v1".into()];

    let (summary, store) = run(config, Arc::new(ReferenceEngine::new()));

    assert_eq!(summary.aborted_combinations, 2);
    assert_eq!(summary.tiers_persisted, 2);
    let devices: Vec<Device> = store.results().iter().map(|t| t.device).collect();
    assert_eq!(devices, vec![Device::Cpu, Device::Nnapi]);
}

#[test]
fn test_cancel_stops_at_batch_boundary() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false);
    for i in 0..6 {
        assets.image(&format!("{i}.png"), i * 30);
    }

    let cancel = CancelToken::new();
    let engine = Arc::new(CountingEngine {
        cancel_on_invoke: Some(cancel.clone()),
        ..CountingEngine::default()
    });
    let store = Arc::new(MemoryStore::new());
    let controller = SweepController::new(
        Arc::new(assets.config(vec![Device::Cpu, Device::Nnapi], vec![1])),
        Arc::clone(&engine) as Arc<dyn InterpreterFactory>,
    )
    .with_store(Arc::clone(&store) as Arc<dyn ResultStore>)
    .with_cancel(cancel);

    let summary = edgebench_sweep::start(controller).unwrap().wait().unwrap();

    assert!(summary.cancelled);
    assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);
    let tiers = store.results();
    assert_eq!(tiers.len(), 1);
    assert!(!tiers[0].complete);
    assert_eq!(tiers[0].models[0].results.len(), 1);
}

#[test]
fn test_runner_rejects_second_start_and_returns_to_idle() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false).image("x.png", 1);
    let config = Arc::new(assets.config(vec![Device::Cpu], vec![1]));
    let engine = Arc::new(CountingEngine {
        delay: Duration::from_millis(200),
        ..CountingEngine::default()
    });

    let runner = SweepRunner::new();
    let (tx, rx) = mpsc::channel();
    let first = SweepController::new(
        Arc::clone(&config),
        Arc::clone(&engine) as Arc<dyn InterpreterFactory>,
    )
    .with_events(EventSender::new(tx));
    let handle = runner.start(first).unwrap();
    assert_eq!(runner.state(), RunnerState::Running);

    let second = SweepController::new(Arc::clone(&config), Arc::new(ReferenceEngine::new()));
    assert!(matches!(runner.start(second), Err(SweepError::AlreadyRunning)));

    let mut view = LogView::new();
    view.begin_sweep();
    assert!(!view.controls_enabled());
    let summary = events::pump(&rx, &mut view).unwrap();
    assert!(view.controls_enabled());
    assert_eq!(view.lines().next(), Some("DONE"));

    assert_eq!(handle.wait().unwrap(), summary);
    assert_eq!(runner.state(), RunnerState::Idle);
}

#[test]
fn test_invalid_config_is_rejected_before_start() {
    let assets = Assets::new();
    let mut config = assets.config(vec![Device::Cpu], vec![1]);
    config.rounds = 0;

    let runner = SweepRunner::new();
    let controller = SweepController::new(Arc::new(config), Arc::new(ReferenceEngine::new()));
    assert!(matches!(runner.start(controller), Err(SweepError::Config(_))));
    assert_eq!(runner.state(), RunnerState::Idle);
}

#[test]
fn test_json_results_dir_from_config() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false).image("x.png", 1);
    let mut config = assets.config(vec![Device::Cpu], vec![1]);
    config.output.results_dir = Some(assets.root().join("results"));

    let (tx, rx) = mpsc::channel();
    let controller = SweepController::new(Arc::new(config), Arc::new(ReferenceEngine::new()))
        .with_events(EventSender::new(tx));
    let summary = controller.run();
    assert_eq!(summary.tiers_persisted, 1);

    let files: Vec<_> = fs::read_dir(assets.root().join("results")).unwrap().collect();
    assert_eq!(files.len(), 1);

    let completions = rx
        .try_iter()
        .filter(|e| matches!(e, UiEvent::SweepComplete(_)))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_overflowing_model_header_is_a_load_failure() {
    let assets = Assets::new();
    assets.model("good_1.0_224.tflite", false).image("x.png", 1);

    let mut blob = b"EBM1".to_vec();
    for word in [4u32, 4, u32::MAX, u32::MAX] {
        blob.extend_from_slice(&word.to_le_bytes());
    }
    blob.extend_from_slice(&[0; 4]);
    fs::write(assets.root().join("models/mobilenet_v1/huge_1.0_224.tflite"), blob).unwrap();

    let (tx, rx) = mpsc::channel();
    let controller = SweepController::new(
        Arc::new(assets.config(vec![Device::Cpu], vec![1])),
        Arc::new(ReferenceEngine::new()),
    )
    .with_events(EventSender::new(tx));
    let handle = SweepRunner::new().start(controller).unwrap();

    let mut view = LogView::new();
    view.begin_sweep();
    let completed = events::pump(&rx, &mut view);
    assert!(completed.is_some());
    assert!(view.controls_enabled());

    let summary = handle.wait().unwrap();
    assert_eq!(summary.load_failures, 1);
    assert_eq!(summary.models_run, 1);
    assert_eq!(summary.batches_executed, 1);
}

/// Store that refuses every tier
#[derive(Debug)]
struct RefusingStore;

impl ResultStore for RefusingStore {
    fn persist(&self, _result: FinalResult) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("read-only".into()))
    }

    fn describe(&self) -> String {
        "refusing store".into()
    }
}

#[test]
fn test_store_failure_is_counted_and_sweep_continues() {
    let assets = Assets::new();
    assets
        .model("m_1.0_224.tflite", false)
        .image("x.png", 1)
        .image("y.png", 2);

    let controller = SweepController::new(
        Arc::new(assets.config(vec![Device::Cpu, Device::Nnapi], vec![1])),
        Arc::new(ReferenceEngine::new()),
    )
    .with_store(Arc::new(RefusingStore));
    let summary = controller.run();

    assert_eq!(summary.batches_executed, 4);
    assert_eq!(summary.tiers_persisted, 0);
    assert_eq!(summary.output_errors, 2);
}

#[test]
fn test_uncreatable_csv_is_counted_and_sweep_continues() {
    let assets = Assets::new();
    assets.model("m_1.0_224.tflite", false).image("x.png", 1);

    let mut config = assets.config(vec![Device::Cpu], vec![1]);
    // Parent "directory" is a regular file
    config.output.csv_path = Some(assets.root().join("labels.txt/results.csv"));

    let (summary, store) = run(config, Arc::new(ReferenceEngine::new()));

    assert_eq!(summary.output_errors, 1);
    assert_eq!(summary.csv_rows, 0);
    assert_eq!(summary.batches_executed, 1);
    assert_eq!(store.len(), 1);
}
