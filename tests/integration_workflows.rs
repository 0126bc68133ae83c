//! Integration tests for complete background removal workflows
//!
//! These tests drive the supervisor, execution unit, registry and stores
//! together, using the mock provider in place of a real model runtime.

use bgremove_worker::{
    backends::{MockMask, MockProvider},
    config::DEFAULT_SETTINGS_KEY,
    AppContext, JsonFileKeyValueStore, JsonLinesRecordStore, KeyValueStore, MemoryKeyValueStore,
    MemoryRecordStore, ModelId, ProcessingRegistry, RecordSink, RequestId, WorkerConfig,
    WorkerMessage, WorkerSupervisor,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create an encoded RGB test image with a gradient
fn create_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let intensity = ((x + y) % 100) as u8;
        image::Rgb([intensity, 128, 255 - intensity])
    });
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut std::io::Cursor::new(&mut buffer), format)
        .unwrap();
    buffer
}

/// Collect routed messages for `id` up to and including its terminal message
async fn messages_until_terminal(
    rx: &mut broadcast::Receiver<WorkerMessage>,
    id: RequestId,
) -> Vec<WorkerMessage> {
    let mut collected = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for the execution unit")
            .expect("message tap closed");
        if message.id() != Some(id) {
            continue;
        }
        let terminal = message.is_terminal();
        collected.push(message);
        if terminal {
            return collected;
        }
    }
}

fn statuses(messages: &[WorkerMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|message| match message {
            WorkerMessage::Progress { status, .. } => Some(status.as_str()),
            _ => None,
        })
        .collect()
}

fn memory_context(provider: MockProvider) -> (AppContext, Arc<MemoryRecordStore>) {
    let sink = Arc::new(MemoryRecordStore::new());
    let ctx = AppContext::new(
        WorkerConfig::default(),
        Arc::new(provider),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    )
    .unwrap();
    (ctx, sink)
}

#[tokio::test]
async fn test_successful_submission_end_to_end() {
    init_logging();
    let (ctx, sink) = memory_context(MockProvider::new().with_mask(MockMask::Circle));
    let mut tap = ctx.supervisor().subscribe_messages();

    let input = create_test_image(40, 30, ImageFormat::Png);
    let entry = ctx.submit(input.clone(), "portrait.png").await.unwrap();
    assert_eq!(entry.model, ModelId::Rmbg20);
    assert!(ctx.registry().contains(entry.id));

    let messages = messages_until_terminal(&mut tap, entry.id).await;
    assert_eq!(
        statuses(&messages),
        vec![
            "Loading model...",
            "Model ready",
            "Converting image...",
            "Pre-processing image...",
            "Generating mask...",
            "Processing output...",
            "Applying mask to image...",
        ]
    );
    let output = match messages.last() {
        Some(WorkerMessage::Done { output, .. }) => output.clone(),
        other => panic!("expected Done, got {:?}", other),
    };
    assert!(!output.is_empty());

    // Routing finishes before the tap sees the message
    assert!(!ctx.registry().contains(entry.id));
    let rows = sink.rows("images");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "portrait.png");
    assert_eq!(rows[0].model, ModelId::Rmbg20);
    assert_eq!(rows[0].decode_input().unwrap(), input);
    assert_eq!(rows[0].decode_output().unwrap(), output);

    let result = image::load_from_memory_with_format(&output, ImageFormat::Png)
        .unwrap()
        .to_rgba8();
    assert_eq!(result.dimensions(), (40, 30));
    assert!(result.get_pixel(20, 15).0[3] > 200);
    assert_eq!(result.get_pixel(0, 0).0[3], 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_jpeg_input_produces_png_output() {
    let (ctx, sink) = memory_context(MockProvider::new());
    let mut tap = ctx.supervisor().subscribe_messages();

    let entry = ctx
        .submit(create_test_image(16, 16, ImageFormat::Jpeg), "photo.jpg")
        .await
        .unwrap();
    let messages = messages_until_terminal(&mut tap, entry.id).await;
    assert!(matches!(messages.last(), Some(WorkerMessage::Done { .. })));

    let output = sink.rows("images")[0].decode_output().unwrap();
    assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);
    ctx.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_start_one_unit() {
    let supervisor = Arc::new(
        WorkerSupervisor::new(
            WorkerConfig::default(),
            Arc::new(MockProvider::new()),
            ProcessingRegistry::new(),
            Arc::new(MemoryRecordStore::new()),
        )
        .unwrap(),
    );

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.ensure_ready().await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert!(supervisor.is_ready());
    assert_eq!(supervisor.units_started(), 1);
}

#[tokio::test]
async fn test_concurrent_submissions_each_finish_once() {
    let (ctx, sink) = memory_context(MockProvider::new());
    let mut tap = ctx.supervisor().subscribe_messages();

    let submissions = (0..5).map(|i| {
        ctx.submit(
            create_test_image(8 + i, 8, ImageFormat::Png),
            format!("image-{}.png", i),
        )
    });
    let entries: Vec<_> = futures::future::join_all(submissions)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(ctx.supervisor().units_started(), 1);
    assert_eq!(ctx.registry().len(), 5);

    let mut terminal_counts = std::collections::HashMap::new();
    while terminal_counts.len() < entries.len() {
        let message = tokio::time::timeout(Duration::from_secs(10), tap.recv())
            .await
            .unwrap()
            .unwrap();
        if message.is_terminal() {
            *terminal_counts.entry(message.id().unwrap()).or_insert(0) += 1;
        }
    }

    for entry in &entries {
        assert_eq!(terminal_counts.get(&entry.id), Some(&1));
    }
    assert!(ctx.registry().is_empty());
    assert_eq!(sink.rows("images").len(), 5);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_registry_watchers_see_lifecycle() {
    let (ctx, _sink) = memory_context(MockProvider::new());
    let mut watcher = ctx.registry().subscribe();
    let mut tap = ctx.supervisor().subscribe_messages();

    let entry = ctx
        .submit(create_test_image(4, 4, ImageFormat::Png), "w.png")
        .await
        .unwrap();
    watcher.changed().await.unwrap();
    assert!(watcher.borrow_and_update().iter().any(|e| e.id == entry.id));

    messages_until_terminal(&mut tap, entry.id).await;
    assert!(watcher.has_changed().unwrap());
    assert!(watcher.borrow_and_update().is_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_model_selection_survives_restart() {
    let dir = TempDir::new().unwrap();
    let settings_path = dir.path().join("settings.json");

    let ctx = AppContext::new(
        WorkerConfig::default(),
        Arc::new(MockProvider::new()),
        Arc::new(JsonFileKeyValueStore::new(&settings_path)),
        Arc::new(MemoryRecordStore::new()),
    )
    .unwrap();
    assert_eq!(ctx.selected_model(), ModelId::Rmbg20);
    ctx.select_model(ModelId::Modnet).unwrap();
    ctx.shutdown().await;

    let store = JsonFileKeyValueStore::new(&settings_path);
    assert_eq!(
        store.get(DEFAULT_SETTINGS_KEY).unwrap().as_deref(),
        Some("Xenova/modnet")
    );

    let provider = MockProvider::new();
    let sink = Arc::new(MemoryRecordStore::new());
    let restarted = AppContext::new(
        WorkerConfig::default(),
        Arc::new(provider.clone()),
        Arc::new(store),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    )
    .unwrap();
    assert_eq!(restarted.selected_model(), ModelId::Modnet);

    let mut tap = restarted.supervisor().subscribe_messages();
    let entry = restarted
        .submit(create_test_image(4, 4, ImageFormat::Png), "after-restart.png")
        .await
        .unwrap();
    messages_until_terminal(&mut tap, entry.id).await;

    assert_eq!(sink.rows("images")[0].model, ModelId::Modnet);
    assert!(provider
        .call_history()
        .contains(&"load_model:Xenova/modnet".to_string()));
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_results_appended_to_json_lines_table() {
    let dir = TempDir::new().unwrap();
    let records = Arc::new(JsonLinesRecordStore::new(dir.path()));
    let config = WorkerConfig::builder()
        .records_table("gallery")
        .mask_filter(bgremove_worker::MaskFilter::Nearest)
        .build()
        .unwrap();

    let ctx = AppContext::new(
        config,
        Arc::new(MockProvider::new()),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::clone(&records) as Arc<dyn RecordSink>,
    )
    .unwrap();
    let mut tap = ctx.supervisor().subscribe_messages();

    let first = ctx
        .submit(create_test_image(5, 5, ImageFormat::Png), "one.png")
        .await
        .unwrap();
    messages_until_terminal(&mut tap, first.id).await;
    let second = ctx
        .submit(create_test_image(6, 6, ImageFormat::Png), "two.png")
        .await
        .unwrap();
    messages_until_terminal(&mut tap, second.id).await;
    ctx.shutdown().await;

    let rows = records.read_table("gallery").await.unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["one.png", "two.png"]);
    assert!(dir.path().join("gallery.jsonl").exists());
    assert!(chrono::DateTime::parse_from_rfc3339(&rows[0].created_at).is_ok());
}

#[tokio::test]
async fn test_loaded_model_reused_between_requests() {
    let provider = MockProvider::new();
    let (ctx, _sink) = memory_context(provider.clone());
    let mut tap = ctx.supervisor().subscribe_messages();

    for name in ["a.png", "b.png"] {
        let entry = ctx
            .submit(create_test_image(4, 4, ImageFormat::Png), name)
            .await
            .unwrap();
        let messages = messages_until_terminal(&mut tap, entry.id).await;
        // Loading is still reported for every request
        assert_eq!(statuses(&messages)[0], "Loading model...");
    }
    assert_eq!(provider.load_count(), 1);
    ctx.shutdown().await;
}
