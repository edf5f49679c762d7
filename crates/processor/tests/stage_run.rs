use binder::{Binder, BinderKind, BinderSettings, InMemoryBinder, JsonlBinder, MessageSink, WireMessage};
use processor::{
    HandlerError, HandlerOutput, PassthroughHandler, ProcessorStage, StageConfig, StageError,
};
use propagation::PropagationPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_core::{MessageBuilder, Payload};
use tracing_subscriber::{layer::Context, prelude::*, registry::LookupSpan, Layer, Registry};

fn policy(list: &str) -> Arc<PropagationPolicy> {
    Arc::new(PropagationPolicy::from_comma_list(list).unwrap())
}

#[tokio::test]
async fn failed_messages_are_skipped_and_counted() {
    let binder = Arc::new(InMemoryBinder::new());
    let collector = binder.collector();
    let input = binder.input_sender("input").unwrap();

    let reject_bad = |p: &Payload| -> Result<HandlerOutput, HandlerError> {
        match p.as_text() {
            Some("bad") => Err(HandlerError::InvalidPayload("bad".into())),
            _ => Ok(HandlerOutput::new(p.clone()).with_header("contentType", "text/plain")),
        }
    };
    let stage = ProcessorStage::new(StageConfig::new("skip", policy("")), binder.clone(), Arc::new(reject_bad));
    let metrics = stage.metrics();

    for body in ["ok-1", "bad", "ok-2"] {
        input.send(MessageBuilder::with_payload(body).content_type("text/plain").build()).await.unwrap();
    }
    drop(input);
    binder.close_input("input");

    let stats = stage.run(std::future::pending::<()>()).await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(metrics.snapshot(), (2, 1));

    let q = collector.for_destination("output");
    let first = q.poll(Duration::from_secs(1)).await.unwrap();
    let second = q.poll(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.payload.as_text(), Some("ok-1"));
    assert_eq!(second.payload.as_text(), Some("ok-2"));
    assert!(q.try_poll().is_none());
}

#[tokio::test]
async fn shutdown_stops_an_idle_stage() {
    let binder = Arc::new(InMemoryBinder::new());
    let stage = ProcessorStage::new(StageConfig::new("idle", policy("")), binder, Arc::new(PassthroughHandler::new()));
    let stats = tokio::time::timeout(Duration::from_secs(5), stage.run(tokio::time::sleep(Duration::from_millis(20))))
        .await
        .expect("stage did not stop")
        .unwrap();
    assert_eq!(stats, Default::default());
}

#[tokio::test]
async fn second_stage_on_same_input_is_rejected() {
    let binder = Arc::new(InMemoryBinder::new());
    let _held = binder.bind_consumer("input").unwrap();
    let stage = ProcessorStage::new(StageConfig::new("dup", policy("")), binder, Arc::new(PassthroughHandler::new()));
    let res = stage.run(std::future::pending::<()>()).await;
    assert!(matches!(res, Err(StageError::Binder(_))));
}

#[tokio::test]
async fn jsonl_stage_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let settings = BinderSettings { kind: BinderKind::Jsonl, root: dir.path().to_path_buf(), ..Default::default() };
    let writer = JsonlBinder::new(dir.path());
    let seed: Box<dyn MessageSink> = writer.bind_producer("orders").unwrap();
    seed.send(
        MessageBuilder::with_payload("{'name':'foo'}")
            .content_type("application/json")
            .header("foo", "fooValue")
            .header("x-trace", "t1")
            .build(),
    )
    .await
    .unwrap();

    let cfg = StageConfig::new("files", policy("x-*,contentType")).with_input("orders").with_output("shipped");
    let handler = PassthroughHandler::new().with_header("contentType", "text/plain");
    let stage = ProcessorStage::new(cfg, settings.build().shared(), Arc::new(handler));
    let stats = stage.run(std::future::pending::<()>()).await.unwrap();
    assert_eq!(stats.processed, 1);

    let line = std::fs::read_to_string(dir.path().join("shipped.jsonl")).unwrap();
    let wire = WireMessage::from_line(line.trim()).unwrap();
    assert_eq!(wire.headers.get("foo"), Some("fooValue"));
    assert!(wire.headers.get("x-trace").is_none());
    assert_eq!(wire.headers.get("contentType"), Some("text/plain"));
    assert_eq!(wire.payload.as_deref(), Some("{'name':'foo'}"));
}

struct RecordingLayer {
    spans: Arc<Mutex<Vec<String>>>,
}
impl<S> Layer<S> for RecordingLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::span::Id, ctx: Context<'_, S>) {
        let meta = ctx.metadata(id).unwrap_or_else(|| attrs.metadata());
        self.spans.lock().unwrap().push(meta.name().to_string());
    }
}

#[test]
fn spans_present_for_each_message() {
    let recorded = Arc::new(Mutex::new(Vec::<String>::new()));
    let subscriber = Registry::default().with(RecordingLayer { spans: recorded.clone() });
    let _guard = tracing::subscriber::set_default(subscriber);

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let binder = Arc::new(InMemoryBinder::new());
        let input = binder.input_sender("input").unwrap();
        input.send(MessageBuilder::with_payload("a").build()).await.unwrap();
        drop(input);
        binder.close_input("input");
        let stage = ProcessorStage::new(StageConfig::new("spans", policy("")), binder, Arc::new(PassthroughHandler::new()));
        stage.run(std::future::pending::<()>()).await.unwrap();
    });

    let names = recorded.lock().unwrap().clone();
    assert!(names.iter().any(|n| n == "stage.process"), "missing stage span: {:?}", names);
}

#[tokio::test]
async fn stage_on_configured_memory_binder() {
    let cfg = processor::StreamConfig::from_yaml_str("binder:\n  kind: memory\n  capacity: 8\n").unwrap();
    let configured = cfg.binder.build();
    let mem = configured.memory().unwrap().clone();
    let input = mem.input_sender("input").unwrap();
    input.send(MessageBuilder::with_payload("hi").content_type("text/plain").build()).await.unwrap();
    drop(input);
    mem.close_input("input");

    let stage = ProcessorStage::new(cfg.stage_config("mem").unwrap(), configured.shared(), Arc::new(PassthroughHandler::new()));
    let stats = stage.run(std::future::pending::<()>()).await.unwrap();
    assert_eq!(stats.processed, 1);
    let out = mem.collector().for_destination("output").poll(Duration::from_secs(1)).await.unwrap();
    assert_eq!(out.content_type(), Some("text/plain"));
}
