//! Run a single processor stage over JSONL files.

#![deny(unsafe_code)]

use binder::{BinderKind, BinderSettings, JsonlBinder};
use clap::Parser;
use processor::{PassthroughHandler, ProcessorStage, StageStats, StreamConfig};
use propagation::HeaderList;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stream-run", about = "Pass JSONL messages through a header-propagating stage")]
struct Cli {
    /// YAML config; falls back to $STREAM_CONFIG_PATH
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Input file, one wire message per line; defaults to `<binder.root>/<input destination>.jsonl`
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Output file, appended to; defaults to `<binder.root>/<output destination>.jsonl`
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Comma-separated headers not copied to the output (overrides config)
    #[arg(long)]
    not_propagated_headers: Option<String>,
    /// Header the handler sets on every output message
    #[arg(long = "set-header", value_name = "NAME=VALUE", value_parser = parse_header)]
    set_headers: Vec<(String, String)>,
    /// Stage name for logs
    #[arg(long, default_value = "stream-run")]
    name: String,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_json_logging();
    install_observer();
    let cli = Cli::parse();
    let stats = run(&cli, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    println!("{}", json!({ "processed": stats.processed, "failed": stats.failed }));
    Ok(())
}

#[cfg(not(feature = "otel"))]
fn install_observer() {
    propagation::set_observer(Some(Box::new(telemetry::TracingPropagationObserver)));
}

#[cfg(feature = "otel")]
fn install_observer() {
    if let Err(e) = telemetry::init_otel("stream-run") {
        tracing::warn!(error = %e, "otel disabled");
    }
    propagation::set_observer(Some(Box::new(telemetry::propagation_observer::global())));
}

async fn run<S>(cli: &Cli, shutdown: S) -> Result<StageStats, Box<dyn std::error::Error>>
where
    S: std::future::Future<Output = ()> + Send,
{
    let mut cfg = StreamConfig::load(cli.config.as_deref())?;
    if let Some(list) = &cli.not_propagated_headers {
        cfg.integration.not_propagated_headers = HeaderList::Csv(list.clone());
    }
    let stage_cfg = cfg.stage_config(cli.name.clone())?;
    let binder = file_binder(
        &cfg.binder,
        &stage_cfg.input,
        cli.input.as_deref(),
        &stage_cfg.output,
        cli.output.as_deref(),
    )?;

    let handler = cli
        .set_headers
        .iter()
        .fold(PassthroughHandler::new(), |h, (k, v)| h.with_header(k.clone(), v.clone()));

    info!(
        input = %binder.path_for(&stage_cfg.input).display(),
        output = %binder.path_for(&stage_cfg.output).display(),
        "running stage"
    );
    let stage = ProcessorStage::new(stage_cfg, Arc::new(binder), Arc::new(handler));
    Ok(stage.run(shutdown).await?)
}

/// JSONL binder rooted at `binder.root`, with `--input`/`--output` pinned to
/// their destinations. File arguments select the JSONL binder on their own;
/// without them the configured kind must be `jsonl`, since an in-memory
/// binder has no way to be fed from the command line.
fn file_binder(
    settings: &BinderSettings,
    input: &str,
    input_path: Option<&Path>,
    output: &str,
    output_path: Option<&Path>,
) -> Result<JsonlBinder, Box<dyn std::error::Error>> {
    if settings.kind == BinderKind::Memory && input_path.is_none() && output_path.is_none() {
        return Err("binder.kind `memory` cannot be driven by stream-run; \
                    pass --input/--output or set binder.kind: jsonl"
            .into());
    }
    let mut binder = JsonlBinder::new(&settings.root);
    if let Some(p) = input_path {
        binder = binder.with_route(input, p);
    }
    if let Some(p) = output_path {
        binder = binder.with_route(output, p);
    }
    Ok(binder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use binder::WireMessage;
    use stream_core::MessageBuilder;
    use tempfile::tempdir;

    fn read_wire(path: &Path) -> Vec<WireMessage> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| WireMessage::from_line(l).unwrap())
            .collect()
    }

    fn write_input(path: &Path) {
        let msgs = [
            MessageBuilder::with_payload("{'name':'foo'}")
                .content_type("application/json")
                .header("foo", "fooValue")
                .header("bar", "barValue")
                .build(),
            MessageBuilder::with_payload(b"\xff\xfe".to_vec())
                .content_type("application/octet-stream")
                .header("bar", "b2")
                .build(),
        ];
        let mut body = String::new();
        for m in &msgs {
            body.push_str(&WireMessage::from_message(m).unwrap().to_line().unwrap());
            body.push('\n');
        }
        std::fs::write(path, body).unwrap();
    }

    fn cli_with_config(dir: &Path, yaml: &str, extra: &[&str]) -> Cli {
        let config = dir.join("stream.yaml");
        std::fs::write(&config, yaml).unwrap();
        let mut args = vec!["stream-run".to_string(), "--config".into(), config.display().to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    fn cli(dir: &Path, extra: &[&str]) -> Cli {
        let input = dir.join("in.jsonl").display().to_string();
        let output = dir.join("out").join("result.jsonl").display().to_string();
        let mut args = vec!["--input", input.as_str(), "--output", output.as_str()];
        args.extend_from_slice(extra);
        cli_with_config(dir, "integration:\n  not_propagated_headers: bar\n", &args)
    }

    fn output_of(cli: &Cli) -> PathBuf {
        cli.output.clone().unwrap()
    }

    #[test]
    fn header_argument_parsing() {
        assert_eq!(parse_header("contentType=text/plain").unwrap(), ("contentType".into(), "text/plain".into()));
        assert_eq!(parse_header("k=a=b").unwrap(), ("k".into(), "a=b".into()));
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=x").is_err());
    }

    #[tokio::test]
    async fn runs_stage_over_files_with_config_policy() {
        let dir = tempdir().unwrap();
        write_input(&dir.path().join("in.jsonl"));
        let cli = cli(dir.path(), &["--set-header", "contentType=text/plain"]);

        let stats = run(&cli, std::future::pending::<()>()).await.unwrap();
        assert_eq!(stats, StageStats { processed: 2, failed: 0 });

        let out = read_wire(&output_of(&cli));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].headers.get("foo"), Some("fooValue"));
        assert!(out[0].headers.get("bar").is_none());
        assert_eq!(out[0].headers.get("contentType"), Some("text/plain"));
        assert_eq!(out[0].payload.as_deref(), Some("{'name':'foo'}"));
        assert!(out[1].payload_base64.is_some());
    }

    #[tokio::test]
    async fn command_line_policy_overrides_config() {
        let dir = tempdir().unwrap();
        write_input(&dir.path().join("in.jsonl"));
        let cli = cli(dir.path(), &["--not-propagated-headers", "foo"]);

        let stats = run(&cli, std::future::pending::<()>()).await.unwrap();
        assert_eq!(stats.processed, 2);
        let out = read_wire(&output_of(&cli));
        assert!(out[0].headers.get("foo").is_none());
        assert_eq!(out[0].headers.get("bar"), Some("barValue"));
    }

    #[tokio::test]
    async fn jsonl_binder_root_comes_from_config() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        write_input(&root.join("orders.jsonl"));
        let yaml = format!(
            "binder:\n  kind: jsonl\n  root: {}\nbindings:\n  input:\n    destination: orders\n  output:\n    destination: shipped\n",
            root.display()
        );
        let cli = cli_with_config(dir.path(), &yaml, &[]);

        let stats = run(&cli, std::future::pending::<()>()).await.unwrap();
        assert_eq!(stats.processed, 2);
        let out = read_wire(&root.join("shipped.jsonl"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].headers.get("bar"), Some("barValue"));
    }

    #[tokio::test]
    async fn memory_binder_without_files_is_rejected() {
        let dir = tempdir().unwrap();
        let cli = cli_with_config(dir.path(), "binder:\n  kind: memory\n", &[]);
        let err = run(&cli, std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("binder.kind"), "got {}", err);
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        let cli = cli(dir.path(), &[]);
        assert!(run(&cli, std::future::pending::<()>()).await.is_err());
    }
}
