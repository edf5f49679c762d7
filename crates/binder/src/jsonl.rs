//! JSONL-backed binder: each destination is an append-only
//! `<root>/<destination>.jsonl` file holding one [`WireMessage`] per line.

use crate::wire::WireMessage;
use crate::{check_destination, Binder, BinderError, MessageSink, MessageSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stream_core::Message;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::debug;

/// File-backed binder rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonlBinder {
    root: PathBuf,
    routes: HashMap<String, PathBuf>,
}

impl JsonlBinder {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf(), routes: HashMap::new() }
    }

    /// Pin `destination` to an explicit file instead of `<root>/<destination>.jsonl`.
    #[must_use]
    pub fn with_route<P: AsRef<Path>>(mut self, destination: impl Into<String>, path: P) -> Self {
        let _ = self.routes.insert(destination.into(), path.as_ref().to_path_buf());
        self
    }

    /// File backing `destination`.
    pub fn path_for(&self, destination: &str) -> PathBuf {
        match self.routes.get(destination) {
            Some(p) => p.clone(),
            None => self.root.join(format!("{}.jsonl", destination)),
        }
    }
}

impl Binder for JsonlBinder {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn bind_consumer(&self, destination: &str) -> Result<Box<dyn MessageSource>, BinderError> {
        check_destination(destination)?;
        let path = self.path_for(destination);
        debug!(path = %path.display(), "jsonl consumer bound");
        Ok(Box::new(JsonlSource { path, lines: None }))
    }

    fn bind_producer(&self, destination: &str) -> Result<Box<dyn MessageSink>, BinderError> {
        check_destination(destination)?;
        let path = self.path_for(destination);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        debug!(path = %path.display(), "jsonl producer bound");
        Ok(Box::new(JsonlSink { path, file: Mutex::new(None) }))
    }
}

struct JsonlSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
}

#[async_trait]
impl MessageSource for JsonlSource {
    async fn recv(&mut self) -> Result<Option<Message>, BinderError> {
        if self.lines.is_none() {
            let file = File::open(&self.path).await?;
            self.lines = Some(BufReader::new(file).lines());
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            return WireMessage::from_line(&line)?.into_message().map(Some);
        }
        Ok(None)
    }
}

struct JsonlSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

#[async_trait]
impl MessageSink for JsonlSink {
    async fn send(&self, message: Message) -> Result<(), BinderError> {
        let line = WireMessage::from_message(&message)?.to_line()?;
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let f = OpenOptions::new().create(true).append(true).open(&self.path).await?;
            *guard = Some(f);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        Ok(())
    }
}
