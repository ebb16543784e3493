//! JSONL file sink
//!
//! Records and notifications are appended one JSON object per line to the
//! file specified in `[sinks.file]`.

use crate::domain::types::MonitorEvent;
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonlSink {
    file_path: PathBuf,
    /// Serializes appends so concurrent dispatches never interleave lines
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "file_sink_initialized");
        Self { file_path, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append a line to the output file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();

        // Create parent directories if they don't exist
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "file_sink_written");

        Ok(())
    }
}

#[async_trait]
impl Sink for JsonlSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        let json = event.to_json()?;
        self.append_line(&json)?;
        Ok(())
    }
}
