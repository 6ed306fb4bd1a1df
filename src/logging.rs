//! Request log: entries appended to a JSONL file.
//!
//! Every entry is also emitted as a `tracing` event so it shows up on the
//! console alongside the `tower_http` request spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    fn emit_tracing(&self) {
        let id = self.request_id.as_deref().unwrap_or("-");
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(component = %self.component, request_id = %id, "{}", self.message)
            }
            LogLevel::Info => {
                tracing::info!(component = %self.component, request_id = %id, "{}", self.message)
            }
            LogLevel::Warn => {
                tracing::warn!(component = %self.component, request_id = %id, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(component = %self.component, request_id = %id, "{}", self.message)
            }
        }
    }
}

pub struct Logger {
    writer: BufWriter<File>,
}

impl Logger {
    /// Open (or create) the JSONL file for appending.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, entry: &LogEntry) {
        if let Ok(json) = serde_json::to_string(entry) {
            let _ = writeln!(self.writer, "{}", json);
            let _ = self.writer.flush();
        }
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn log(&self, entry: LogEntry) {
        entry.emit_tracing();
        if let Ok(mut logger) = self.0.lock() {
            logger.log(&entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    /// A logger that tags every entry with `request_id`.
    pub fn for_request(&self, request_id: impl Into<String>) -> RequestLogger {
        RequestLogger {
            inner: self.clone(),
            request_id: request_id.into(),
        }
    }
}

/// Per-request handle; cheap to clone into a streaming task.
#[derive(Clone)]
pub struct RequestLogger {
    inner: SharedLogger,
    request_id: String,
}

impl RequestLogger {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    fn entry(&self, level: LogLevel, component: &str, message: String) -> LogEntry {
        LogEntry::new(level, component, message).with_request_id(self.request_id.clone())
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.inner
            .log(self.entry(LogLevel::Debug, component, message.into()));
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.inner
            .log(self.entry(LogLevel::Info, component, message.into()));
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.inner
            .log(self.entry(LogLevel::Warn, component, message.into()));
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.inner
            .log(self.entry(LogLevel::Error, component, message.into()));
    }

    pub fn info_with_context(
        &self,
        component: &str,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.inner.log(
            self.entry(LogLevel::Info, component, message.into())
                .with_context(context),
        );
    }
}
