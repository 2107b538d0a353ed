//! Build log events and the publish side of the log relay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::id::ProjectId;

/// Which stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lines the pipeline itself emits (status changes, terminal result).
    System,
}

/// One immutable log record for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub project: ProjectId,
    pub stream: LogStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(project: ProjectId, stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            project,
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn channel(&self) -> String {
        self.project.log_channel()
    }

    /// Wire payload published on the channel: `{"log": "<text>"}`.
    pub fn to_wire(&self) -> String {
        let payload = LogPayload {
            log: self.text.clone(),
        };
        // A struct with a single String field always serializes.
        serde_json::to_string(&payload).unwrap_or_default()
    }
}

/// JSON body of a published log message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub log: String,
}

/// Publish side of the log relay.
///
/// `publish` is fire-and-forget: it never blocks the build and never fails.
/// Events from one publisher must reach the broker in call order.
#[async_trait]
pub trait LogPublisher: Send + Sync {
    fn publish(&self, event: LogEvent);

    /// Flush queued events and disconnect, giving up after `grace`.
    async fn close(&self, grace: Duration);
}

/// A project-bound handle onto a publisher, cheap to clone into tasks.
#[derive(Clone)]
pub struct BuildLog {
    project: ProjectId,
    publisher: Arc<dyn LogPublisher>,
}

impl BuildLog {
    pub fn new(project: ProjectId, publisher: Arc<dyn LogPublisher>) -> Self {
        Self { project, publisher }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn system(&self, text: impl Into<String>) {
        let text = text.into();
        info!(project = %self.project, "{}", text);
        self.emit(LogStream::System, text);
    }

    pub fn stdout(&self, text: impl Into<String>) {
        let text = text.into();
        info!(project = %self.project, stream = "stdout", "{}", text);
        self.emit(LogStream::Stdout, text);
    }

    /// Stderr lines are published with an `error: ` prefix.
    pub fn stderr(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(project = %self.project, stream = "stderr", "{}", text);
        self.emit(LogStream::Stderr, format!("error: {}", text));
    }

    pub async fn close(&self, grace: Duration) {
        self.publisher.close(grace).await;
    }

    fn emit(&self, stream: LogStream, text: String) {
        self.publisher
            .publish(LogEvent::new(self.project.clone(), stream, text));
    }
}
