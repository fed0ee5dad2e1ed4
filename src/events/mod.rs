//! Real-time notifier - pub/sub for deployment log streams
//!
//! Messages are published to string topics scoped per deployment
//! (`deploy-log:<deployment_id>`) and per attempt
//! (`attempt-log:<attempt_id>`). Delivery is push-only and best-effort:
//! there is no backlog, late subscribers miss earlier messages, and
//! the persisted attempt log remains the durable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Message kinds carried on a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierMessage {
    /// One log line
    LogMessage {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Final event for an attempt
    Completed {
        success: bool,
        status: String,
        /// Wall-clock duration of the attempt in seconds
        duration: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A failure outside the normal log flow
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl NotifierMessage {
    pub fn log(message: impl Into<String>) -> Self {
        NotifierMessage::LogMessage {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        NotifierMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A message paired with the topic it was published on
#[derive(Debug, Clone, Serialize)]
pub struct TopicMessage {
    pub topic: String,
    #[serde(flatten)]
    pub message: NotifierMessage,
}

/// Topic key for a deployment's combined stream
pub fn deploy_log_topic(deployment_id: Uuid) -> String {
    format!("deploy-log:{}", deployment_id)
}

/// Topic key for one attempt's stream
pub fn attempt_log_topic(attempt_id: Uuid) -> String {
    format!("attempt-log:{}", attempt_id)
}

/// Topic key for host-scoped operations (key sync, installs)
pub fn host_log_topic(host_id: Uuid) -> String {
    format!("host-log:{}", host_id)
}

/// Broadcast-backed notifier
pub struct Notifier {
    sender: broadcast::Sender<TopicMessage>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish to one topic. Errors (no receivers) are ignored.
    pub fn publish(&self, topic: &str, message: NotifierMessage) {
        let _ = self.sender.send(TopicMessage {
            topic: topic.to_string(),
            message,
        });
    }

    /// Publish the same message to the deployment and attempt topics,
    /// so a subscriber can follow either stream
    pub fn publish_attempt(&self, deployment_id: Uuid, attempt_id: Uuid, message: NotifierMessage) {
        self.publish(&deploy_log_topic(deployment_id), message.clone());
        self.publish(&attempt_log_topic(attempt_id), message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicMessage> {
        self.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
