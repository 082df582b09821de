use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::ParentId,
    error::ApiException,
    protocol::{AttributePayload, AttributeWrapper},
};
use tokio::sync::broadcast;
use tracing::{error, info};

mod controller;
pub mod display;
mod local;
pub mod mapping;
pub mod picklist;
pub mod remote;

pub use controller::{
    AttributeFormController, AttributeRow, AttributeView, EditGranularity, FormError,
    FormOptions, PayloadError, RowKey,
};
pub use display::{display_value, EditValue};
pub use mapping::FieldMapping;
pub use picklist::{picklist_options, PicklistOption};
pub use remote::RemoteAttributeBackend;

const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

#[async_trait]
pub trait AttributeSource: Send + Sync {
    async fn fetch_attributes(&self, parent_id: ParentId) -> Result<Vec<AttributeWrapper>>;
}

#[async_trait]
pub trait AttributeSink: Send + Sync {
    async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()>;
}

pub struct MissingAttributeSource;

#[async_trait]
impl AttributeSource for MissingAttributeSource {
    async fn fetch_attributes(&self, parent_id: ParentId) -> Result<Vec<AttributeWrapper>> {
        Err(anyhow!(
            "attribute source unavailable for parent {}",
            parent_id.0
        ))
    }
}

pub struct MissingAttributeSink;

#[async_trait]
impl AttributeSink for MissingAttributeSink {
    async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()> {
        Err(anyhow!(
            "attribute sink unavailable; {} change(s) not saved",
            payloads.len()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Success,
    Error,
}

impl NotifyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyLevel::Success => "success",
            NotifyLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: NotifyLevel,
}

/// Fire-and-forget presentation channel for operation outcomes.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, level: NotifyLevel);
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Success => info!(title, body = message, "attribute form notification"),
            NotifyLevel::Error => error!(title, body = message, "attribute form notification"),
        }
    }
}

/// Publishes notifications to any number of subscribers. Sends with no
/// subscriber are dropped.
pub struct ChannelNotifier {
    events: broadcast::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, title: &str, message: &str, level: NotifyLevel) {
        let _ = self.events.send(Notification {
            title: title.to_string(),
            message: message.to_string(),
            level,
        });
    }
}

/// Message shown to the user for a collaborator failure: the structured error
/// body when one is in the chain, else the whole error chain.
pub fn user_facing_message(err: &anyhow::Error) -> String {
    let structured = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ApiException>())
        .map(|api| api.message.trim())
        .find(|message| !message.is_empty());
    if let Some(message) = structured {
        return message.to_string();
    }

    let own = format!("{err:#}");
    if own.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        own
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
