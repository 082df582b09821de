//! Local SQLite store as a form collaborator.

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::ParentId,
    protocol::{AttributePayload, AttributeWrapper},
};
use storage::Storage;

use crate::{AttributeSink, AttributeSource};

#[async_trait]
impl AttributeSource for Storage {
    async fn fetch_attributes(&self, parent_id: ParentId) -> Result<Vec<AttributeWrapper>> {
        Storage::fetch_attributes(self, parent_id).await
    }
}

#[async_trait]
impl AttributeSink for Storage {
    async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()> {
        Storage::persist_attributes(self, payloads).await
    }
}

#[cfg(test)]
#[path = "tests/local_tests.rs"]
mod tests;
