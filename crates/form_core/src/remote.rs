use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use shared::{
    domain::ParentId,
    error::{ApiError, ApiException, ErrorCode},
    protocol::{AttributePayload, AttributeWrapper, SaveAttributesRequest},
};
use tracing::debug;

use crate::{mapping::FieldMapping, AttributeSink, AttributeSource};

/// Attribute service reached over HTTP. Save payloads are rendered with the
/// configured [`FieldMapping`].
pub struct RemoteAttributeBackend {
    http: Client,
    base_url: String,
    mapping: FieldMapping,
}

impl RemoteAttributeBackend {
    pub fn new(base_url: impl Into<String>, mapping: FieldMapping) -> Self {
        Self::with_client(Client::new(), base_url, mapping)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, mapping: FieldMapping) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mapping,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AttributeSource for RemoteAttributeBackend {
    async fn fetch_attributes(&self, parent_id: ParentId) -> Result<Vec<AttributeWrapper>> {
        let res = self
            .http
            .get(format!("{}/parents/{}/attributes", self.base_url, parent_id.0))
            .send()
            .await
            .context("failed to reach attribute service")?;
        let wrappers: Vec<AttributeWrapper> = ensure_success(res)
            .await?
            .json()
            .await
            .context("malformed attribute listing")?;
        debug!(parent_id = parent_id.0, rows = wrappers.len(), "fetched remote attributes");
        Ok(wrappers)
    }
}

#[async_trait]
impl AttributeSink for RemoteAttributeBackend {
    async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()> {
        let body = SaveAttributesRequest {
            attributes_to_update: payloads
                .iter()
                .map(|payload| self.mapping.render(payload))
                .collect(),
        };
        let res = self
            .http
            .post(format!("{}/attributes", self.base_url))
            .json(&body)
            .send()
            .await
            .context("failed to reach attribute service")?;
        ensure_success(res).await?;
        Ok(())
    }
}

/// Turns an error response into an [`ApiException`] when its body carries a
/// message, else into a plain status error. Bodies without a recognised
/// `code` take one from the status.
async fn ensure_success(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
        return Err(ApiException::from(api_error).into());
    }
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .filter(|message| !message.trim().is_empty());
    match message {
        Some(message) => Err(ApiException::new(code_for_status(status), message).into()),
        None => Err(anyhow!("attribute service responded with {status}")),
    }
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        status if status.is_client_error() => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
