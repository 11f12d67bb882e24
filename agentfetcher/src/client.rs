use async_trait::async_trait;

use crate::error::{AgentFetcherError, Result};
use crate::models::DevicePage;

/// One page request against the device listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct DeviceQuery {
    pub cursor: Option<String>,
    pub page_size: u32,
    pub platform: Option<String>,
}

/// The inventory provider client, behind a trait so tests can substitute
/// a fake service. Authentication and rate limiting live here, not in the
/// ingestion engine.
#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn list_devices(&self, query: &DeviceQuery) -> Result<DevicePage>;
}

/// HTTP implementation over the agent inventory REST API.
pub struct HttpInventoryService {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpInventoryService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
            token,
        })
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    async fn list_devices(&self, query: &DeviceQuery) -> Result<DevicePage> {
        let url = format!("{}/v1/devices", self.base_url.trim_end_matches('/'));
        let mut request = self
            .http_client
            .get(&url)
            .query(&[("limit", query.page_size.to_string())]);
        if let Some(cursor) = &query.cursor {
            request = request.query(&[("cursor", cursor.as_str())]);
        }
        if let Some(platform) = &query.platform {
            request = request.query(&[("platform", platform.as_str())]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentFetcherError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<DevicePage>().await?)
    }
}
