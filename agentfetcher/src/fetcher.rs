use std::sync::Arc;

use async_trait::async_trait;

use hstorage::{
    errors::{Result as StorageResult, StorageError},
    fetch::{SnapshotFetcher, SnapshotSource},
    kind::{ChildKindSpec, ResourceKindSpec},
    models::Snapshot,
};

use crate::{
    client::{DeviceQuery, HttpInventoryService, InventoryService},
    mapper,
    params::InventoryParams,
};

/// The resource kind this fetcher collects: one row per enrolled device,
/// with tags and network interfaces as owned child sets.
pub static DEVICE_KIND: ResourceKindSpec = ResourceKindSpec {
    name: "agent_device",
    children: &[
        ChildKindSpec {
            name: "tags",
            key_fields: &["key"],
        },
        ChildKindSpec {
            name: "interfaces",
            key_fields: &["mac"],
        },
    ],
};

pub struct AgentFetcher {
    service: Arc<dyn InventoryService>,
}

impl AgentFetcher {
    pub fn new(service: Arc<dyn InventoryService>) -> Self {
        Self { service }
    }

    pub fn with_http_client(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> StorageResult<Self> {
        let service = HttpInventoryService::new(base_url, token).map_err(|err| {
            StorageError::Initialization(format!("failed to create inventory client: {err}"))
        })?;
        Ok(Self {
            service: Arc::new(service),
        })
    }
}

#[async_trait]
impl SnapshotFetcher for AgentFetcher {
    fn name(&self) -> &'static str {
        "agentfetcher"
    }

    fn kind(&self) -> &'static ResourceKindSpec {
        &DEVICE_KIND
    }

    async fn open(&self, params: serde_json::Value) -> StorageResult<Box<dyn SnapshotSource>> {
        let params: InventoryParams = serde_json::from_value(params)
            .map_err(|err| StorageError::InvalidArg(format!("invalid fetch params: {err}")))?;
        params
            .validate()
            .map_err(|err| StorageError::InvalidArg(err.to_string()))?;

        Ok(Box::new(DeviceSource {
            service: Arc::clone(&self.service),
            params,
            cursor: None,
            exhausted: false,
        }))
    }
}

/// Cursor-paged stream over the device listing for one run.
struct DeviceSource {
    service: Arc<dyn InventoryService>,
    params: InventoryParams,
    cursor: Option<String>,
    exhausted: bool,
}

#[async_trait]
impl SnapshotSource for DeviceSource {
    fn has_more(&self) -> bool {
        !self.exhausted
    }

    async fn next_page(&mut self) -> StorageResult<Vec<Snapshot>> {
        let query = DeviceQuery {
            cursor: self.cursor.take(),
            page_size: self.params.page_size,
            platform: self.params.platform.clone(),
        };
        let page = self
            .service
            .list_devices(&query)
            .await
            .map_err(|err| StorageError::Fetch(err.to_string()))?;

        self.cursor = page.next_cursor;
        self.exhausted = self.cursor.is_none();

        let (snapshots, skipped) = mapper::map_page(&page.devices);
        if skipped > 0 {
            log::warn!("Skipped {skipped} unconvertible device record(s) in page");
        }
        Ok(snapshots)
    }
}
