use serde::Deserialize;

use crate::error::{AgentFetcherError, Result};

const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryParams {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Restrict the listing to one platform, e.g. "linux".
    #[serde(default)]
    pub platform: Option<String>,
}

fn default_page_size() -> u32 {
    100
}

impl InventoryParams {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(AgentFetcherError::InvalidParam(format!(
                "page_size must be in 1..={MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let params: InventoryParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.page_size, 100);
        assert!(params.platform.is_none());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let params: InventoryParams =
            serde_json::from_value(serde_json::json!({"page_size": 0})).unwrap();
        assert!(params.validate().is_err());
    }
}
