use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub ledger_path: PathBuf,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            ledger_path: base_path.join("ledger.sqlite"),
            base_path,
        }
    }
}
