// Configuration validation
use crate::error::{ConfigError, Result};
use crate::settings::RollcallConfig;

pub trait ConfigValidator {
    fn validate(&self) -> Result<()>;
}

impl ConfigValidator for RollcallConfig {
    fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "store.max_connections must be at least 1".to_string(),
            ));
        }
        if self.store.db_path.trim().is_empty() {
            return Err(ConfigError::ValidationError("store.db_path is empty".to_string()));
        }
        let url = self.remote.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "remote.base_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
