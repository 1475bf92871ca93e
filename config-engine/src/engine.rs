use crate::error::{ConfigError, Result};
use crate::settings::RollcallConfig;
use crate::validation::ConfigValidator;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use std::path::PathBuf;

/// Environment prefix; nested keys use `__`, e.g. `ROLLCALL_SYNC__BATCH_SIZE`
pub const ENV_PREFIX: &str = "ROLLCALL_";

/// Layered configuration loader
///
/// Precedence, lowest first: built-in defaults, the YAML file, environment.
#[derive(Debug, Clone)]
pub struct ConfigEngine {
    file: Option<PathBuf>,
    require_file: bool,
    env_prefix: String,
}

impl Default for ConfigEngine {
    fn default() -> Self {
        Self {
            file: None,
            require_file: false,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a YAML file if it exists
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Fail when the YAML file is missing
    pub fn require_file(mut self) -> Self {
        self.require_file = true;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(RollcallConfig::default()));

        if let Some(path) = &self.file {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else if self.require_file {
                return Err(ConfigError::SourceNotFound(path.display().to_string()));
            } else {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            }
        }

        Ok(figment.merge(Env::prefixed(&self.env_prefix).split("__")))
    }

    /// Load and validate the configuration
    pub fn load(&self) -> Result<RollcallConfig> {
        let config: RollcallConfig = self.figment()?.extract()?;
        config.validate()?;
        Ok(config)
    }
}
