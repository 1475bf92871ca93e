//! Configuration loading for Rollcall
//!
//! Sources, lowest precedence first:
//! - Built-in defaults ([`RollcallConfig::default`])
//! - An optional YAML file
//! - `ROLLCALL_`-prefixed environment variables, `__` separating nested keys
//!
//! # Example
//!
//! ```rust,no_run
//! use config_engine::ConfigEngine;
//!
//! let config = ConfigEngine::new().with_file("rollcall.yaml").load()?;
//! println!("syncing {} writes per batch", config.sync.batch_size);
//! # Ok::<(), config_engine::ConfigError>(())
//! ```

pub mod engine;
pub mod error;
pub mod settings;
pub mod validation;

pub use engine::*;
pub use error::*;
pub use settings::*;
pub use validation::*;
