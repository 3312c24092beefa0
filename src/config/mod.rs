//! Startup settings for the threading layer.
//!
//! Loaded from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Optional TOML config file
//! 3. Environment variables (highest priority, `EVGUARD__` prefix)
//!
//! `Settings::apply` performs the registrations the settings describe, in
//! the order the registry requires (backend, then debugging), and is subject
//! to the same before-any-dispatcher rules as manual registration.


use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::enable_lock_debugging;
use crate::use_native_threads;
use crate::Result;
use crate::WakeupFlavor;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Lock backend selection and misuse debugging
    #[serde(default)]
    pub locking: LockingConfig,
    /// Wakeup channel parameters
    #[serde(default)]
    pub wakeup: WakeupConfig,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct LockingConfig {
    /// Which backend to register at startup
    #[serde(default)]
    pub backend: BackendChoice,
    /// Wrap handles with the misuse-detecting decorator
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Leave the registry untouched: single-thread-assumed mode unless the
    /// application registers callbacks itself.
    #[default]
    None,
    /// The built-in `parking_lot`-based backend plus the `pthread_self`
    /// identity provider.
    Native,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeupConfig {
    /// Signaling primitive backing the channel
    #[serde(default)]
    pub flavor: WakeupFlavor,
}

impl Settings {
    /// Load configuration with proper priority ordering.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a TOML settings file
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("EVGUARD")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Perform the registrations these settings describe. Fails like the
    /// underlying registrations (frozen registry, version mismatch).
    pub fn apply(&self) -> Result<()> {
        if self.locking.backend == BackendChoice::Native {
            use_native_threads()?;
        }
        if self.locking.debug {
            enable_lock_debugging();
        }
        Ok(())
    }
}
