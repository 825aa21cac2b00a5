//! Mediation configuration, read from `mediation.toml`.
//!
//! ```toml
//! [mediation]
//! retention = "retain-persisted"
//! enabled = true
//! ```

use crate::policy::MediationPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// What happens to a Mediator once its outermost operation unwinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    /// Evict every Mediator when its depth returns to 0.
    #[default]
    Evict,
    /// Keep Mediators of entities that were already keyed when the Mediator
    /// was created, for reuse within the same context.
    RetainPersisted,
}

/// Settings for a [`MediationContext`](crate::MediationContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationConfig {
    #[serde(default)]
    pub retention: Retention,
    /// Initial value for the process-wide switch, see [`MediationConfig::apply_global_switch`].
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            retention: Retention::default(),
            enabled: default_enabled(),
        }
    }
}

/// Raw TOML structure of `mediation.toml`.
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    mediation: MediationConfig,
}

impl MediationConfig {
    /// Loads configuration from `path`.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file is
    /// logged and also yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No mediation config at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded mediation config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse mediation config {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read mediation config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Parses the contents of a `mediation.toml` file.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<ConfigFile>(contents).map(|file| file.mediation)
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Copies `enabled` into the process-wide switch.
    pub fn apply_global_switch(&self) {
        MediationPolicy::set_global_enabled(self.enabled);
    }
}
