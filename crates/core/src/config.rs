use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pl::SystemProfile;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/racing_ledger".to_string(),
            max_connections: 10,
        }
    }
}

/// Per-system market setup. Systems missing from `systems` use
/// `default_profile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub default_profile: SystemProfile,
    #[serde(default)]
    pub systems: HashMap<String, SystemProfile>,
}

impl LedgerConfig {
    /// Returns the profile configured for `system_id`.
    #[must_use]
    pub fn profile_for(&self, system_id: &str) -> SystemProfile {
        self.systems
            .get(system_id)
            .copied()
            .unwrap_or(self.default_profile)
    }

    /// Registers a profile for one system.
    #[must_use]
    pub fn with_system(mut self, system_id: impl Into<String>, profile: SystemProfile) -> Self {
        self.systems.insert(system_id.into(), profile);
        self
    }
}
