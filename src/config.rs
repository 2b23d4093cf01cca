use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub gate: GateConfig,
    pub vetting: VettingConfig,
    pub scheduler: SchedulerConfig,
    pub tiers: TierThresholds,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Chain identifier stamped on every record (part of the catalog key).
    pub chain: String,
    pub pair_index: ProviderEndpoint,
    pub metadata: ProviderEndpoint,
    pub chain_rpc: ProviderEndpoint,
}

/// Per-provider connection settings. Every provider call carries its own
/// timeout; a rate-limit response arms a cooldown consulted by later calls.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub url: String,
    pub timeout_secs: u64,
    pub cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum token age before vetting dispatch. Single source of truth
    /// shared by the discovery and sweep cycles.
    pub min_age_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VettingConfig {
    pub webhook_url: String,
    /// Status endpoint for polling outcomes; submission id is appended.
    pub status_url: Option<String>,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
    pub timeout_secs: u64,
    /// In-flight submissions older than this are expired by the sweep.
    pub staleness_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub discovery_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub discovery_workers: usize,
    pub sweep_workers: usize,
    /// Max unvetted records re-evaluated per sweep tick.
    pub sweep_batch: usize,
}

/// Score boundaries for the risk-tier mapping. Scores at or above a
/// boundary fall into that tier; anything below `medium` is Low.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TierThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            gate: GateConfig::default(),
            vetting: VettingConfig::default(),
            scheduler: SchedulerConfig::default(),
            tiers: TierThresholds::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            chain: "solana".into(),
            pair_index: ProviderEndpoint {
                url: "http://127.0.0.1:8091".into(),
                timeout_secs: 8,
                cooldown_secs: 30,
            },
            metadata: ProviderEndpoint {
                url: "http://127.0.0.1:8092".into(),
                timeout_secs: 8,
                cooldown_secs: 30,
            },
            chain_rpc: ProviderEndpoint {
                url: "http://127.0.0.1:8899".into(),
                timeout_secs: 6,
                cooldown_secs: 30,
            },
        }
    }
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".into(),
            timeout_secs: 8,
            cooldown_secs: 30,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { min_age_days: 14 }
    }
}

impl Default for VettingConfig {
    fn default() -> Self {
        Self {
            webhook_url: "http://127.0.0.1:5678/webhook/vet-token".into(),
            status_url: Some("http://127.0.0.1:5678/webhook/vet-status".into()),
            auth_user: None,
            auth_password: None,
            timeout_secs: 10,
            staleness_hours: 24,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 300,
            sweep_interval_secs: 900,
            poll_interval_secs: 60,
            discovery_workers: 4,
            sweep_workers: 4,
            sweep_batch: 200,
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            critical: 80.0,
            high: 60.0,
            medium: 40.0,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/mintradar.db".into(),
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}
