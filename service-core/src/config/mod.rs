use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings every service reads from `configuration.*` and `APP__*` env vars.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// OTLP collector endpoint; tracing stays local when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
}

fn default_json_logs() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
