//! Service configuration from the environment.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use voxnlu_engine::EngineConfig;

pub const DEFAULT_BUS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_RASA_PATH: &str = "/rasa";
pub const DEFAULT_RASA_BIN: &str = "rasa";
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Broker URL (`BUS_URL`).
    pub bus_url: String,
    /// Engine working directory (`RASA_PATH`).
    pub rasa_path: PathBuf,
    /// Engine/trainer executable (`RASA_BIN`).
    pub rasa_bin: String,
    /// Graceful engine stop timeout (`ENGINE_STOP_TIMEOUT_SECS`).
    pub stop_timeout: Duration,
    /// Trainer run limit (`TRAIN_TIMEOUT_SECS`, unset = none).
    pub train_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus_url: DEFAULT_BUS_URL.to_string(),
            rasa_path: PathBuf::from(DEFAULT_RASA_PATH),
            rasa_bin: DEFAULT_RASA_BIN.to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            train_timeout: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset;
    /// invalid numbers fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            bus_url: var("BUS_URL").unwrap_or(defaults.bus_url),
            rasa_path: var("RASA_PATH").map(PathBuf::from).unwrap_or(defaults.rasa_path),
            rasa_bin: var("RASA_BIN").unwrap_or(defaults.rasa_bin),
            stop_timeout: var("ENGINE_STOP_TIMEOUT_SECS")
                .and_then(|v| parse_secs("ENGINE_STOP_TIMEOUT_SECS", &v))
                .unwrap_or(defaults.stop_timeout),
            train_timeout: var("TRAIN_TIMEOUT_SECS").and_then(|v| parse_secs("TRAIN_TIMEOUT_SECS", &v)),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.rasa_path)
            .with_program(self.rasa_bin.clone())
            .with_stop_timeout(self.stop_timeout)
            .with_train_timeout(self.train_timeout)
    }
}

fn parse_secs(key: &str, value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            warn!(key, value, "invalid duration in environment, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> ServiceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(from(&[]), ServiceConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = from(&[
            ("BUS_URL", "redis://bus:6380"),
            ("RASA_PATH", "/srv/rasa"),
            ("RASA_BIN", "/opt/venv/bin/rasa"),
            ("ENGINE_STOP_TIMEOUT_SECS", "3"),
            ("TRAIN_TIMEOUT_SECS", "600"),
        ]);
        assert_eq!(cfg.bus_url, "redis://bus:6380");
        assert_eq!(cfg.rasa_path, PathBuf::from("/srv/rasa"));
        assert_eq!(cfg.stop_timeout, Duration::from_secs(3));
        assert_eq!(cfg.train_timeout, Some(Duration::from_secs(600)));

        let engine = cfg.engine_config();
        assert_eq!(engine.engine.program, "/opt/venv/bin/rasa");
        assert_eq!(engine.model_path(), PathBuf::from("/srv/rasa/generated/model-nlu-only.tar.gz"));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = from(&[("ENGINE_STOP_TIMEOUT_SECS", "soon"), ("TRAIN_TIMEOUT_SECS", "0"), ("RASA_PATH", " ")]);
        assert_eq!(cfg.stop_timeout, Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS));
        assert_eq!(cfg.train_timeout, None);
        assert_eq!(cfg.rasa_path, PathBuf::from(DEFAULT_RASA_PATH));
    }
}
