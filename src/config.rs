// Runtime configuration: defaults, then an optional JSON file, then CLI
// flags and environment variables.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::codec::VehicleClassTable;
use crate::error::{BusError, Result};
use crate::fetch::DEFAULT_BASE_URL;
use crate::reconcile::{DEFAULT_CONGESTION_FIELDS, ReconcileOptions};

/// The deployed page polls every 5 seconds although its comment says 20.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug, Default)]
#[command(name = "seoul_bus_board", version, about = "Live Seoul bus positions per route stop")]
pub struct Cli {
    #[arg(long, env = "BUS_BOARD_CONFIG", help = "JSON config file")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "BUS_SERVICE_KEY", hide_env_values = true, help = "Pre-encoded API service key")]
    pub service_key: Option<String>,
    #[arg(long = "route", value_name = "BUS_ROUTE_ID", help = "Route to poll (repeatable)")]
    pub routes: Vec<String>,
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long, help = "CSV of route_id,vehicle_digits,class_tag")]
    pub class_table: Option<PathBuf>,
    #[arg(long, default_value_t = false, help = "Log unmatched vehicles at debug level")]
    pub quiet_unmatched: bool,
    #[arg(long)]
    pub bind: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_key: String,
    pub base_url: String,
    pub routes: Vec<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub congestion_fields: Vec<String>,
    pub log_unmatched: bool,
    pub class_table: Option<PathBuf>,
    pub bind: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            service_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            routes: Vec::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            congestion_fields: DEFAULT_CONGESTION_FIELDS.iter().map(|f| f.to_string()).collect(),
            log_unmatched: true,
            class_table: None,
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("seoul_bus");
        path.push("config.json");
        path
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BusError::FileError(format!("Failed to read config {:?}: {}", path, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| BusError::ConfigError(format!("Invalid config {:?}: {}", path, e)))
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_cli(cli);
        config.validate()?;
        info!(
            routes = ?config.routes,
            interval_secs = config.poll_interval_secs,
            "✓ Configuration loaded"
        );
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(key) = &cli.service_key {
            self.service_key = key.clone();
        }
        if !cli.routes.is_empty() {
            self.routes = cli.routes.clone();
        }
        if let Some(secs) = cli.poll_interval_secs {
            self.poll_interval_secs = secs;
        }
        if let Some(url) = &cli.base_url {
            self.base_url = url.clone();
        }
        if let Some(path) = &cli.class_table {
            self.class_table = Some(path.clone());
        }
        if cli.quiet_unmatched {
            self.log_unmatched = false;
        }
        if let Some(bind) = &cli.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_key.trim().is_empty() {
            return Err(BusError::ConfigError(
                "service key missing (set BUS_SERVICE_KEY or --service-key)".to_string(),
            ));
        }
        if self.routes.is_empty() {
            return Err(BusError::ConfigError("no route to poll (use --route)".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(BusError::ConfigError("poll interval must be at least 1 second".to_string()));
        }
        if self.congestion_fields.is_empty() {
            return Err(BusError::ConfigError("congestion_fields must name at least one field".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            congestion_fields: self.congestion_fields.clone(),
            log_unmatched: self.log_unmatched,
        }
    }

    pub fn load_class_table(&self) -> Result<VehicleClassTable> {
        match &self.class_table {
            Some(path) => {
                let table = VehicleClassTable::load(path)?;
                if table.is_empty() {
                    warn!("⚠️  Class table {:?} has no usable rows", path);
                }
                Ok(table)
            }
            None => Ok(VehicleClassTable::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["seoul_bus_board"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn file_values_are_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "service_key": "from-file", "routes": ["114900001"], "poll_interval_secs": 20, "log_unmatched": true }}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::load(&cli(&[
            "--config",
            path.as_str(),
            "--route",
            "100100118",
            "--route",
            "100100119",
            "--quiet-unmatched",
        ]))
        .unwrap();

        assert!(!config.service_key.is_empty());
        assert_eq!(config.routes, vec!["100100118", "100100119"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(20));
        assert!(!config.log_unmatched);
        assert_eq!(config.congestion_fields, vec!["congetion", "congestion"]);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let valid = AppConfig {
            service_key: "key".into(),
            routes: vec!["114900001".into()],
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let cases = [
            AppConfig { service_key: " ".into(), ..valid.clone() },
            AppConfig { routes: vec![], ..valid.clone() },
            AppConfig { poll_interval_secs: 0, ..valid.clone() },
            AppConfig { congestion_fields: vec![], ..valid.clone() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(BusError::ConfigError(_))), "{config:?}");
        }
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(AppConfig::from_file(file.path()), Err(BusError::ConfigError(_))));
    }

    #[test]
    fn class_table_defaults_to_builtin_rule() {
        let config = AppConfig::default();

        assert_eq!(config.load_class_table().unwrap(), VehicleClassTable::builtin());
        assert_eq!(config.reconcile_options(), ReconcileOptions::default());
    }

    #[test]
    fn class_table_file_with_short_rows_still_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "route_id,vehicle_digits,class_tag\n100100118,7001\n").unwrap();
        let config = AppConfig {
            class_table: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let table = config.load_class_table().unwrap();

        assert!(table.is_empty());
    }
}
