//! Configuration management for honeybot using the prefer crate.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::capability::CapabilityConfig;
use crate::classify::heuristics::ScoringConfig;
use crate::live::LiveConfig;
use crate::reports::ReportConfig;

/// Default lookback for reports, in days.
pub const DEFAULT_REPORT_DAYS: u32 = 7;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Known-bot registry file (one substring per line).
    pub registry_path: PathBuf,
    /// Log file used while the dashboard owns the terminal.
    pub log_filename: String,
    /// Default report lookback in days.
    pub report_days: u32,
    pub scoring: ScoringConfig,
    pub capability: CapabilityConfig,
    pub reports: ReportConfig,
    pub live: LiveConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/.local/share/honeybot/ for state
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("honeybot");

        Self {
            registry_path: data_dir.join("bots.txt"),
            data_dir,
            database_filename: "honeybot.db".to_string(),
            log_filename: "honeybot.log".to_string(),
            report_days: DEFAULT_REPORT_DAYS,
            scoring: ScoringConfig::default(),
            capability: CapabilityConfig::default(),
            reports: ReportConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl Settings {
    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Get the full path to the dashboard-mode log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_filename)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Known-bot registry path.
    #[serde(default)]
    pub registry: Option<String>,
    /// Default report lookback in days.
    #[serde(default)]
    pub report_days: Option<u32>,
    /// Heuristic weights for unknown-agent scoring.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Capability detector path patterns and noise filter.
    #[serde(default)]
    pub capability: CapabilityConfig,
    /// Report filters.
    #[serde(default)]
    pub reports: ReportConfig,
    /// Live pipeline, dashboard and narration.
    #[serde(default)]
    pub live: LiveConfig,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers honeybot config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("honeybot").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").await.ok();
                let database: Option<String> = pref_config.get("database").await.ok();
                let registry: Option<String> = pref_config.get("registry").await.ok();
                let report_days: Option<u32> = pref_config.get("report_days").await.ok();
                let scoring: ScoringConfig = pref_config.get("scoring").await.unwrap_or_default();
                let capability: CapabilityConfig =
                    pref_config.get("capability").await.unwrap_or_default();
                let reports: ReportConfig = pref_config.get("reports").await.unwrap_or_default();
                let live: LiveConfig = pref_config.get("live").await.unwrap_or_default();

                Config {
                    target,
                    database,
                    registry,
                    report_days,
                    scoring,
                    capability,
                    reports,
                    live,
                }
            }
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
            settings.registry_path = settings.data_dir.join("bots.txt");
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref registry) = self.registry {
            let path = shellexpand::tilde(registry);
            settings.registry_path = PathBuf::from(path.as_ref());
        }
        if let Some(days) = self.report_days {
            settings.report_days = days;
        }
        settings.scoring = self.scoring.clone();
        settings.capability = self.capability.clone();
        settings.reports = self.reports.clone();
        settings.live = self.live.clone();
    }
}

/// Load settings from configuration (async version).
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_overrides_paths_and_days() {
        let config = Config {
            target: Some("/srv/honeybot".to_string()),
            database: Some("traffic.db".to_string()),
            report_days: Some(30),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.database_path(), PathBuf::from("/srv/honeybot/traffic.db"));
        assert_eq!(settings.registry_path, PathBuf::from("/srv/honeybot/bots.txt"));
        assert_eq!(settings.report_days, 30);
    }

    #[test]
    fn explicit_registry_wins_over_target() {
        let config = Config {
            target: Some("/srv/honeybot".to_string()),
            registry: Some("/etc/honeybot/bots.txt".to_string()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.registry_path, PathBuf::from("/etc/honeybot/bots.txt"));
    }

    #[test]
    fn sections_deserialize_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"scoring": {"volume_threshold": 500}}"#)
            .unwrap();
        assert_eq!(config.scoring.volume_threshold, 500);
        assert_eq!(config.scoring.keyword_points, ScoringConfig::default().keyword_points);
        assert_eq!(config.live.heartbeat_secs, LiveConfig::default().heartbeat_secs);
    }
}
