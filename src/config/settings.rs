use crate::error::ConfigError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents written when no configuration file exists yet
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"[wechat]
app_id = ""
app_secret = ""
recipient_id = ""
template_id = ""
"#;

/// PowerShell watcher that prints new Application log entries as JSON lines
pub const DEFAULT_WATCH_SCRIPT: &str = r#"$ErrorActionPreference = 'SilentlyContinue'
$last = (Get-WinEvent -LogName Application -MaxEvents 1).RecordId
while ($true) {
  Start-Sleep -Seconds 2
  Get-WinEvent -LogName Application -MaxEvents 100 |
    Where-Object { $_.RecordId -gt $last } |
    Sort-Object RecordId |
    ForEach-Object {
      $last = $_.RecordId
      [pscustomobject]@{
        timestamp = $_.TimeCreated.ToUniversalTime().ToString('o')
        id = $_.Id
        logName = $_.LogName
        level = [int]$_.Level
        providerName = $_.ProviderName
        taskName = [string]$_.TaskDisplayName
        opCode = [string]$_.OpcodeDisplayName
        machineName = $_.MachineName
      } | ConvertTo-Json -Compress
    }
}"#;

/// Upper bound for any configured duration, about ten years
const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Immutable application configuration, loaded once at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Messaging provider credentials and recipient
    #[serde(default)]
    pub wechat: WeChatConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

/// The four provider settings; empty values are passed through as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeChatConfig {
    pub app_id: String,
    pub app_secret: String,
    pub recipient_id: String,
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API, without trailing endpoint path
    pub base_url: String,
    /// Timeout applied to every remote call
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.weixin.qq.com/cgi-bin".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum notifications within the retention window
    pub max_per_window: usize,
    /// Minimum spacing between two notifications
    pub min_interval_seconds: u64,
    /// Length of the sliding retention window
    pub retention_hours: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            min_interval_seconds: 60,
            retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub credential_path: PathBuf,
    pub ledger_path: PathBuf,
    /// Subtracted from the provider's token lifetime before caching
    pub token_safety_margin_seconds: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            credential_path: PathBuf::from("access_token.json"),
            ledger_path: PathBuf::from("notification_log.json"),
            token_safety_margin_seconds: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Program and arguments that print event records as JSON lines
    pub command: Vec<String>,
    /// Upper bound on events processed concurrently
    pub max_concurrent_events: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "powershell".to_string(),
                "-NoProfile".to_string(),
                "-Command".to_string(),
                DEFAULT_WATCH_SCRIPT.to_string(),
            ],
            max_concurrent_events: 8,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML and
    /// `ConfigError::ValidationError` if a tuning value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration, writing an empty template first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(
                "Configuration file {} not found, creating an empty template",
                path.display()
            );
            std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
                .map_err(|e| ConfigError::WriteError(format!("{}: {}", path.display(), e)))?;
        }
        Self::from_file(path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle.max_per_window == 0 {
            return Err(ConfigError::ValidationError(
                "throttle.max_per_window must be at least 1".to_string(),
            ));
        }
        // Bounds keep the chrono durations built from these values in range
        if self.throttle.min_interval_seconds > MAX_DURATION_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "throttle.min_interval_seconds must not exceed {}",
                MAX_DURATION_SECONDS
            )));
        }
        if self.throttle.retention_hours > MAX_DURATION_SECONDS / 3600 {
            return Err(ConfigError::ValidationError(format!(
                "throttle.retention_hours must not exceed {}",
                MAX_DURATION_SECONDS / 3600
            )));
        }
        if self.state.token_safety_margin_seconds > MAX_DURATION_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "state.token_safety_margin_seconds must not exceed {}",
                MAX_DURATION_SECONDS
            )));
        }
        if self.source.max_concurrent_events == 0 {
            return Err(ConfigError::ValidationError(
                "source.max_concurrent_events must be at least 1".to_string(),
            ));
        }
        if self.source.command.is_empty() {
            return Err(ConfigError::ValidationError(
                "source.command must name a program".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
