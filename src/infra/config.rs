//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::{bail, Context};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "cd-sp", "expedicao")
    #[serde(default = "default_site_id")]
    pub id: String,
    /// IANA timezone used for wall-clock hours and calendar dates
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id(), timezone: default_timezone() }
    }
}

fn default_site_id() -> String {
    "expedicao".to_string()
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationsConfig {
    /// Debounce before a typed station code commits on its own
    #[serde(default = "default_auto_commit_delay_ms")]
    pub auto_commit_delay_ms: u64,
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self { auto_commit_delay_ms: default_auto_commit_delay_ms() }
    }
}

fn default_auto_commit_delay_ms() -> u64 {
    400
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatingHoursConfig {
    /// Hour of the first bucket ("07:00 às 08:00" for 7)
    #[serde(default = "default_first_hour")]
    pub first_hour: u32,
    /// Exclusive end hour of the last bucket
    #[serde(default = "default_last_hour")]
    pub last_hour: u32,
}

impl Default for OperatingHoursConfig {
    fn default() -> Self {
        Self { first_hour: default_first_hour(), last_hour: default_last_hour() }
    }
}

fn default_first_hour() -> u32 {
    7
}

fn default_last_hour() -> u32 {
    19
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaceConfig {
    #[serde(default = "default_pace_window_minutes")]
    pub window_minutes: u32,
    /// How often expired pace entries are pruned
    #[serde(default = "default_pace_prune_secs")]
    pub prune_interval_secs: u64,
}

impl Default for PaceConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_pace_window_minutes(),
            prune_interval_secs: default_pace_prune_secs(),
        }
    }
}

fn default_pace_window_minutes() -> u32 {
    60
}

fn default_pace_prune_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalendarConfig {
    /// Non-working dates skipped when computing the next business day
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Append-only registration log (JSONL)
    #[serde(default = "default_registrations_file")]
    pub registrations_file: String,
    #[serde(default = "default_day_state_file")]
    pub day_state_file: String,
    #[serde(default = "default_goals_file")]
    pub goals_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            registrations_file: default_registrations_file(),
            day_state_file: default_day_state_file(),
            goals_file: default_goals_file(),
        }
    }
}

fn default_registrations_file() -> String {
    "data/registrations.jsonl".to_string()
}

fn default_day_state_file() -> String {
    "data/day_state.json".to_string()
}

fn default_goals_file() -> String {
    "data/goals.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkstationConfig {
    /// Enable the workstation TCP line listener
    #[serde(default = "default_workstation_enabled")]
    pub listener_enabled: bool,
    #[serde(default = "default_workstation_port")]
    pub listener_port: u16,
}

impl Default for WorkstationConfig {
    fn default() -> Self {
        Self {
            listener_enabled: default_workstation_enabled(),
            listener_port: default_workstation_port(),
        }
    }
}

fn default_workstation_enabled() -> bool {
    true
}

fn default_workstation_port() -> u16 {
    25900
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), username: None, password: None }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing of live events
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for NewPackage events (QoS 0)
    #[serde(default = "default_packages_topic")]
    pub packages_topic: String,
    /// Topic for DayClosed events (QoS 0)
    #[serde(default = "default_day_topic")]
    pub day_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            packages_topic: default_packages_topic(),
            day_topic: default_day_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_packages_topic() -> String {
    "expedicao/packages".to_string()
}

fn default_day_topic() -> String {
    "expedicao/day".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_mqtt_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Broadcast buffer; lagging subscribers lose the oldest events
    #[serde(default = "default_live_capacity")]
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { channel_capacity: default_live_capacity() }
    }
}

fn default_live_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub operating_hours: OperatingHoursConfig,
    #[serde(default)]
    pub pace: PaceConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workstation: WorkstationConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    timezone: Tz,
    http_port: u16,
    auto_commit_delay_ms: u64,
    first_hour: u32,
    last_hour: u32,
    pace_window_minutes: u32,
    pace_prune_interval_secs: u64,
    holidays: Vec<NaiveDate>,
    registrations_file: String,
    day_state_file: String,
    goals_file: String,
    workstation_enabled: bool,
    workstation_port: u16,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_packages_topic: String,
    mqtt_egress_day_topic: String,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    live_channel_capacity: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::build(TomlConfig::default(), chrono_tz::America::Sao_Paulo, "default".to_string())
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, path.display().to_string())
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> anyhow::Result<Self> {
        let timezone: Tz = toml_config
            .site
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", toml_config.site.timezone))?;

        let hours = &toml_config.operating_hours;
        if hours.first_hour >= hours.last_hour || hours.last_hour > 24 {
            bail!(
                "invalid operating hours {}..{}: first_hour must be below last_hour (max 24)",
                hours.first_hour,
                hours.last_hour
            );
        }
        if toml_config.pace.window_minutes == 0 {
            bail!("pace.window_minutes must be positive");
        }

        Ok(Self::build(toml_config, timezone, config_file))
    }

    fn build(toml_config: TomlConfig, timezone: Tz, config_file: String) -> Self {
        let hours = &toml_config.operating_hours;
        Self {
            site_id: toml_config.site.id,
            timezone,
            http_port: toml_config.http.port,
            auto_commit_delay_ms: toml_config.stations.auto_commit_delay_ms,
            first_hour: hours.first_hour,
            last_hour: hours.last_hour,
            pace_window_minutes: toml_config.pace.window_minutes,
            pace_prune_interval_secs: toml_config.pace.prune_interval_secs,
            holidays: toml_config.calendar.holidays,
            registrations_file: toml_config.storage.registrations_file,
            day_state_file: toml_config.storage.day_state_file,
            goals_file: toml_config.storage.goals_file,
            workstation_enabled: toml_config.workstation.listener_enabled,
            workstation_port: toml_config.workstation.listener_port,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_packages_topic: toml_config.mqtt_egress.packages_topic,
            mqtt_egress_day_topic: toml_config.mqtt_egress.day_topic,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            live_channel_capacity: toml_config.live.channel_capacity.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Load configuration from the path selected by args or environment
    pub fn load(args: &[String]) -> anyhow::Result<Self> {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit path
    ///
    /// Only a missing file falls back to defaults. A file that exists but
    /// cannot be read, parsed or validated is an error: defaults would point
    /// storage at a different registration log.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            eprintln!("Warning: config file {path} not found. Using defaults.");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn auto_commit_delay_ms(&self) -> u64 {
        self.auto_commit_delay_ms
    }

    pub fn first_hour(&self) -> u32 {
        self.first_hour
    }

    pub fn last_hour(&self) -> u32 {
        self.last_hour
    }

    pub fn pace_window_minutes(&self) -> u32 {
        self.pace_window_minutes
    }

    pub fn pace_prune_interval_secs(&self) -> u64 {
        self.pace_prune_interval_secs
    }

    pub fn holidays(&self) -> &[NaiveDate] {
        &self.holidays
    }

    pub fn registrations_file(&self) -> &str {
        &self.registrations_file
    }

    pub fn day_state_file(&self) -> &str {
        &self.day_state_file
    }

    pub fn goals_file(&self) -> &str {
        &self.goals_file
    }

    pub fn workstation_enabled(&self) -> bool {
        self.workstation_enabled
    }

    pub fn workstation_port(&self) -> u16 {
        self.workstation_port
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_packages_topic(&self) -> &str {
        &self.mqtt_egress_packages_topic
    }

    pub fn mqtt_egress_day_topic(&self) -> &str {
        &self.mqtt_egress_day_topic
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn live_channel_capacity(&self) -> usize {
        self.live_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests and embedders to set the holiday list
    pub fn with_holidays(mut self, holidays: Vec<NaiveDate>) -> Self {
        self.holidays = holidays;
        self
    }

    /// Builder method for tests and embedders to set the pace window
    pub fn with_pace_window_minutes(mut self, minutes: u32) -> Self {
        self.pace_window_minutes = minutes.max(1);
        self
    }

    /// Builder method for tests and embedders to point storage at a directory
    pub fn with_storage_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        let dir = dir.as_ref();
        self.registrations_file = dir.join("registrations.jsonl").display().to_string();
        self.day_state_file = dir.join("day_state.json").display().to_string();
        self.goals_file = dir.join("goals.json").display().to_string();
        self
    }

    #[cfg(test)]
    pub fn with_auto_commit_delay_ms(mut self, ms: u64) -> Self {
        self.auto_commit_delay_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "expedicao");
        assert_eq!(config.timezone(), chrono_tz::America::Sao_Paulo);
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.auto_commit_delay_ms(), 400);
        assert_eq!(config.first_hour(), 7);
        assert_eq!(config.last_hour(), 19);
        assert_eq!(config.pace_window_minutes(), 60);
        assert_eq!(config.registrations_file(), "data/registrations.jsonl");
        assert_eq!(config.mqtt_egress_packages_topic(), "expedicao/packages");
        assert!(config.holidays().is_empty());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["expedicao".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["expedicao".to_string(), "--config".to_string(), "config/cd-sp.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/cd-sp.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["expedicao".to_string(), "--config=config/cd-rj.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/cd-rj.toml");
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let toml_config: TomlConfig =
            toml::from_str("[site]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        assert!(Config::from_toml(toml_config, "inline".to_string()).is_err());
    }

    #[test]
    fn test_invalid_operating_hours_rejected() {
        let toml_config: TomlConfig =
            toml::from_str("[operating_hours]\nfirst_hour = 19\nlast_hour = 7\n").unwrap();
        assert!(Config::from_toml(toml_config, "inline".to_string()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/expedicao.toml").unwrap();
        assert_eq!(config.config_file(), "default");
        assert_eq!(config.registrations_file(), "data/registrations.jsonl");
    }

    #[test]
    fn test_invalid_file_is_an_error_not_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cd-sp.toml");
        fs::write(
            &path,
            "[site]\ntimezone = \"America/Sao_Paul\"\n\n[storage]\nregistrations_file = \"/srv/expedicao/registrations.jsonl\"\n",
        )
        .unwrap();

        let err = Config::load_from_path(path.to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid timezone"));

        fs::write(&path, "[storage\nregistrations_file = 1\n").unwrap();
        assert!(Config::load_from_path(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_with_storage_dir() {
        let config = Config::default().with_storage_dir("/tmp/exp");
        assert_eq!(config.registrations_file(), "/tmp/exp/registrations.jsonl");
        assert_eq!(config.day_state_file(), "/tmp/exp/day_state.json");
        assert_eq!(config.goals_file(), "/tmp/exp/goals.json");
    }
}
