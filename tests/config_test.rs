//! Integration tests for configuration loading

use chrono::NaiveDate;
use expedicao::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "cd-sp"
timezone = "America/Manaus"

[http]
port = 9090

[stations]
auto_commit_delay_ms = 250

[operating_hours]
first_hour = 6
last_hour = 22

[pace]
window_minutes = 30

[calendar]
holidays = ["2026-11-02", "2026-11-20"]

[storage]
registrations_file = "/var/lib/expedicao/registrations.jsonl"

[workstation]
listener_enabled = false
listener_port = 26000

[mqtt]
host = "test-host"
port = 1884

[mqtt_egress]
packages_topic = "cd-sp/packages"

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "cd-sp");
    assert_eq!(config.timezone(), chrono_tz::America::Manaus);
    assert_eq!(config.http_port(), 9090);
    assert_eq!(config.auto_commit_delay_ms(), 250);
    assert_eq!(config.first_hour(), 6);
    assert_eq!(config.last_hour(), 22);
    assert_eq!(config.pace_window_minutes(), 30);
    assert_eq!(
        config.holidays(),
        &[NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(), NaiveDate::from_ymd_opt(2026, 11, 20).unwrap()]
    );
    assert_eq!(config.registrations_file(), "/var/lib/expedicao/registrations.jsonl");
    // Unset storage keys keep their defaults
    assert_eq!(config.goals_file(), "data/goals.json");
    assert!(!config.workstation_enabled());
    assert_eq!(config.workstation_port(), 26000);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_egress_packages_topic(), "cd-sp/packages");
    assert_eq!(config.mqtt_egress_day_topic(), "expedicao/day");
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_invalid_pace_window_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[pace]\nwindow_minutes = 0\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.http_port(), 8080);
    assert_eq!(config.timezone(), chrono_tz::America::Sao_Paulo);
}

#[test]
fn test_invalid_config_never_falls_back_to_default_storage() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            b"[site]\ntimezone = \"America/Sao_Paul\"\n\n[storage]\nregistrations_file = \"/srv/expedicao/registrations.jsonl\"\n",
        )
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::load_from_path(temp_file.path().to_str().unwrap()).is_err());
}
