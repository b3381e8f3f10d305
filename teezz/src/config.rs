//! Campaign configuration (spec.md §9, SPEC_FULL.md §2). Grounded on
//! `cognitod`'s `Config::load()`: parse-or-default from a TOML file, a
//! `TEEZZ_CONFIG` environment variable override, `#[serde(default =
//! "...")]` per field so a partial config file never fails to load.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "teezz.toml";
const ENV_CONFIG_PATH: &str = "TEEZZ_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from file. The path can be overridden with
    /// the `TEEZZ_CONFIG` environment variable. If the file is missing
    /// or fails to parse, defaults are returned rather than failing —
    /// CLI flags are the authoritative source for a one-off run.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

/// Which TEE ABI to speak and which recovered-format features to turn on
/// for this campaign (spec.md §6.4).
#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    #[serde(default = "default_tee")]
    pub tee: String,
    /// `-M/--modelaware`: drive candidates through the recovered
    /// `SeedTemplate`s and value-dependency graph rather than plain
    /// bit-flipping.
    #[serde(default = "default_modelaware")]
    pub modelaware: bool,
    /// `-R/--reboot`: allow the campaign to drive the device-reset
    /// escalation ladder at all. Off for a bench target with no real
    /// `DeviceController`.
    #[serde(default = "default_reboot")]
    pub reboot: bool,
    /// `-C/--coverage`: track the coverage-tuple archive under `cov/`.
    /// Disabling this still runs candidates, it just stops growing the
    /// population from new coverage (dumb replay mode).
    #[serde(default = "default_coverage")]
    pub coverage: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            tee: default_tee(),
            modelaware: default_modelaware(),
            reboot: default_reboot(),
            coverage: default_coverage(),
        }
    }
}

fn default_tee() -> String {
    "triangle".to_string()
}
fn default_modelaware() -> bool {
    true
}
fn default_reboot() -> bool {
    true
}
fn default_coverage() -> bool {
    true
}

/// Where a campaign reads seeds from and writes its queue/crashes/
/// timeouts/cov/stats.json (spec.md §6.3), and for how long it runs.
#[derive(Debug, Deserialize, Clone)]
pub struct CampaignConfig {
    #[serde(default = "default_in_dir")]
    pub in_dir: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Caps the number of candidates run this invocation, independent of
    /// `duration_secs`. `None` means unbounded (the default).
    #[serde(default)]
    pub nruns: Option<u64>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            in_dir: default_in_dir(),
            out_dir: default_out_dir(),
            duration_secs: default_duration_secs(),
            nruns: None,
            port: default_port(),
        }
    }
}

fn default_in_dir() -> PathBuf {
    PathBuf::from("in")
}
fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}
fn default_duration_secs() -> u64 {
    3600
}
fn default_port() -> u16 {
    7331
}

/// Selects the device transport the `Runner` connects over and the
/// `DeviceController` implementation the fuzz loop drives (spec.md §1,
/// §4.6): either a TCP host reachable directly, or an `adb` serial the
/// device-specific controller shells out to for reboot/root/push.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub tcp_host: Option<String>,
    #[serde(default)]
    pub adb_serial: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Human-readable per-candidate campaign event log, teezz's analogue
    /// of `cognitod`'s `alerts.ndjson`.
    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            event_log: default_event_log(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_event_log() -> PathBuf {
    PathBuf::from("event.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"[target]
tee = "optee"
modelaware = true
reboot = false
coverage = true
[campaign]
in_dir = "seeds"
out_dir = "campaign-out"
duration_secs = 7200
port = 9000
[device]
tcp_host = "10.0.0.5:7331"
[logging]
level = "debug"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.target.tee, "optee");
        assert!(!cfg.target.reboot);
        assert!(cfg.target.coverage);
        assert_eq!(cfg.campaign.in_dir, PathBuf::from("seeds"));
        assert_eq!(cfg.campaign.duration_secs, 7200);
        assert_eq!(cfg.campaign.port, 9000);
        assert_eq!(cfg.device.tcp_host.as_deref(), Some("10.0.0.5:7331"));
        assert!(cfg.device.adb_serial.is_none());
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn a_partial_config_file_falls_back_to_defaults_for_missing_fields() {
        let toml = r#"[target]
tee = "qsee"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.target.tee, "qsee");
        assert!(cfg.target.modelaware);
        assert_eq!(cfg.campaign.port, 7331);
        assert_eq!(cfg.logging.event_log, PathBuf::from("event.log"));
    }

    #[test]
    fn env_override_points_load_at_a_different_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[target]\ntee = \"optee\"").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert_eq!(cfg.target.tee, "optee");
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn a_missing_config_file_falls_back_to_defaults_rather_than_failing() {
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/teezz.toml");
        }
        let cfg = Config::load();
        assert_eq!(cfg.target.tee, "triangle");
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }
}
