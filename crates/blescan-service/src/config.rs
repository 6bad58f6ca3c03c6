//! Daemon configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use blescan_core::{BeaconConfig, CountingConfig};
use blescan_types::Location;

use crate::mesh::Role;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Board identity and scan settings.
    pub device: DeviceConfig,
    /// Presence counting.
    pub counting: CountingSection,
    /// Beacon stay detection.
    pub beacon: BeaconSection,
    /// Named storage locations referenced by `counting.storage` and `beacon.storage`.
    pub storage_paths: BTreeMap<String, PathBuf>,
    /// HTTP backend.
    pub http: HttpConfig,
    /// Mesh radio relay.
    pub mesh: MeshConfig,
    /// Status LEDs.
    pub led: LedConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(default_config_path())
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// This checks:
    /// - The device id is set
    /// - Counting thresholds, window length and static ratio are usable
    /// - The beacon threshold fits the beacon window
    /// - Every referenced storage name has a path
    /// - HTTP delivery has a URL, mesh delivery has targets
    /// - At least one sink receives data
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.device.id.is_none() {
            errors.push(ValidationError::new("device.id", "device id is required"));
        }
        if self.device.latitude.is_some() != self.device.longitude.is_some() {
            errors.push(ValidationError::new(
                "device.latitude",
                "latitude and longitude must be set together",
            ));
        }
        if !(self.device.scan_time > 0.0) {
            errors.push(ValidationError::new(
                "device.scan_time",
                format!("scan time {} must be positive", self.device.scan_time),
            ));
        }

        errors.extend(self.counting.validate());
        errors.extend(self.beacon.validate());

        for (section, names) in [
            ("counting.storage", &self.counting.storage),
            ("beacon.storage", &self.beacon.storage),
        ] {
            for name in names {
                if !self.storage_paths.contains_key(name) {
                    errors.push(ValidationError::new(
                        section,
                        format!("storage '{}' has no entry in [storage_paths]", name),
                    ));
                }
            }
        }

        if self.counting.http && self.http.url.as_deref().is_none_or(str::is_empty) {
            errors.push(ValidationError::new(
                "http.url",
                "counting.http is enabled but no url is set",
            ));
        }
        errors.extend(self.http.validate());
        errors.extend(self.mesh.validate());
        if self.mesh.enabled
            && self.mesh.is_receiver()
            && self.http.url.as_deref().is_none_or(str::is_empty)
        {
            errors.push(ValidationError::new(
                "http.url",
                format!(
                    "node '{}' is a mesh target and must forward to http, but no url is set",
                    self.mesh.node_id
                ),
            ));
        }

        if self.counting.storage.is_empty()
            && self.beacon.storage.is_empty()
            && !self.counting.http
            && !self.mesh.enabled
        {
            errors.push(ValidationError::new(
                "counting.storage",
                "no sink configured: counting and beacon data would be discarded",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Board location, when both coordinates are configured.
    pub fn location(&self) -> Option<Location> {
        match (self.device.latitude, self.device.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Settings for the counting engine.
    pub fn counting_config(&self) -> CountingConfig {
        CountingConfig {
            device_id: self.device.id.unwrap_or_default(),
            rssi_threshold: self.counting.rssi_threshold,
            close_threshold: self.counting.close_threshold(),
            delta: self.counting.delta,
            static_ratio: self.counting.static_ratio,
            location: self.location(),
        }
    }

    /// Settings for the beacon engine.
    pub fn beacon_config(&self) -> BeaconConfig {
        BeaconConfig {
            device_id: self.device.id.unwrap_or_default(),
            target_id: self.beacon.target_id.to_lowercase(),
            scans: self.beacon.scans,
            threshold: self.beacon.threshold,
            shutdown_id: self
                .beacon
                .shutdown_id
                .as_ref()
                .filter(|id| !id.is_empty())
                .map(|id| id.to_lowercase()),
            location: self.location(),
        }
    }

    /// Resolve a list of storage names to directories.
    pub fn storage_dirs(&self, names: &[String]) -> Vec<(String, PathBuf)> {
        names
            .iter()
            .filter_map(|name| {
                self.storage_paths
                    .get(name)
                    .map(|path| (name.clone(), path.clone()))
            })
            .collect()
    }
}

/// Board identity and scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Board identifier stamped on every record.
    pub id: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Drive the status LEDs.
    pub led: bool,
    /// Target duration of one scan cycle in seconds.
    pub scan_time: f64,
    /// Directory for small state files (scan time calibration).
    pub state_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: None,
            latitude: None,
            longitude: None,
            led: false,
            scan_time: 1.0,
            state_dir: blescan_store::default_data_dir(),
        }
    }
}

/// `[counting]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingSection {
    pub rssi_threshold: i16,
    /// Defaults to `rssi_threshold` when omitted.
    pub rssi_close_threshold: Option<i16>,
    /// Window length in seconds.
    pub delta: u32,
    pub static_ratio: f64,
    /// Storage names receiving summary and rssi rows.
    pub storage: Vec<String>,
    /// Send summaries to the HTTP backend.
    pub http: bool,
}

impl Default for CountingSection {
    fn default() -> Self {
        Self {
            rssi_threshold: -100,
            rssi_close_threshold: None,
            delta: 10,
            static_ratio: 0.7,
            storage: Vec::new(),
            http: false,
        }
    }
}

impl CountingSection {
    pub fn close_threshold(&self) -> i16 {
        self.rssi_close_threshold.unwrap_or(self.rssi_threshold)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.close_threshold() < self.rssi_threshold {
            errors.push(ValidationError::new(
                "counting.rssi_close_threshold",
                format!(
                    "close threshold {} is below rssi threshold {}",
                    self.close_threshold(),
                    self.rssi_threshold
                ),
            ));
        }
        if self.delta == 0 || 86_400 % self.delta != 0 {
            errors.push(ValidationError::new(
                "counting.delta",
                format!("delta {} must be at least 1 and divide 86400", self.delta),
            ));
        }
        if !(self.static_ratio > 0.0 && self.static_ratio <= 1.0) {
            errors.push(ValidationError::new(
                "counting.static_ratio",
                format!("static ratio {} must be in (0, 1]", self.static_ratio),
            ));
        }

        errors
    }
}

/// `[beacon]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconSection {
    /// Proximity UUID of the tracked beacons, 32 hex digits.
    pub target_id: String,
    /// Beacon window in scans.
    pub scans: usize,
    pub threshold: usize,
    /// Storage names receiving stay_time and beacon rows.
    pub storage: Vec<String>,
    /// Major+minor of the tag that shuts the board down.
    pub shutdown_id: Option<String>,
}

impl Default for BeaconSection {
    fn default() -> Self {
        Self {
            target_id: String::new(),
            scans: 8,
            threshold: 3,
            storage: Vec::new(),
            shutdown_id: None,
        }
    }
}

impl BeaconSection {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.scans == 0 {
            errors.push(ValidationError::new(
                "beacon.scans",
                "beacon window must hold at least one scan",
            ));
        }
        if self.threshold == 0 || self.threshold > self.scans {
            errors.push(ValidationError::new(
                "beacon.threshold",
                format!("threshold {} must be in 1..={}", self.threshold, self.scans),
            ));
        }
        if !self.storage.is_empty() && self.target_id.is_empty() {
            errors.push(ValidationError::new(
                "beacon.target_id",
                "beacon storage is configured but target_id is empty",
            ));
        }

        errors
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Endpoint receiving summary records by POST; probed with GET.
    pub url: Option<String>,
    pub queue_capacity: usize,
    /// Queue depth above which the stacking flag is raised.
    pub stacking_threshold: usize,
    pub request_timeout_secs: u64,
    pub retry_interval_secs: u64,
    /// Per-message budget while draining on shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: None,
            queue_capacity: 1000,
            stacking_threshold: 10,
            request_timeout_secs: 5,
            retry_interval_secs: 5,
            drain_timeout_secs: 2,
        }
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(url) = &self.url
            && !url.is_empty()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            errors.push(ValidationError::new(
                "http.url",
                format!("invalid url '{}': must start with http:// or https://", url),
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "http.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        for (field, secs) in [
            ("http.request_timeout_secs", self.request_timeout_secs),
            ("http.retry_interval_secs", self.retry_interval_secs),
            ("http.drain_timeout_secs", self.drain_timeout_secs),
        ] {
            errors.extend(at_least_one_second(field, secs));
        }

        errors
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn at_least_one_second(field: &str, secs: u64) -> Option<ValidationError> {
    (secs == 0).then(|| ValidationError::new(field, "must be at least 1 second"))
}

/// `[mesh]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub enabled: bool,
    /// Serial device of the radio.
    pub port: String,
    pub baud_rate: u32,
    pub pan_id: u64,
    pub is_coordinator: bool,
    /// Node identifier of this board on the mesh.
    pub node_id: String,
    /// Internet-capable nodes. A board listed here acts as receiver.
    pub targets: Vec<String>,
    pub discovery_timeout_secs: u64,
    pub rediscover_interval_secs: u64,
    pub crash_cooldown_secs: u64,
    pub retry_interval_secs: u64,
    pub drain_timeout_secs: u64,
    pub queue_capacity: usize,
    pub stacking_threshold: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            pan_id: 1,
            is_coordinator: false,
            node_id: String::new(),
            targets: Vec::new(),
            discovery_timeout_secs: 10,
            rediscover_interval_secs: 60,
            crash_cooldown_secs: 30,
            retry_interval_secs: 2,
            drain_timeout_secs: 5,
            queue_capacity: 100,
            stacking_threshold: 10,
        }
    }
}

impl MeshConfig {
    /// Role of this board on the mesh.
    pub fn role(&self) -> Role {
        Role::for_node(&self.node_id, &self.targets)
    }

    /// Whether this board is one of the internet-capable targets.
    pub fn is_receiver(&self) -> bool {
        self.role() == Role::Receiver
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if self.targets.is_empty() {
            errors.push(ValidationError::new(
                "mesh.targets",
                "mesh is enabled but no target nodes are set",
            ));
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            errors.push(ValidationError::new(
                "mesh.targets",
                "target node ids cannot be empty",
            ));
        }
        if self.port.is_empty() {
            errors.push(ValidationError::new("mesh.port", "serial port cannot be empty"));
        }
        if self.baud_rate == 0 {
            errors.push(ValidationError::new("mesh.baud_rate", "baud rate cannot be 0"));
        }
        if self.node_id.len() > 20 {
            errors.push(ValidationError::new(
                "mesh.node_id",
                format!("node id '{}' is longer than 20 characters", self.node_id),
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "mesh.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        for (field, secs) in [
            ("mesh.discovery_timeout_secs", self.discovery_timeout_secs),
            ("mesh.rediscover_interval_secs", self.rediscover_interval_secs),
            ("mesh.crash_cooldown_secs", self.crash_cooldown_secs),
            ("mesh.retry_interval_secs", self.retry_interval_secs),
            ("mesh.drain_timeout_secs", self.drain_timeout_secs),
        ] {
            errors.extend(at_least_one_second(field, secs));
        }

        errors
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn rediscover_interval(&self) -> Duration {
        Duration::from_secs(self.rediscover_interval_secs)
    }

    pub fn crash_cooldown(&self) -> Duration {
        Duration::from_secs(self.crash_cooldown_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// `[led]` section: sysfs names under `/sys/class/leds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub green: String,
    pub red: String,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            green: "led0".to_string(),
            red: "led1".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `counting.delta` or `mesh.targets`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blescan")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.device.id = Some(7);
        config
            .storage_paths
            .insert("sd".to_string(), PathBuf::from("/data"));
        config.counting.storage = vec!["sd".to_string()];
        config
    }

    fn fields(result: Result<(), ConfigError>) -> Vec<String> {
        match result {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.counting.rssi_threshold, -100);
        assert_eq!(config.counting.close_threshold(), -100);
        assert_eq!(config.counting.delta, 10);
        assert_eq!(config.beacon.scans, 8);
        assert_eq!(config.beacon.threshold, 3);
        assert_eq!(config.mesh.baud_rate, 9600);
        assert_eq!(config.http.queue_capacity, 1000);
        assert_eq!(config.led.green, "led0");
    }

    #[test]
    fn test_minimal_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_default_config_reports_every_problem() {
        let errors = fields(Config::default().validate());
        assert!(errors.contains(&"device.id".to_string()));
        assert!(errors.contains(&"counting.storage".to_string()));
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            [device]
            id = 12
            latitude = 35.68
            longitude = 139.76
            led = true

            [counting]
            rssi_threshold = -95
            rssi_close_threshold = -70
            delta = 30
            static_ratio = 0.5
            storage = ["sd", "usb"]
            http = true

            [beacon]
            target_id = "F7826DA64FA24E988024BC5B71E0893E"
            scans = 10
            threshold = 4
            storage = ["sd"]
            shutdown_id = "FFFF0001"

            [storage_paths]
            sd = "/home/pi/data"
            usb = "/media/usb"

            [http]
            url = "https://example.org/api/count"

            [mesh]
            enabled = true
            node_id = "42_C"
            targets = ["GW1", "GW2"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.location().unwrap().latitude, 35.68);
        assert_eq!(config.counting_config().close_threshold, -70);
        assert_eq!(config.counting_config().device_id, 12);

        let beacon = config.beacon_config();
        assert_eq!(beacon.target_id, "f7826da64fa24e988024bc5b71e0893e");
        assert_eq!(beacon.shutdown_id.as_deref(), Some("ffff0001"));

        let dirs = config.storage_dirs(&config.counting.storage);
        assert_eq!(dirs[1].1, PathBuf::from("/media/usb"));
        assert_eq!(config.mesh.targets.len(), 2);
    }

    #[test]
    fn test_threshold_order() {
        let mut config = valid_config();
        config.counting.rssi_close_threshold = Some(-110);
        assert_eq!(
            fields(config.validate()),
            vec!["counting.rssi_close_threshold"]
        );
    }

    #[test]
    fn test_delta_must_divide_day() {
        let mut config = valid_config();
        config.counting.delta = 7;
        assert_eq!(fields(config.validate()), vec!["counting.delta"]);
        config.counting.delta = 0;
        assert_eq!(fields(config.validate()), vec!["counting.delta"]);
    }

    #[test]
    fn test_beacon_threshold_bounds() {
        let mut config = valid_config();
        config.beacon.threshold = 9;
        assert_eq!(fields(config.validate()), vec!["beacon.threshold"]);
    }

    #[test]
    fn test_unknown_storage_name() {
        let mut config = valid_config();
        config.beacon.storage = vec!["usb".to_string()];
        config.beacon.target_id = "abc".to_string();
        assert_eq!(fields(config.validate()), vec!["beacon.storage"]);
    }

    #[test]
    fn test_http_requires_url() {
        let mut config = valid_config();
        config.counting.http = true;
        assert_eq!(fields(config.validate()), vec!["http.url"]);

        config.http.url = Some("ftp://example.org".to_string());
        assert_eq!(fields(config.validate()), vec!["http.url"]);
    }

    #[test]
    fn test_mesh_requires_targets() {
        let mut config = valid_config();
        config.mesh.enabled = true;
        assert_eq!(fields(config.validate()), vec!["mesh.targets"]);
    }

    #[test]
    fn test_mesh_rejects_blank_target() {
        let mut config = valid_config();
        config.mesh.enabled = true;
        config.mesh.targets = vec!["GW".to_string(), " ".to_string()];
        assert_eq!(fields(config.validate()), vec!["mesh.targets"]);

        // a board without a node id is never the blank target
        config.mesh.targets = vec![String::new()];
        assert!(!config.mesh.is_receiver());
        assert_eq!(config.mesh.role(), Role::Sender);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = valid_config();
        config.http.url = Some("http://backend.local/api".to_string());
        config.http.request_timeout_secs = 0;
        config.http.retry_interval_secs = 0;
        config.http.drain_timeout_secs = 0;
        assert_eq!(
            fields(config.validate()),
            vec![
                "http.request_timeout_secs",
                "http.retry_interval_secs",
                "http.drain_timeout_secs",
            ]
        );

        let mut config = valid_config();
        config.mesh.enabled = true;
        config.mesh.targets = vec!["GW".to_string()];
        config.mesh.discovery_timeout_secs = 0;
        config.mesh.crash_cooldown_secs = 0;
        assert_eq!(
            fields(config.validate()),
            vec!["mesh.discovery_timeout_secs", "mesh.crash_cooldown_secs"]
        );
    }

    #[test]
    fn test_mesh_alone_is_a_sink() {
        let mut config = Config::default();
        config.device.id = Some(1);
        config.mesh.enabled = true;
        config.mesh.targets = vec!["GW".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mesh_receiver_requires_url() {
        let mut config = valid_config();
        config.mesh.enabled = true;
        config.mesh.node_id = "GW".to_string();
        config.mesh.targets = vec!["GW".to_string(), "GW2".to_string()];
        assert!(config.mesh.is_receiver());
        assert_eq!(fields(config.validate()), vec!["http.url"]);

        config.http.url = Some("http://backend.local/api".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/config.toml");
        let config = valid_config();
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert_eq!(loaded.device.id, Some(7));
        assert_eq!(loaded.counting.storage, vec!["sd".to_string()]);
    }

    #[test]
    fn test_load_errors() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("invalid.toml");
        std::fs::write(&path, "this is not valid { toml").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_error_display() {
        let mut config = valid_config();
        config.counting.static_ratio = 1.5;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("counting.static_ratio"));
        assert!(message.contains("(0, 1]"));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("blescan/config.toml"));
    }
}
