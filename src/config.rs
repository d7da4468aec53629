//! Daemon configuration.
//!
//! Static timing constants, default file locations, and the parser for the
//! GNSS configuration file (`/etc/gps.conf`), which lists almanac (XTRA)
//! servers and fallback time servers as flat `KEY=value` lines.

use ini::{Ini, ParseOption};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineKind;
use crate::error::ConfigError;

/// Quit after this long without any consumer.
pub const QUIT_IDLE_TIME: Duration = Duration::from_secs(30);
/// Status falls back to Acquiring when no fix arrives for this long.
pub const FIX_TIMEOUT: Duration = Duration::from_secs(300);
/// Lower bound for the engine fix interval in milliseconds.
pub const MINIMUM_INTERVAL_MS: u32 = 1000;
pub const PREFERRED_ACCURACY_M: u32 = 0;
pub const PREFERRED_INITIAL_FIX_TIME_MS: u32 = 0;
/// Interval between NTP server attempts.
pub const NTP_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const NTP_PORT: u16 = 123;
/// How often the location settings file is checked for changes.
pub const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// `XTRA_SERVER_1` .. `XTRA_SERVER_3`.
pub const MAX_XTRA_SERVERS: usize = 3;

pub const DEFAULT_LOCATION_SETTINGS: &str = "/etc/location/location.conf";
pub const DEFAULT_GPS_CONF: &str = "/etc/gps.conf";
pub const DEFAULT_SOCKET_PATH: &str = "~/.local/share/hybris-location/provider.sock";
pub const DEFAULT_PID_PATH: &str = "~/.local/share/hybris-location/provider.pid";

/// Parse options for the Qt/Android style config files this daemon reads.
///
/// Escape processing stays off so `gps\enabled` keeps its backslash.
pub fn parse_options() -> ParseOption {
    ParseOption {
        enabled_escape: false,
        ..ParseOption::default()
    }
}

/// Load an INI-style file, mapping errors to [`ConfigError`].
pub fn load_ini(path: &Path) -> Result<Ini, ConfigError> {
    Ini::load_from_file_opt(path, parse_options()).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Interpret the boolean spellings found in settings files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Values read from the GNSS configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsConf {
    /// Almanac servers in priority order.
    pub xtra_servers: Vec<String>,
    pub xtra_user_agent: Option<String>,
    /// Re-download almanac data whenever the network comes online while running.
    pub force_xtra_inject: bool,
    /// Time servers used when the default route advertises none.
    pub ntp_servers: Vec<String>,
}

impl GpsConf {
    /// Read the GNSS configuration file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = load_ini(path)?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut conf = Self::default();
        let section = ini.general_section();

        for n in 1..=MAX_XTRA_SERVERS {
            if let Some(url) = section.get(format!("XTRA_SERVER_{}", n).as_str()) {
                let url = url.trim();
                if !url.is_empty() {
                    conf.xtra_servers.push(url.to_string());
                }
            }
        }

        if let Some(agent) = section.get("XTRA_USER_AGENT") {
            let agent = agent.trim();
            if !agent.is_empty() {
                conf.xtra_user_agent = Some(agent.to_string());
            }
        }

        if let Some(v) = section.get("XTRA_FORCE_INJECT") {
            conf.force_xtra_inject = parse_bool(v).ok_or_else(|| ConfigError::InvalidValue {
                key: "XTRA_FORCE_INJECT".to_string(),
                value: v.to_string(),
                reason: "expected a boolean".to_string(),
            })?;
        }

        if let Some(servers) = section.get("NTP_SERVER") {
            conf.ntp_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(conf)
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub location_settings_path: PathBuf,
    pub gps_conf_path: PathBuf,
    pub engine: EngineKind,
    pub gps: GpsConf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: expand_tilde(DEFAULT_SOCKET_PATH),
            pid_path: expand_tilde(DEFAULT_PID_PATH),
            location_settings_path: PathBuf::from(DEFAULT_LOCATION_SETTINGS),
            gps_conf_path: PathBuf::from(DEFAULT_GPS_CONF),
            engine: EngineKind::Auto,
            gps: GpsConf::default(),
        }
    }
}

impl Config {
    /// Fill in `gps` from `gps_conf_path`.
    pub fn load_gps_conf(mut self) -> Result<Self, ConfigError> {
        self.gps = GpsConf::load(&self.gps_conf_path)?;
        Ok(self)
    }
}

/// Expand `~` in path to home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
