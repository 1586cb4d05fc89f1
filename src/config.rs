use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "RehabCare";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_REGISTRY_URL: &str = "https://health-backend-d1ug.onrender.com";
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 10;

/// Passed as the data directory to keep everything in memory.
pub const IN_MEMORY: &str = ":memory:";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,rehabcare=debug,rehabcare_lib=debug"
}

/// Collection names shared by services.
pub mod collections {
    pub const USERS: &str = "User";
    pub const DOCTORS: &str = "Doctor";
    pub const PATIENTS: &str = "Patient";
    pub const FOLDERS: &str = "video_folders";
    pub const VIDEOS: &str = "Videos";
    pub const CHATS: &str = "chat";
    pub const MESSAGES: &str = "message";
    pub const PATIENT_DATA: &str = "users";
    pub const MEDICINES: &str = "medicines";
    pub const INTAKES: &str = "intakes";
    pub const VIDEO_PROGRESS: &str = "video_progress";
    pub const PROGRESS_SUMMARY: &str = "progress_summary";
    pub const ANALYTICS: &str = "analytics";
    pub const AUTH_ACCOUNTS: &str = "auth_accounts";
    pub const AUTH_ACTION_CODES: &str = "auth_action_codes";
}

/// Get the application data directory
/// ~/RehabCare/ on all platforms, falling back to the working directory
/// when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Where persistent state lives.
#[derive(Debug, Clone, PartialEq)]
pub enum DataLocation {
    Memory,
    Directory(PathBuf),
}

impl DataLocation {
    pub fn database_file(&self) -> Option<PathBuf> {
        match self {
            Self::Memory => None,
            Self::Directory(dir) => Some(dir.join("rehabcare.db")),
        }
    }

    pub fn files_dir(&self) -> Option<PathBuf> {
        match self {
            Self::Memory => None,
            Self::Directory(dir) => Some(dir.join("files")),
        }
    }
}

/// Runtime configuration, read from `REHABCARE_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data: DataLocation,
    /// Base URL for links in emails and stored file URLs.
    pub public_url: String,
    pub registry_url: String,
    pub registry_timeout: Duration,
    pub hash_iterations: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Missing or blank values
    /// take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("REHABCARE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "REHABCARE_BIND",
            value: bind_raw.clone(),
        })?;

        let data = match get("REHABCARE_DATA_DIR") {
            Some(dir) if dir == IN_MEMORY => DataLocation::Memory,
            Some(dir) => DataLocation::Directory(PathBuf::from(dir)),
            None => DataLocation::Directory(app_data_dir()),
        };

        let public_url = get("REHABCARE_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{bind}"))
            .trim_end_matches('/')
            .to_string();

        let registry_url = get("REHABCARE_REGISTRY_URL")
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let registry_timeout = match get("REHABCARE_REGISTRY_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "REHABCARE_REGISTRY_TIMEOUT_SECS",
                value: raw.clone(),
            })?),
            None => Duration::from_secs(DEFAULT_REGISTRY_TIMEOUT_SECS),
        };

        let hash_iterations = match get("REHABCARE_HASH_ITERATIONS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "REHABCARE_HASH_ITERATIONS",
                        value: raw,
                    })
                }
            },
            None => crate::auth::password::DEFAULT_ITERATIONS,
        };

        Ok(Self {
            bind,
            data,
            public_url,
            registry_url,
            registry_timeout,
            hash_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("RehabCare"));
    }

    #[test]
    fn app_name_is_rehabcare() {
        assert_eq!(APP_NAME, "RehabCare");
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.public_url, "http://127.0.0.1:8080");
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.registry_timeout, Duration::from_secs(10));
        assert_eq!(config.hash_iterations, 600_000);
        assert!(matches!(config.data, DataLocation::Directory(_)));
    }

    #[test]
    fn overrides_are_read() {
        let config = AppConfig::from_lookup(lookup(&[
            ("REHABCARE_BIND", "0.0.0.0:9000"),
            ("REHABCARE_DATA_DIR", ":memory:"),
            ("REHABCARE_PUBLIC_URL", "https://clinic.example/"),
            ("REHABCARE_REGISTRY_TIMEOUT_SECS", "3"),
            ("REHABCARE_HASH_ITERATIONS", "1000"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.data, DataLocation::Memory);
        assert_eq!(config.public_url, "https://clinic.example");
        assert_eq!(config.registry_timeout, Duration::from_secs(3));
        assert_eq!(config.hash_iterations, 1000);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[("REHABCARE_BIND", "nowhere")])).unwrap_err();
        assert!(err.to_string().contains("REHABCARE_BIND"));
        assert!(AppConfig::from_lookup(lookup(&[("REHABCARE_HASH_ITERATIONS", "0")])).is_err());
    }

    #[test]
    fn memory_location_has_no_files() {
        assert!(DataLocation::Memory.database_file().is_none());
        let dir = DataLocation::Directory(PathBuf::from("/tmp/rc"));
        assert_eq!(dir.database_file().unwrap(), PathBuf::from("/tmp/rc/rehabcare.db"));
    }
}
