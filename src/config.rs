//! Application configuration, read from a TOML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::credentials::{Credentials, SealedCredentials};
use crate::device::{HttpSettings, RetryPolicy};
use crate::mirror::{GitConfig, MirrorsConfig, StorageConfig};
use crate::orchestrator::OrchestratorSettings;
use crate::schedule::{Schedule, ScheduleConfig, ScheduleError};
use crate::secret::{SecretBox, SecretError};
use crate::util::retention::{RetentionConfig, DEFAULT_MAX_BACKUPS};

/// Config file used if none is given.
pub const DEFAULT_CONFIG_FILE: &str = "cx_backup.toml";

#[derive(Debug, Display, Error, From)]
/// Errors on loading the configuration.
pub enum ConfigError {
    #[display("Reading the config file {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[display("Config file {path:?} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[display("Invalid config: {_0}")]
    Invalid(#[error(ignore)] String),
    #[from]
    #[display("{_0}")]
    Secret(SecretError),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Device access settings.
pub struct FetchConfig {
    /// Attempts per switch and pass.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Timeout of the reachability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Version segment of the REST API paths.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Accept the self signed certificates switches ship with.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            api_version: default_api_version(),
            accept_invalid_certs: default_accept_invalid_certs(),
        }
    }
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_retry_delay_secs() -> u64 {
    RetryPolicy::default().retry_delay.as_secs()
}

fn default_probe_timeout_secs() -> u64 {
    HttpSettings::default().probe_timeout.as_secs()
}

fn default_api_version() -> String {
    HttpSettings::default().api_version
}

fn default_accept_invalid_certs() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Contents of the config file.
pub struct AppConfig {
    /// CSV file listing the switches.
    #[serde(default = "default_inventory")]
    pub inventory: PathBuf,
    /// Directory receiving one sub directory per switch.
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    /// JSON file with the status of the last backup of every switch.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Timeout of a single request to a switch.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Snapshots kept per switch.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Used for switches without own credentials in the inventory.
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inventory: default_inventory(),
            backup_root: default_backup_root(),
            status_file: default_status_file(),
            timeout_secs: default_timeout_secs(),
            max_backups: default_max_backups(),
            fetch: FetchConfig::default(),
            credentials: Credentials::default(),
            schedule: ScheduleConfig::default(),
            git: GitConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_inventory() -> PathBuf {
    PathBuf::from("switches.csv")
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("backups")
}

fn default_status_file() -> PathBuf {
    PathBuf::from("switch_status.json")
}

fn default_timeout_secs() -> u64 {
    HttpSettings::default().timeout.as_secs()
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

impl AppConfig {
    /// Reads the config at `path`.
    ///
    /// A missing file is replaced by the default configuration, which is also
    /// written to `path` so it can be edited afterwards. Plain secrets found in
    /// the file are sealed with `secrets` and written back.
    pub fn load_or_default(path: &Path, secrets: &SecretBox) -> Result<Self, ConfigError> {
        let config: Self = match fs::read_to_string(path) {
            Ok(config_str) => toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                default_config.write(path);
                return Ok(default_config);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.validate()?;

        let sealed = config.sealed(secrets)?;
        if sealed != config {
            log::info!("Encrypting plain secrets in {}", path.display());
            sealed.write(path);
        }

        Ok(sealed)
    }

    fn write(&self, path: &Path) {
        match toml::to_string_pretty(self) {
            Ok(config_str) => {
                if let Err(e) = fs::write(path, config_str) {
                    log::warn!("Writing config to {} failed {e}", path.display());
                }
            }
            Err(e) => log::warn!("Serializing the config failed: {e}"),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backups < 1 {
            return Err(ConfigError::Invalid(
                "max_backups must keep at least one snapshot".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with every plain secret sealed.
    fn sealed(&self, secrets: &SecretBox) -> Result<Self, SecretError> {
        let seal = |value: &mut String| -> Result<(), SecretError> {
            if !value.is_empty() && !SecretBox::is_sealed(value) {
                *value = secrets.seal(value)?;
            }
            Ok(())
        };

        let mut sealed = self.clone();
        seal(&mut sealed.credentials.password)?;
        seal(&mut sealed.git.token)?;
        seal(&mut sealed.storage.secret_key)?;
        Ok(sealed)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            inventory: self.inventory.clone(),
            backup_root: self.backup_root.clone(),
            retention: RetentionConfig {
                max_backups: self.max_backups,
            },
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            api_version: self.fetch.api_version.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            probe_timeout: Duration::from_secs(self.fetch.probe_timeout_secs),
            accept_invalid_certs: self.fetch.accept_invalid_certs,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.fetch.max_retries,
            retry_delay: Duration::from_secs(self.fetch.retry_delay_secs),
        }
    }

    /// Default credentials, the password is opened on every pass.
    pub fn credential_store(&self, secrets: Arc<SecretBox>) -> SealedCredentials {
        SealedCredentials::new(
            self.credentials.username.clone(),
            self.credentials.password.clone(),
            secrets,
        )
    }

    /// Mirror settings with opened secrets.
    pub fn mirrors(&self, secrets: &SecretBox) -> Result<MirrorsConfig, SecretError> {
        let mut mirrors = MirrorsConfig {
            git: self.git.clone(),
            storage: self.storage.clone(),
        };
        mirrors.git.token = secrets.open(&mirrors.git.token)?;
        mirrors.storage.secret_key = secrets.open(&mirrors.storage.secret_key)?;
        Ok(mirrors)
    }

    /// The automatic backup schedule, `None` if disabled.
    pub fn schedule(&self) -> Result<Option<Schedule>, ScheduleError> {
        if !self.schedule.enabled {
            return Ok(None);
        }
        Schedule::try_from(&self.schedule).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use crate::schedule::Frequency;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.max_backups, 5);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.http_settings(), HttpSettings::default());
        assert_eq!(config.schedule(), Ok(None));
    }

    #[test]
    fn sections_are_read() {
        let config: AppConfig = toml::from_str(
            r#"
            inventory = "/etc/cx_backup/switches.csv"
            max_backups = 10

            [fetch]
            max_retries = 2
            accept_invalid_certs = false

            [credentials]
            username = "admin"
            password = "secret"

            [schedule]
            enabled = true
            frequency = "weekly"
            times = ["03:15"]
            day = "Sunday"

            [storage]
            enabled = true
            bucket = "configs"
            region = "eu-central-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.inventory, PathBuf::from("/etc/cx_backup/switches.csv"));
        assert_eq!(config.orchestrator_settings().retention.max_backups, 10);
        assert_eq!(config.retry_policy().max_retries, 2);
        assert_eq!(config.retry_policy().retry_delay, Duration::from_secs(5));
        assert!(!config.http_settings().accept_invalid_certs);
        assert_eq!(config.credentials, Credentials::new("admin", "secret"));
        assert_eq!(config.schedule.frequency, Frequency::Weekly);
        assert!(matches!(config.schedule(), Ok(Some(Schedule::Weekly { .. }))));
        let mirrors = config.mirrors(&SecretBox::generate()).unwrap();
        assert!(mirrors.storage.enabled);
        assert!(!mirrors.git.enabled);
    }

    #[test]
    fn missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        let config = AppConfig::load_or_default(&path, &SecretBox::generate()).unwrap();

        assert_eq!(config, AppConfig::default());
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(toml::from_str::<AppConfig>(&written).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "max_backups = \"many\"").unwrap();

        assert!(matches!(
            AppConfig::load_or_default(&path, &SecretBox::generate()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_max_backups_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "max_backups = 0").unwrap();

        assert!(matches!(
            AppConfig::load_or_default(&path, &SecretBox::generate()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn plain_secrets_are_sealed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"
            [credentials]
            username = "admin"
            password = "hunter2"

            [git]
            enabled = true
            repo_url = "acme/switch-configs"
            token = "ghp_secret"

            [storage]
            secret_key = "wasabi-secret"
            "#,
        )
        .unwrap();
        let secrets = Arc::new(SecretBox::generate());

        let config = AppConfig::load_or_default(&path, &secrets).unwrap();

        let on_disk = fs::read_to_string(&path).unwrap();
        for plain in ["hunter2", "ghp_secret", "wasabi-secret"] {
            assert!(!on_disk.contains(plain), "{plain} stored in plain text");
        }
        let reloaded = AppConfig::load_or_default(&path, &secrets).unwrap();
        assert_eq!(reloaded, config);

        let credentials = config.credential_store(secrets.clone()).default_credentials();
        assert_eq!(credentials, Credentials::new("admin", "hunter2"));
        let mirrors = config.mirrors(&secrets).unwrap();
        assert_eq!(mirrors.git.token, "ghp_secret");
        assert_eq!(mirrors.storage.secret_key, "wasabi-secret");
    }
}
