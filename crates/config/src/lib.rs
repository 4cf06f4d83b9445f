//! Layered configuration.
//!
//! Values are merged from, in increasing order of precedence:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`--config <path>`, or `komerge.toml` in the platform
//!    configuration directory),
//! 3. environment variables prefixed with `KOMERGE_`, with `__` separating
//!    nested keys (`KOMERGE_CLEANUP__RETENTION_MINUTES=240`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APPLICATION: &str = "komerge";
const FILE_NAME: &str = "komerge.toml";
const ENV_PREFIX: &str = "KOMERGE_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for everything komerge stores.
    pub data_dir: PathBuf,
    /// Uploaded statistics databases. Defaults to `<data_dir>/uploads`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<PathBuf>,
    /// Corrected databases. Defaults to `<data_dir>/processed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_dir: Option<PathBuf>,
    /// Download counter database. Defaults to `<data_dir>/counter.sqlite3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_db: Option<PathBuf>,
    #[serde(default)]
    pub sessions: Sessions,
    #[serde(default)]
    pub cleanup: Cleanup,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sessions {
    /// Inactivity window, refreshed every time a session is validated.
    pub timeout_minutes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cleanup {
    /// How often the sweeper looks for old files.
    pub interval_minutes: u64,
    /// Age after which an unprotected artifact is deleted, measured from its
    /// modification time.
    pub retention_minutes: u64,
}

impl Default for Sessions {
    fn default() -> Self {
        Self { timeout_minutes: 120 }
    }
}

impl Default for Cleanup {
    fn default() -> Self {
        Self { interval_minutes: 10, retention_minutes: 120 }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from("data"));
        Self {
            data_dir,
            uploads_dir: None,
            processed_dir: None,
            counter_db: None,
            sessions: Sessions::default(),
            cleanup: Cleanup::default(),
        }
    }
}

impl Config {
    /// Load configuration from every source.
    ///
    /// An explicitly given `path` must exist; the default location is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// The merged providers, before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match path {
            Some(path) => figment.merge(Toml::file_exact(path)),
            None => match project_dirs() {
                Some(dirs) => figment.merge(Toml::file(dirs.config_dir().join(FILE_NAME))),
                None => figment,
            },
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from arbitrary providers.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        config.data_dir = std::path::absolute(&config.data_dir).or_raise(|| ErrorKind::Invalid("data_dir"))?;
        tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("data_dir"));
        }
        check_minutes("sessions.timeout_minutes", self.sessions.timeout_minutes)?;
        check_minutes("cleanup.interval_minutes", self.cleanup.interval_minutes)?;
        check_minutes("cleanup.retention_minutes", self.cleanup.retention_minutes)
    }

    fn under_data_dir(&self, configured: &Option<PathBuf>, default: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.data_dir.join(path),
            None => self.data_dir.join(default),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.under_data_dir(&self.uploads_dir, "uploads")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.under_data_dir(&self.processed_dir, "processed")
    }

    pub fn counter_db(&self) -> PathBuf {
        self.under_data_dir(&self.counter_db, "counter.sqlite3")
    }

    pub fn session_timeout(&self) -> time::Duration {
        minutes(self.sessions.timeout_minutes)
    }

    pub fn retention(&self) -> time::Duration {
        minutes(self.cleanup.retention_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup.interval_minutes.saturating_mul(60))
    }
}

/// Durations are configured in minutes, from one minute up to a year.
const MAX_MINUTES: u64 = 366 * 24 * 60;

fn check_minutes(field: &'static str, value: u64) -> Result<()> {
    if !(1..=MAX_MINUTES).contains(&value) {
        exn::bail!(ErrorKind::Invalid(field));
    }
    Ok(())
}

fn minutes(value: u64) -> time::Duration {
    time::Duration::minutes(i64::try_from(value.min(MAX_MINUTES)).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config {
            data_dir: PathBuf::from("/srv/komerge"),
            ..Config::default()
        })))
        .unwrap();
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/komerge/uploads"));
        assert_eq!(config.processed_dir(), PathBuf::from("/srv/komerge/processed"));
        assert_eq!(config.counter_db(), PathBuf::from("/srv/komerge/counter.sqlite3"));
        assert_eq!(config.session_timeout(), time::Duration::hours(2));
        assert_eq!(config.retention(), time::Duration::hours(2));
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(600));
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("komerge.toml");
        std::fs::write(
            &path,
            r#"
                data_dir = "/srv/komerge"
                processed_dir = "/mnt/fast/processed"
                counter_db = "stats/downloads.sqlite3"

                [cleanup]
                interval_minutes = 5
                retention_minutes = 30
            "#,
        )
        .unwrap();
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path)))
            .unwrap();
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/komerge/uploads"));
        assert_eq!(config.processed_dir(), PathBuf::from("/mnt/fast/processed"));
        assert_eq!(config.counter_db(), PathBuf::from("/srv/komerge/stats/downloads.sqlite3"));
        assert_eq!(config.retention(), time::Duration::minutes(30));
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(300));
        // Untouched sections keep their defaults.
        assert_eq!(config.sessions, Sessions::default());
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "komerge.toml",
                r#"
                    data_dir = "state"
                    [sessions]
                    timeout_minutes = 60
                "#,
            )?;
            jail.set_env("KOMERGE_SESSIONS__TIMEOUT_MINUTES", "15");
            let config = Config::load(Some(Path::new("komerge.toml"))).unwrap();
            assert_eq!(config.session_timeout(), time::Duration::minutes(15));
            // Relative data directories are resolved against the working
            // directory.
            assert!(config.data_dir.is_absolute());
            assert!(config.data_dir.ends_with("state"));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[rstest]
    #[case("sessions", "timeout_minutes", 0, "sessions.timeout_minutes")]
    #[case("cleanup", "interval_minutes", 0, "cleanup.interval_minutes")]
    #[case("cleanup", "retention_minutes", 0, "cleanup.retention_minutes")]
    #[case("sessions", "timeout_minutes", 527_041, "sessions.timeout_minutes")]
    #[case("cleanup", "retention_minutes", 9_223_372_036_854_775_807, "cleanup.retention_minutes")]
    fn test_out_of_range_durations_rejected(
        #[case] section: &str,
        #[case] key: &str,
        #[case] value: u64,
        #[case] field: &str,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("komerge.toml");
        std::fs::write(&path, format!("data_dir = \"/srv/komerge\"\n[{section}]\n{key} = {value}\n")).unwrap();
        let err = Config::from_figment(Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path)))
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(f) if *f == field));
    }

    #[test]
    fn test_longest_durations_accepted() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config {
            data_dir: PathBuf::from("/srv/komerge"),
            sessions: Sessions { timeout_minutes: MAX_MINUTES },
            ..Config::default()
        })))
        .unwrap();
        assert_eq!(config.session_timeout(), time::Duration::days(366));
    }
}
