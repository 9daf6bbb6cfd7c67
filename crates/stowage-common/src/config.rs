//! Configuration model for the Stowage image core.
//!
//! The configuration lives in a JSON file. Every field has a default so an
//! absent file is not an error; two environment variables can then redirect
//! the repositories, which is how tests and CI point the tool at scratch
//! directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, StowageError};
use crate::types::Topology;

/// Root configuration for the Stowage runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StowageConfig {
    /// Directory backing the per-user repository.
    pub local_repository_dir: PathBuf,
    /// Directory backing the shared repository, if one is set up.
    pub centralized_repository_dir: Option<PathBuf>,
    /// Where root filesystems for `run` are unpacked. Defaults to a
    /// `scratch` directory inside the selected repository.
    pub scratch_dir: Option<PathBuf>,
    /// Upper bound on a single `run`, in seconds.
    pub run_timeout_secs: u64,
    /// Argv prefix of the container launcher. `{rootfs}` is substituted
    /// with the unpacked image and the user command is appended.
    pub launcher: Vec<String>,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            local_repository_dir: constants::default_local_repository(),
            centralized_repository_dir: None,
            scratch_dir: None,
            run_timeout_secs: constants::DEFAULT_RUN_TIMEOUT_SECS,
            launcher: vec!["chroot".into(), constants::ROOTFS_PLACEHOLDER.into()],
        }
    }
}

impl StowageConfig {
    /// Reads the configuration from a JSON file and applies environment
    /// overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            tracing::debug!(path = %path.display(), "reading configuration");
            let content =
                std::fs::read_to_string(path).map_err(|e| StowageError::io(path, e))?;
            serde_json::from_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };
        let config = config.with_env_overrides(|key| std::env::var_os(key));
        config.validate()?;
        Ok(config)
    }

    /// Applies repository overrides looked up through `lookup`.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(dir) = lookup(constants::ENV_LOCAL_REPOSITORY) {
            self.local_repository_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(constants::ENV_CENTRALIZED_REPOSITORY) {
            self.centralized_repository_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` when a value is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.run_timeout_secs == 0 {
            return Err(StowageError::Config {
                message: "runTimeoutSecs must be greater than zero".into(),
            });
        }
        if self.local_repository_dir.as_os_str().is_empty() {
            return Err(StowageError::Config {
                message: "localRepositoryDir must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Returns the directory backing `topology`.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Config` if the centralized repository is
    /// requested but not configured.
    pub fn repository_dir(&self, topology: Topology) -> Result<&Path> {
        match topology {
            Topology::Local => Ok(&self.local_repository_dir),
            Topology::Centralized => self.centralized_repository_dir.as_deref().ok_or_else(|| {
                StowageError::Config {
                    message: format!(
                        "centralized repository is not configured (set centralizedRepositoryDir \
                         or {})",
                        constants::ENV_CENTRALIZED_REPOSITORY
                    ),
                }
            }),
        }
    }

    /// Returns the timeout applied to `run`.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StowageConfig::load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config.run_timeout_secs, constants::DEFAULT_RUN_TIMEOUT_SECS);
        assert_eq!(config.launcher, vec!["chroot", "{rootfs}"]);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config: StowageConfig = serde_json::from_str(
            r#"{ "centralizedRepositoryDir": "/srv/images", "runTimeoutSecs": 10 }"#,
        )
        .expect("parse");
        assert_eq!(
            config.centralized_repository_dir.as_deref(),
            Some(Path::new("/srv/images"))
        );
        assert_eq!(config.run_timeout(), Duration::from_secs(10));
        assert_eq!(config.launcher, StowageConfig::default().launcher);
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stowage.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            StowageConfig::load(&path),
            Err(StowageError::Serialization { .. })
        ));
    }

    #[test]
    fn env_overrides_replace_repository_dirs() {
        let config = StowageConfig::default().with_env_overrides(|key| match key {
            constants::ENV_LOCAL_REPOSITORY => Some("/tmp/local".into()),
            constants::ENV_CENTRALIZED_REPOSITORY => Some("/tmp/shared".into()),
            _ => None,
        });
        assert_eq!(
            config.repository_dir(Topology::Local).expect("local"),
            Path::new("/tmp/local")
        );
        assert_eq!(
            config.repository_dir(Topology::Centralized).expect("centralized"),
            Path::new("/tmp/shared")
        );
    }

    #[test]
    fn centralized_without_directory_is_config_error() {
        let config = StowageConfig::default();
        assert!(matches!(
            config.repository_dir(Topology::Centralized),
            Err(StowageError::Config { .. })
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = StowageConfig {
            run_timeout_secs: 0,
            ..StowageConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
