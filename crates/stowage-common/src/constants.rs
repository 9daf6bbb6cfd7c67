//! System-wide constants and default paths.

use std::path::PathBuf;

/// Application name used in CLI output and repository paths.
pub const APP_NAME: &str = "stowage";

/// Fallback base directory when no home directory can be determined.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/stowage";

/// Default path of the JSON configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/stowage/stowage.json";

/// Environment variable overriding the local repository directory.
pub const ENV_LOCAL_REPOSITORY: &str = "STOWAGE_LOCAL_REPOSITORY";

/// Environment variable overriding the centralized repository directory.
pub const ENV_CENTRALIZED_REPOSITORY: &str = "STOWAGE_CENTRALIZED_REPOSITORY";

/// Namespace prefix of every image imported from an archive.
///
/// Pulled images live under their registry host, so a loaded image can
/// never shadow a pulled one of the same name.
pub const LOAD_NAMESPACE: &str = "load";

/// Registry host assumed for references that do not name one.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Path segment inserted before single-component image names.
pub const DEFAULT_LIBRARY: &str = "library";

/// Tag assumed when a reference does not carry one.
pub const DEFAULT_TAG: &str = "latest";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Default upper bound on the duration of `run`, in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// Placeholder replaced with the unpacked root filesystem in launcher argv.
pub const ROOTFS_PLACEHOLDER: &str = "{rootfs}";

/// Returns the per-user base directory, `$HOME/.stowage` when a home
/// directory is known and `/var/lib/stowage` otherwise.
#[must_use]
pub fn default_local_repository() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(
            || PathBuf::from(SYSTEM_DATA_DIR).join("local"),
            |home| PathBuf::from(home).join(format!(".{APP_NAME}")),
        )
}
