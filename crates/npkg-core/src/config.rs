use std::env;
use std::path::PathBuf;

use dirs_next::home_dir;
use url::Url;

use crate::error::{Result, ServiceError};

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Where extracted archives (and the embedded index) live, plus a label for
/// where the decision came from.
#[derive(Debug, Clone)]
pub struct StorageLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

/// The upstream registry endpoint.
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    pub base_url: Url,
    pub source: &'static str,
}

impl RegistryEndpoint {
    pub fn parse(raw: &str, source: &'static str) -> Result<Self> {
        let base_url = Url::parse(raw)
            .map_err(|err| ServiceError::Config(format!("invalid registry url {raw}: {err}")))?;
        Ok(Self { base_url, source })
    }
}

/// Configuration threaded into every component at construction. Hosts and
/// tests build it explicitly; the CLI resolves it from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageLocation,
    pub registry: RegistryEndpoint,
}

impl Config {
    pub fn new(storage_root: impl Into<PathBuf>, registry_url: &str) -> Result<Self> {
        Ok(Self {
            storage: StorageLocation {
                path: storage_root.into(),
                source: "explicit",
            },
            registry: RegistryEndpoint::parse(registry_url, "explicit")?,
        })
    }

    /// Resolve the storage root and registry endpoint from the process
    /// environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            storage: resolve_storage_path()?,
            registry: resolve_registry_url()?,
        })
    }
}

fn resolve_storage_path() -> Result<StorageLocation> {
    if let Some(override_path) = env::var_os("NPKG_STORAGE_PATH") {
        return Ok(StorageLocation {
            path: absolutize(PathBuf::from(override_path))?,
            source: "NPKG_STORAGE_PATH",
        });
    }

    #[cfg(target_os = "windows")]
    let (base, source) = resolve_windows_storage_base();
    #[cfg(not(target_os = "windows"))]
    let (base, source) = resolve_unix_storage_base();

    Ok(StorageLocation {
        path: base.join("storage"),
        source,
    })
}

#[cfg(not(target_os = "windows"))]
fn resolve_unix_storage_base() -> (PathBuf, &'static str) {
    if let Some(home) = home_dir() {
        return (home.join(".npkg"), "HOME/.npkg");
    }
    (PathBuf::from("/tmp/npkg"), "default (/tmp/npkg)")
}

#[cfg(target_os = "windows")]
fn resolve_windows_storage_base() -> (PathBuf, &'static str) {
    if let Some(local_app_data) = env::var_os("LOCALAPPDATA") {
        return (PathBuf::from(local_app_data).join("npkg"), "LOCALAPPDATA/npkg");
    }
    if let Some(home) = home_dir() {
        return (
            home.join("AppData").join("Local").join("npkg"),
            "HOME/AppData/Local/npkg",
        );
    }
    (PathBuf::from("C:\\npkg"), "default (C:\\npkg)")
}

fn resolve_registry_url() -> Result<RegistryEndpoint> {
    match env::var("NPKG_REGISTRY_URL") {
        Ok(raw) if !raw.trim().is_empty() => {
            RegistryEndpoint::parse(raw.trim(), "NPKG_REGISTRY_URL")
        }
        _ => RegistryEndpoint::parse(DEFAULT_REGISTRY_URL, "default"),
    }
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir().map_err(|err| ServiceError::io(".", err))?;
        Ok(cwd.join(path))
    }
}
