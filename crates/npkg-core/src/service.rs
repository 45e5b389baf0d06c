use std::path::Path;

use serde_json::Value;

use npkg_domain::records::{
    ComponentList, InstallOutcome, PackageWithVersions, PaginatedPackages, RemovalResult,
};

use crate::archive::ArchiveStore;
use crate::assets::{self, Asset};
use crate::catalog;
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::index::MetadataIndex;
use crate::install;
use crate::registry::{RegistryClient, ResolvedModule};

/// The mirror service: one shared storage root, one metadata index, one
/// upstream registry. The host (route layer or CLI) constructs it once and
/// calls the operation methods from any number of request threads.
pub struct Mirror {
    registry: RegistryClient,
    index: MetadataIndex,
    store: ArchiveStore,
}

impl Mirror {
    /// Open the mirror described by `config`, creating the storage layout
    /// and index schema as needed.
    pub fn open(config: &Config) -> Result<Self> {
        let store = ArchiveStore::open(&config.storage.path)?;
        let index = MetadataIndex::open(store.root())?;
        let registry = RegistryClient::new(config.registry.clone())?;
        Ok(Self {
            registry,
            index,
            store,
        })
    }

    pub fn storage_root(&self) -> &Path {
        self.store.root()
    }

    /// Upstream metadata for a package (and one resolved version).
    pub fn info(&self, name: &str, version: Option<&str>) -> Result<ResolvedModule> {
        if name.trim().is_empty() {
            return Err(ServiceError::MissingName);
        }
        self.registry
            .resolve_version_meta(name, version)?
            .ok_or_else(|| ServiceError::PackageNotFound {
                name: name.to_string(),
            })
    }

    /// Download and index one package version; a cached version is a no-op.
    pub fn install(&self, name: &str, version: Option<&str>) -> Result<InstallOutcome> {
        install::install_package(&self.registry, &self.index, &self.store, name, version)
    }

    /// Remove a package, all its versions, and their archive directories.
    pub fn remove(&self, name: &str) -> Result<RemovalResult> {
        catalog::remove_package(&self.index, &self.store, name)
    }

    /// Upstream search passthrough.
    pub fn search(&self, fragment: &str) -> Result<Value> {
        self.registry.search(fragment)
    }

    /// Installed packages, paginated in stored order.
    pub fn list(&self, skip: u64, limit: u64) -> Result<PaginatedPackages> {
        catalog::list_packages(&self.index, skip, limit)
    }

    pub fn package_detail(&self, name: &str) -> Result<PackageWithVersions> {
        catalog::package_detail(&self.index, name)
    }

    pub fn package_version_detail(&self, name: &str, version: &str) -> Result<ComponentList> {
        catalog::package_version_detail(&self.index, &self.store, name, version)
    }

    /// Serve a file or directory listing from inside the storage root.
    pub fn read_asset(&self, relative: &str) -> Result<Asset> {
        assets::read_asset(&self.store, relative)
    }
}
