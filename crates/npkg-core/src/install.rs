use tracing::debug;

use npkg_domain::records::{InstallOutcome, PackageSummary, PackageVersionRecord};
use npkg_domain::registry::{ModuleDocument, VersionData};

use crate::archive::ArchiveStore;
use crate::error::{Result, ServiceError};
use crate::index::MetadataIndex;
use crate::registry::RegistryClient;

/// Install one package version into the local mirror.
///
/// Repeating an install of an already-cached version is a cheap no-op. Two
/// concurrent installs of the same (name, version) serialize on the store's
/// per-version lock, held from before the existence check until the version
/// record exists, so at most one of them downloads and inserts; the index's
/// composite key catches writers that bypass the lock directory.
pub fn install_package(
    registry: &RegistryClient,
    index: &MetadataIndex,
    store: &ArchiveStore,
    name: &str,
    version: Option<&str>,
) -> Result<InstallOutcome> {
    if name.trim().is_empty() {
        return Err(ServiceError::MissingName);
    }
    debug!(name, version = version.unwrap_or("latest"), "install requested");

    let resolved = registry
        .resolve_version_meta(name, version)?
        .ok_or_else(|| ServiceError::PackageNotFound {
            name: name.to_string(),
        })?;
    let Some(version_data) = resolved.version_data else {
        return Err(ServiceError::VersionNotFound {
            name: name.to_string(),
            version: resolved.version,
            known: resolved.module.known_versions(),
        });
    };
    let module = resolved.module;

    let _lock = store.acquire_version_lock(&version_data.name, &version_data.version)?;

    let summary = ensure_summary(index, &module, &version_data)?;
    let location = store.version_dir(&version_data.name, &version_data.version);

    if let Some(existing) = index.find_version(&version_data.name, &version_data.version)? {
        debug!(
            name = version_data.name.as_str(),
            version = version_data.version.as_str(),
            "version already installed, skipping download"
        );
        return Ok(InstallOutcome {
            location,
            package: summary,
            version: existing,
            downloaded: false,
        });
    }

    store.fetch_and_extract(
        &version_data.dist.tarball,
        &version_data.name,
        &version_data.version,
    )?;

    let record = PackageVersionRecord {
        name: version_data.name.clone(),
        version: version_data.version.clone(),
        description: version_data.description.clone(),
        author: version_data.author_name().map(str::to_string),
        package_type: version_data.package_type.clone(),
        published_at: module.published(&version_data.version).map(str::to_string),
    };
    let record = if index.insert_version(&record)? {
        record
    } else {
        // a writer outside our lock directory won the insert; adopt its row
        index
            .find_version(&record.name, &record.version)?
            .ok_or_else(|| {
                ServiceError::IndexInconsistent(format!(
                    "version record vanished for {}@{}",
                    record.name, record.version
                ))
            })?
    };

    let summary = index.advance_latest(
        &record.name,
        &record.version,
        module.published(&record.version),
    )?;

    Ok(InstallOutcome {
        location,
        package: summary,
        version: record,
        downloaded: true,
    })
}

fn ensure_summary(
    index: &MetadataIndex,
    module: &ModuleDocument,
    version_data: &VersionData,
) -> Result<PackageSummary> {
    if let Some(existing) = index.find_package(&version_data.name)? {
        return Ok(existing);
    }
    let seeded = PackageSummary {
        name: version_data.name.clone(),
        description: version_data.description.clone(),
        author: version_data.author_name().map(str::to_string),
        package_type: version_data.package_type.clone(),
        version: version_data.version.clone(),
        created_at: module.created().map(str::to_string),
        modified_at: module.modified().map(str::to_string),
    };
    index.insert_package(&seeded)
}
