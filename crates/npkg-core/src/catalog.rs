use tracing::debug;

use npkg_domain::records::{
    ComponentList, PackageWithVersions, PaginatedPackages, RemovalResult,
};

use crate::archive::ArchiveStore;
use crate::error::{Result, ServiceError};
use crate::index::MetadataIndex;

/// Paginated listing of installed package summaries in stored order.
pub fn list_packages(index: &MetadataIndex, skip: u64, limit: u64) -> Result<PaginatedPackages> {
    let (list, total) = index.list_packages(skip, limit)?;
    Ok(PaginatedPackages {
        skip,
        limit,
        total,
        list,
    })
}

/// One package's summary plus every installed version record.
pub fn package_detail(index: &MetadataIndex, name: &str) -> Result<PackageWithVersions> {
    let package = index
        .find_package(name)?
        .ok_or_else(|| ServiceError::PackageNotInstalled {
            name: name.to_string(),
        })?;
    let versions = index.versions_for(name)?;
    Ok(PackageWithVersions { package, versions })
}

/// One installed version's record plus its component file listing.
pub fn package_version_detail(
    index: &MetadataIndex,
    store: &ArchiveStore,
    name: &str,
    version: &str,
) -> Result<ComponentList> {
    if name.trim().is_empty() {
        return Err(ServiceError::MissingName);
    }
    if version.trim().is_empty() {
        return Err(ServiceError::MissingVersion);
    }
    let record = index.find_version(name, version)?.ok_or_else(|| {
        ServiceError::VersionNotInstalled {
            name: name.to_string(),
            version: version.to_string(),
        }
    })?;
    let components = store.component_files(name, version)?;
    Ok(ComponentList {
        package_version: record,
        components,
    })
}

/// Remove a package: every version's archive directory and record, then the
/// summary. Idempotent; removing a package with nothing installed returns
/// an empty version list. Not atomic across versions, so a crash mid-loop
/// leaves the remaining versions for a retry.
pub fn remove_package(
    index: &MetadataIndex,
    store: &ArchiveStore,
    name: &str,
) -> Result<RemovalResult> {
    if name.trim().is_empty() {
        return Err(ServiceError::MissingName);
    }
    let mut removed = Vec::new();
    for record in index.versions_for(name)? {
        store.remove_version_dir(&record.name, &record.version)?;
        index.remove_version(&record.name, &record.version)?;
        removed.push(record.version);
    }
    index.remove_package(name)?;
    debug!(name, count = removed.len(), "removed package");
    Ok(RemovalResult {
        name: name.to_string(),
        versions: removed,
    })
}
