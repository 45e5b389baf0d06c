use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One summary per package name. `version` caches the highest version
/// installed locally; it is a pointer, not the source of truth for what
/// exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub package_type: Option<String>,
    pub version: String,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

/// One record per installed (name, version) pair. A record exists iff the
/// corresponding archive directory was fully extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionRecord {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub package_type: Option<String>,
    pub published_at: Option<String>,
}

/// What an install returns: where the version lives on disk, the package
/// summary as stored after the call, and the version record. `downloaded`
/// distinguishes a fresh install from a cache hit.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub location: PathBuf,
    pub package: PackageSummary,
    pub version: PackageVersionRecord,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedPackages {
    pub skip: u64,
    pub limit: u64,
    pub total: u64,
    pub list: Vec<PackageSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageWithVersions {
    pub package: PackageSummary,
    pub versions: Vec<PackageVersionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentList {
    pub package_version: PackageVersionRecord,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalResult {
    pub name: String,
    pub versions: Vec<String>,
}
