#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Data model for the npkg mirror: the records the metadata index stores,
//! the wire documents the upstream registry serves, and version ordering.

pub mod records;
pub mod registry;
pub mod version;

pub use records::{
    ComponentList, InstallOutcome, PackageSummary, PackageVersionRecord, PackageWithVersions,
    PaginatedPackages, RemovalResult,
};
pub use registry::{AuthorField, DistInfo, DistTags, ModuleDocument, VersionData};
pub use version::is_newer;
