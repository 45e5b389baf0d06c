#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Core of the npkg local package mirror: registry metadata resolution,
//! download-once archive caching, the two-level metadata index, and the
//! read paths over installed content.

mod archive;
mod assets;
mod catalog;
mod config;
mod error;
mod index;
mod install;
mod registry;
mod service;

pub use archive::{ArchiveStore, VersionLock};
pub use assets::{read_asset, Asset};
pub use catalog::{list_packages, package_detail, package_version_detail, remove_package};
pub use config::{Config, RegistryEndpoint, StorageLocation, DEFAULT_REGISTRY_URL};
pub use error::{ErrorKind, Result, ServiceError};
pub use index::MetadataIndex;
pub use install::install_package;
pub use registry::{RegistryClient, ResolvedModule};
pub use service::Mirror;
