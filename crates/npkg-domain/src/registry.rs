use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Upstream packument for one module: dist tags, the per-version metadata
/// map, and the publication time map keyed by version string plus the
/// `created`/`modified` markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDocument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: DistTags,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionData>,
    #[serde(default)]
    pub time: BTreeMap<String, String>,
}

impl ModuleDocument {
    /// Every version string the registry knows for this module.
    pub fn known_versions(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    pub fn created(&self) -> Option<&str> {
        self.time.get("created").map(String::as_str)
    }

    pub fn modified(&self) -> Option<&str> {
        self.time.get("modified").map(String::as_str)
    }

    /// Publication stamp for one concrete version, when the registry has it.
    pub fn published(&self, version: &str) -> Option<&str> {
        self.time.get(version).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistTags {
    #[serde(default)]
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionData {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<AuthorField>,
    #[serde(rename = "packageType", default)]
    pub package_type: Option<String>,
    pub dist: DistInfo,
}

impl VersionData {
    /// Author display name, whichever shape the registry served.
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(AuthorField::display_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistInfo {
    pub tarball: String,
}

/// The registry serves `author` either as a plain string or as a structured
/// object; both forms must deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorField {
    Plain(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl AuthorField {
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text.as_str()),
            Self::Detailed { name, .. } => name.as_deref(),
        }
    }
}
