use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use fs4::FileExt;
use reqwest::blocking::Client;
use tar::Archive;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, ServiceError};

const LOCKS_DIR: &str = ".locks";
const TMP_DIR: &str = ".tmp";
const PACKAGE_DIR: &str = "package";
const COMPONENT_DIR: &str = "build";
const COMPONENT_SUFFIX: &str = ".fcp.js";
const USER_AGENT: &str = concat!("npkg/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Filesystem half of the mirror: every installed version occupies
/// `<root>/<name>-<version>/`, and the directory's existence is the ground
/// truth that installation completed. Housekeeping (lock files, download
/// staging) lives in dot-prefixed directories that are never addressable
/// content.
pub struct ArchiveStore {
    root: PathBuf,
    client: Client,
}

/// Exclusive cross-process lock for one (name, version) install. Dropping
/// the handle releases the advisory lock.
#[derive(Debug)]
pub struct VersionLock {
    _file: File,
}

impl ArchiveStore {
    /// Open the store rooted at `root`, creating the housekeeping layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [LOCKS_DIR, TMP_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| ServiceError::io(&path, err))?;
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { root, client })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location for one extracted version.
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(format!("{name}-{version}"))
    }

    /// Take the per-(name, version) exclusive lock. The install coordinator
    /// holds it from before the index existence check until the version
    /// record exists, so concurrent installs of the same pair serialize.
    pub fn acquire_version_lock(&self, name: &str, version: &str) -> Result<VersionLock> {
        let path = self.lock_path(name, version);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| ServiceError::io(&path, err))?;
        file.lock_exclusive()
            .map_err(|err| ServiceError::io(&path, err))?;
        Ok(VersionLock { _file: file })
    }

    fn lock_path(&self, name: &str, version: &str) -> PathBuf {
        // scoped names contain '/', flatten for the lock filename
        let flat = format!("{name}-{version}").replace('/', "_");
        self.root.join(LOCKS_DIR).join(format!("{flat}.lock"))
    }

    /// Download `url` and extract it into the version directory: the
    /// directory ends up fully extracted or absent, never partial. An
    /// existing directory (a previous install being retried) is replaced.
    pub fn fetch_and_extract(&self, url: &str, name: &str, version: &str) -> Result<PathBuf> {
        let dest = self.version_dir(name, version);
        let tarball = self.download_with_retry(url)?;

        let tmp_root = self.root.join(TMP_DIR);
        let staging = tempfile::tempdir_in(&tmp_root)
            .map_err(|err| ServiceError::io(&tmp_root, err))?;
        extract_tarball(tarball.path(), staging.path()).map_err(|err| ServiceError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|err| ServiceError::io(&dest, err))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| ServiceError::io(parent, err))?;
        }
        let staged = staging.keep();
        fs::rename(&staged, &dest).map_err(|err| {
            let _ = fs::remove_dir_all(&staged);
            ServiceError::io(&dest, err)
        })?;
        debug!(url, dest = %dest.display(), "downloaded and extracted archive");
        Ok(dest)
    }

    /// Remove one version's archive directory. A missing directory is
    /// already satisfied, not an error.
    pub fn remove_version_dir(&self, name: &str, version: &str) -> Result<()> {
        let dir = self.version_dir(name, version);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed archive directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ServiceError::io(&dir, err)),
        }
    }

    /// List build artifacts (`package/build/*.fcp.js`) inside an extracted
    /// version as sorted relative paths. A missing directory and zero
    /// matches are both valid empty results.
    pub fn component_files(&self, name: &str, version: &str) -> Result<Vec<String>> {
        let dir = self
            .version_dir(name, version)
            .join(PACKAGE_DIR)
            .join(COMPONENT_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ServiceError::io(&dir, err)),
        };

        let mut components = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ServiceError::io(&dir, err))?;
            if !entry
                .file_type()
                .map_err(|err| ServiceError::io(&dir, err))?
                .is_file()
            {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(COMPONENT_SUFFIX) {
                components.push(format!("{COMPONENT_DIR}/{file_name}"));
            }
        }
        components.sort();
        Ok(components)
    }

    fn download_with_retry(&self, url: &str) -> Result<NamedTempFile> {
        let mut last_err = None;
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            match self.download_once(url) {
                Ok(file) => return Ok(file),
                Err(err) => {
                    debug!(url, attempt, %err, "tarball download attempt failed");
                    last_err = Some(err);
                    thread::sleep(Duration::from_millis(150 * u64::from(attempt)));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ServiceError::Fetch {
            url: url.to_string(),
            reason: "no download attempts were made".to_string(),
        }))
    }

    fn download_once(&self, url: &str) -> Result<NamedTempFile> {
        let fetch_err = |err: reqwest::Error| ServiceError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        };
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;

        let tmp_root = self.root.join(TMP_DIR);
        let mut file =
            NamedTempFile::new_in(&tmp_root).map_err(|err| ServiceError::io(&tmp_root, err))?;
        response.copy_to(file.as_file_mut()).map_err(fetch_err)?;
        Ok(file)
    }
}

fn extract_tarball(tarball: &Path, dest: &Path) -> io::Result<()> {
    let file = File::open(tarball)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(dest)
}
