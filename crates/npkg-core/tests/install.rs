//! End-to-end coverage of the install/cache subsystem against a mock
//! registry: download-once, concurrency, latest-pointer, failure, and
//! removal behavior.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use flate2::write::GzEncoder;
use flate2::Compression;
use httptest::{matchers::request, responders::*, Expectation, Server};
use npkg_core::{Asset, Config, ErrorKind, Mirror, ServiceError};
use serde_json::{json, Map, Value};
use tempfile::tempdir;

fn tarball_bytes() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_entry(&mut builder, "package/package.json", b"{}");
    append_entry(
        &mut builder,
        "package/build/widget.fcp.js",
        b"module.exports = {};",
    );
    builder.into_inner().unwrap().finish().unwrap()
}

fn append_entry(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, path: &str, body: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, body).unwrap();
}

fn packument(server: &Server, name: &str, versions: &[&str], latest: &str) -> Value {
    let mut version_map = Map::new();
    let mut time = Map::new();
    time.insert("created".to_string(), json!("2023-01-01T00:00:00.000Z"));
    time.insert("modified".to_string(), json!("2023-06-01T00:00:00.000Z"));
    for (i, version) in versions.iter().enumerate() {
        version_map.insert(
            (*version).to_string(),
            json!({
                "name": name,
                "version": version,
                "description": "demo component package",
                "author": { "name": "Acme" },
                "packageType": "component",
                "dist": {
                    "tarball": server.url_str(&format!("/tarballs/{name}-{version}.tgz"))
                }
            }),
        );
        time.insert(
            (*version).to_string(),
            json!(format!("2023-03-{:02}T00:00:00.000Z", i + 1)),
        );
    }
    json!({
        "name": name,
        "dist-tags": { "latest": latest },
        "versions": version_map,
        "time": time
    })
}

fn expect_tarball(server: &Server, path: &'static str, hits: usize) {
    server.expect(
        Expectation::matching(request::method_path("GET", path))
            .times(hits)
            .respond_with(status_code(200).body(tarball_bytes())),
    );
}

fn open_mirror(server: &Server, root: &Path) -> Mirror {
    let config = Config::new(root, &server.url_str("/")).unwrap();
    Mirror::open(&config).unwrap()
}

fn archive_dirs(root: &Path) -> Vec<String> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().unwrap().is_dir() && !name.starts_with('.') {
            dirs.push(name);
        }
    }
    dirs.sort();
    dirs
}

#[test]
fn installs_latest_and_serves_components() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let outcome = mirror.install("demo", None).unwrap();
    assert!(outcome.downloaded);
    assert_eq!(outcome.version.version, "1.0.0");
    assert_eq!(outcome.location, temp.path().join("demo-1.0.0"));
    assert!(outcome.location.join("package/build/widget.fcp.js").exists());

    assert_eq!(outcome.package.version, "1.0.0");
    assert_eq!(
        outcome.package.created_at.as_deref(),
        Some("2023-01-01T00:00:00.000Z"),
        "summary must be seeded from the packument time map"
    );
    assert_eq!(outcome.version.author.as_deref(), Some("Acme"));
    assert_eq!(
        outcome.version.published_at.as_deref(),
        Some("2023-03-01T00:00:00.000Z")
    );

    let detail = mirror.package_version_detail("demo", "1.0.0").unwrap();
    assert_eq!(detail.components, vec!["build/widget.fcp.js".to_string()]);
}

#[test]
fn repeat_install_skips_the_download() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .times(2)
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let first = mirror.install("demo", Some("1.0.0")).unwrap();
    let second = mirror.install("demo", Some("1.0.0")).unwrap();
    assert!(first.downloaded);
    assert!(!second.downloaded);
    assert_eq!(first.version, second.version);
    assert_eq!(first.location, second.location);
}

#[test]
fn concurrent_installs_download_exactly_once() {
    const WORKERS: usize = 4;

    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .times(WORKERS)
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = Arc::new(open_mirror(&server, temp.path()));

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let mirror = Arc::clone(&mirror);
        handles.push(thread::spawn(move || {
            mirror.install("demo", Some("1.0.0")).unwrap()
        }));
    }
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let downloads = outcomes.iter().filter(|o| o.downloaded).count();
    assert_eq!(downloads, 1, "exactly one install may download");
    let detail = mirror.package_detail("demo").unwrap();
    assert_eq!(detail.versions.len(), 1, "exactly one version record");
    assert_eq!(archive_dirs(temp.path()), vec!["demo-1.0.0".to_string()]);
}

#[test]
fn latest_pointer_is_monotonic_across_install_order() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .times(3)
            .respond_with(json_encoded(packument(
                &server,
                "demo",
                &["1.0.0", "1.5.0", "2.0.0"],
                "2.0.0",
            ))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    expect_tarball(&server, "/tarballs/demo-1.5.0.tgz", 1);
    expect_tarball(&server, "/tarballs/demo-2.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let first = mirror.install("demo", Some("1.0.0")).unwrap();
    assert_eq!(first.package.version, "1.0.0");

    let second = mirror.install("demo", Some("2.0.0")).unwrap();
    assert_eq!(second.package.version, "2.0.0");

    let third = mirror.install("demo", Some("1.5.0")).unwrap();
    assert_eq!(
        third.package.version, "2.0.0",
        "an out-of-order install must not regress the pointer"
    );
    assert_eq!(
        third.package.modified_at.as_deref(),
        Some("2023-03-03T00:00:00.000Z"),
        "modified stamp must still belong to 2.0.0"
    );
}

#[test]
fn older_version_after_newer_keeps_the_pointer() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/widgets"))
            .times(2)
            .respond_with(json_encoded(packument(
                &server,
                "widgets",
                &["1.0.0", "2.0.0"],
                "2.0.0",
            ))),
    );
    expect_tarball(&server, "/tarballs/widgets-1.0.0.tgz", 1);
    expect_tarball(&server, "/tarballs/widgets-2.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    mirror.install("widgets", Some("2.0.0")).unwrap();
    let outcome = mirror.install("widgets", Some("1.0.0")).unwrap();
    assert_eq!(outcome.package.version, "2.0.0");
}

#[test]
fn missing_package_fails_without_side_effects() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/ghost"))
            .respond_with(status_code(404)),
    );
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let err = mirror.install("ghost", None).unwrap_err();
    assert!(matches!(err, ServiceError::PackageNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(archive_dirs(temp.path()).is_empty());
    assert_eq!(mirror.list(0, 20).unwrap().total, 0);
}

#[test]
fn unknown_version_reports_the_known_set() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .respond_with(json_encoded(packument(
                &server,
                "demo",
                &["1.0.0", "1.5.0"],
                "1.5.0",
            ))),
    );
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let err = mirror.install("demo", Some("9.9.9")).unwrap_err();
    match err {
        ServiceError::VersionNotFound {
            name,
            version,
            known,
        } => {
            assert_eq!(name, "demo");
            assert_eq!(version, "9.9.9");
            assert_eq!(known, vec!["1.0.0".to_string(), "1.5.0".to_string()]);
        }
        other => panic!("expected VersionNotFound, got {other:?}"),
    }
    assert!(archive_dirs(temp.path()).is_empty());
}

#[test]
fn failed_download_leaves_no_version_record() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    // the downloader makes three bounded attempts before giving up
    server.expect(
        Expectation::matching(request::method_path("GET", "/tarballs/demo-1.0.0.tgz"))
            .times(3)
            .respond_with(status_code(500)),
    );
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let err = mirror.install("demo", Some("1.0.0")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.is_retryable());

    let detail = mirror.package_detail("demo").unwrap();
    assert!(
        detail.versions.is_empty(),
        "a failed download must not be indexed as installed"
    );
    assert!(archive_dirs(temp.path()).is_empty());
}

#[test]
fn retry_after_failed_download_succeeds() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .times(2)
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/tarballs/demo-1.0.0.tgz"))
            .times(4)
            .respond_with(httptest::cycle![
                status_code(500),
                status_code(500),
                status_code(500),
                status_code(200).body(tarball_bytes()),
            ]),
    );
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    assert!(mirror.install("demo", Some("1.0.0")).is_err());
    let outcome = mirror.install("demo", Some("1.0.0")).unwrap();
    assert!(outcome.downloaded);
    assert!(outcome.location.join("package/build/widget.fcp.js").exists());
}

#[test]
fn removal_clears_records_and_directories() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .times(2)
            .respond_with(json_encoded(packument(
                &server,
                "demo",
                &["1.0.0", "2.0.0"],
                "2.0.0",
            ))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    expect_tarball(&server, "/tarballs/demo-2.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    for version in ["1.0.0", "2.0.0"] {
        mirror.install("demo", Some(version)).unwrap();
    }

    let removed = mirror.remove("demo").unwrap();
    assert_eq!(
        removed.versions,
        vec!["1.0.0".to_string(), "2.0.0".to_string()]
    );
    assert!(archive_dirs(temp.path()).is_empty());
    assert!(matches!(
        mirror.package_detail("demo").unwrap_err(),
        ServiceError::PackageNotInstalled { .. }
    ));
    assert_eq!(mirror.list(0, 20).unwrap().total, 0);

    let again = mirror.remove("demo").unwrap();
    assert!(again.versions.is_empty(), "removal is idempotent");
}

#[test]
fn blank_name_is_rejected_before_any_request() {
    let server = Server::run();
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let err = mirror.install("  ", None).unwrap_err();
    assert!(matches!(err, ServiceError::MissingName));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn info_converts_upstream_absence_to_not_found() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/ghost"))
            .respond_with(status_code(404)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());

    let err = mirror.info("ghost", None).unwrap_err();
    assert!(matches!(err, ServiceError::PackageNotFound { .. }));

    let resolved = mirror.info("demo", None).unwrap();
    assert_eq!(resolved.version, "1.0.0");
    assert!(resolved.version_data.is_some());
}

#[test]
fn assets_are_served_only_from_inside_the_root() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/demo"))
            .respond_with(json_encoded(packument(&server, "demo", &["1.0.0"], "1.0.0"))),
    );
    expect_tarball(&server, "/tarballs/demo-1.0.0.tgz", 1);
    let temp = tempdir().unwrap();
    let mirror = open_mirror(&server, temp.path());
    mirror.install("demo", Some("1.0.0")).unwrap();

    match mirror
        .read_asset("demo-1.0.0/package/build/widget.fcp.js")
        .unwrap()
    {
        Asset::File { size, .. } => assert_eq!(size, 20),
        Asset::Directory { .. } => panic!("expected a file"),
    }

    let err = mirror.read_asset("demo-1.0.0/../../etc/passwd").unwrap_err();
    assert!(matches!(err, ServiceError::PathEscapesRoot { .. }));
}
