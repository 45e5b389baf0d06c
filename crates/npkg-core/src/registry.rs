use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use npkg_domain::registry::{ModuleDocument, VersionData};

use crate::config::RegistryEndpoint;
use crate::error::{Result, ServiceError};

const USER_AGENT: &str = concat!("npkg/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const FETCH_ATTEMPTS: u32 = 3;

/// One upstream resolution: the full packument, the concrete version string
/// that was requested (or implied by `dist-tags.latest`), and that version's
/// metadata when the registry has it. `version_data: None` means "module
/// found, version not found", distinct from the module itself being absent.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedModule {
    pub module: ModuleDocument,
    pub version: String,
    pub version_data: Option<VersionData>,
}

pub struct RegistryClient {
    endpoint: RegistryEndpoint,
    client: Client,
}

impl RegistryClient {
    pub fn new(endpoint: RegistryEndpoint) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { endpoint, client })
    }

    /// Fetch the packument for `name` and select `version`, falling back to
    /// the upstream `latest` tag when no version is given.
    ///
    /// Returns `Ok(None)` when the registry answers 404 for the module; any
    /// other upstream failure propagates as a transport error.
    pub fn resolve_version_meta(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ResolvedModule>> {
        let url = self.endpoint_url(name)?;
        let Some(module) = self.fetch_module(&url)? else {
            debug!(name, "module not found upstream");
            return Ok(None);
        };

        let version = match version {
            Some(explicit) => explicit.to_string(),
            None => module.dist_tags.latest.clone().unwrap_or_default(),
        };
        let version_data = module.versions.get(&version).cloned();
        debug!(
            name,
            version = version.as_str(),
            found = version_data.is_some(),
            "resolved module metadata"
        );

        Ok(Some(ResolvedModule {
            module,
            version,
            version_data,
        }))
    }

    /// Upstream package search passthrough (verdaccio-compatible endpoint);
    /// the result is handed to the caller untouched.
    pub fn search(&self, fragment: &str) -> Result<Value> {
        let url = self.endpoint_url(&format!("-/verdaccio/search/{fragment}"))?;
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.json::<Value>()?)
    }

    fn fetch_module(&self, url: &Url) -> Result<Option<ModuleDocument>> {
        let mut last_err: Option<ServiceError> = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            let response = match self.client.get(url.clone()).send() {
                Ok(response) => response,
                Err(err) => {
                    debug!(url = url.as_str(), attempt, %err, "registry request failed");
                    last_err = Some(err.into());
                    thread::sleep(Duration::from_millis(150 * u64::from(attempt)));
                    continue;
                }
            };
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response.error_for_status()?;
            match response.json::<ModuleDocument>() {
                Ok(module) => return Ok(Some(module)),
                Err(err) => {
                    debug!(url = url.as_str(), attempt, %err, "registry response unreadable");
                    last_err = Some(err.into());
                    thread::sleep(Duration::from_millis(150 * u64::from(attempt)));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ServiceError::UpstreamDecode {
            url: url.to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }

    fn endpoint_url(&self, path: &str) -> Result<Url> {
        let base = self.endpoint.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|err| ServiceError::Config(format!("invalid registry path {path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::request, responders::*, Expectation, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> RegistryClient {
        let endpoint = RegistryEndpoint::parse(&server.url_str("/"), "explicit").unwrap();
        RegistryClient::new(endpoint).unwrap()
    }

    fn demo_packument() -> Value {
        json!({
            "name": "demo",
            "dist-tags": { "latest": "1.2.0" },
            "versions": {
                "1.0.0": {
                    "name": "demo",
                    "version": "1.0.0",
                    "dist": { "tarball": "https://registry.example/demo-1.0.0.tgz" }
                },
                "1.2.0": {
                    "name": "demo",
                    "version": "1.2.0",
                    "dist": { "tarball": "https://registry.example/demo-1.2.0.tgz" }
                }
            },
            "time": { "created": "2023-01-01T00:00:00.000Z" }
        })
    }

    #[test]
    fn resolves_latest_when_version_is_omitted() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/demo"))
                .respond_with(json_encoded(demo_packument())),
        );

        let resolved = client_for(&server)
            .resolve_version_meta("demo", None)
            .unwrap()
            .expect("module should be found");
        assert_eq!(resolved.version, "1.2.0");
        let data = resolved.version_data.expect("latest version should exist");
        assert_eq!(data.version, "1.2.0");
    }

    #[test]
    fn distinguishes_missing_version_from_missing_module() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/demo"))
                .respond_with(json_encoded(demo_packument())),
        );

        let resolved = client_for(&server)
            .resolve_version_meta("demo", Some("9.9.9"))
            .unwrap()
            .expect("module should be found");
        assert_eq!(resolved.version, "9.9.9");
        assert!(resolved.version_data.is_none());
        assert_eq!(
            resolved.module.known_versions(),
            vec!["1.0.0".to_string(), "1.2.0".to_string()]
        );
    }

    #[test]
    fn upstream_404_is_domain_absence_not_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/ghost"))
                .respond_with(status_code(404)),
        );

        let resolved = client_for(&server)
            .resolve_version_meta("ghost", None)
            .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn upstream_server_error_is_a_transport_failure() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/demo"))
                .respond_with(status_code(502)),
        );

        let err = client_for(&server)
            .resolve_version_meta("demo", None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert!(err.is_retryable());
    }

    #[test]
    fn search_passes_the_upstream_result_through() {
        let server = Server::run();
        let hits = json!([{ "name": "demo", "version": "1.2.0" }]);
        server.expect(
            Expectation::matching(request::method_path("GET", "/-/verdaccio/search/demo"))
                .respond_with(json_encoded(hits.clone())),
        );

        let result = client_for(&server).search("demo").unwrap();
        assert_eq!(result, hits);
    }
}
