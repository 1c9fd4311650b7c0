//! npm fetch provider.
//!
//! Claims fetch requests whose spec names the npmjs provider. Pulls the
//! full registry document for the package (the version-specific endpoint
//! does not work for scoped packages), resolves an ambiguous revision to
//! the registry's latest, downloads the revision tarball, and unpacks it
//! into a kept harvest directory for the process stage.

use crate::dispatch::Handler;
use crate::error::{Error, Result};
use crate::model::{Document, Request};
use crate::providers;
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::NpmOptions;

pub struct NpmFetch {
    client: reqwest::Client,
    options: NpmOptions,
}

/// Registry facts for one package revision, trimmed from the full
/// registry document.
struct RegistryData {
    /// Concrete version the request resolves to.
    version: String,
    /// Per-version manifest.
    manifest: serde_json::Value,
    /// Publish time of the version, when the registry knows it.
    release_date: Option<DateTime<Utc>>,
}

impl NpmFetch {
    pub fn new(options: NpmOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
        }
    }

    /// Fetch the whole package document and cut out the requested (or
    /// latest) version. The registry serves more here than the package
    /// manifest itself carries, so this is the authoritative source.
    async fn registry_data(&self, request: &Request) -> Result<RegistryData> {
        let full_name = request.spec.full_name();
        // npmjs rejects an escaped @ but requires the inner slash escaped.
        let url = format!(
            "{}/{}",
            self.options.registry_base,
            full_name.replace('/', "%2F")
        );
        debug!(url, "fetching registry document");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("npm registry request: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::PermanentProvider(format!(
                "npm package not found: {full_name}"
            )));
        }
        if !response.status().is_success() {
            return Err(Error::TransientProvider(format!(
                "npm registry returned {} for {full_name}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::TransientProvider(format!("npm registry body: {e}")))?;

        let version = match &request.spec.revision {
            Some(rev) => rev.clone(),
            None => body
                .pointer("/dist-tags/latest")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::PermanentProvider(format!(
                        "npm registry lists no latest version for {full_name}"
                    ))
                })?,
        };

        let manifest = body
            .pointer(&format!("/versions/{version}"))
            .cloned()
            .ok_or_else(|| {
                Error::PermanentProvider(format!("npm version not found: {full_name}@{version}"))
            })?;

        let release_date = body
            .pointer(&format!("/time/{version}"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(RegistryData {
            version,
            manifest,
            release_date,
        })
    }

    fn tarball_url(&self, request: &Request, version: &str) -> String {
        format!(
            "{}/{}/-/{}-{}.tgz",
            self.options.registry_base,
            request.spec.full_name(),
            request.spec.name,
            version
        )
    }

    /// Download the tarball to `destination`. Returns the byte count.
    async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("npm tarball request: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::PermanentProvider(format!(
                "npm tarball not found: {url}"
            )));
        }
        if !response.status().is_success() {
            return Err(Error::TransientProvider(format!(
                "npm tarball returned {} for {url}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::TransientProvider(format!("npm tarball body: {e}")))?;
        tokio::fs::write(destination, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    /// Unpack a gzipped tarball into `destination`.
    async fn unpack(archive: PathBuf, destination: PathBuf) -> Result<()> {
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::open(&archive)?;
            let decoder = flate2::read::GzDecoder::new(file);
            let mut tarball = tar::Archive::new(decoder);
            tarball.unpack(&destination)
        })
        .await
        .map_err(|e| Error::Other(format!("unpack task: {e}")))?
        .map_err(|e| Error::PermanentProvider(format!("malformed npm tarball: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Handler for NpmFetch {
    fn name(&self) -> &str {
        "npm"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.spec.provider == "npmjs"
    }

    async fn handle(&self, mut request: Request) -> Result<Request> {
        let registry = self.registry_data(&request).await?;
        request.resolve_revision(&registry.version);

        let archive = providers::scratch_file("crawlq-npm-")?;
        let url = self.tarball_url(&request, &registry.version);
        info!(
            request_id = %request.id,
            spec = %request.spec,
            url,
            "downloading npm package"
        );
        let bytes = self.download(&url, archive.path()).await?;

        let harvest = providers::harvest_dir("crawlq-npm-")?;
        Self::unpack(archive.path().to_path_buf(), harvest.clone()).await?;

        metrics::harvest_bytes().add(bytes, &[KeyValue::new("provider", "npm")]);
        request.add_meta("tarballBytes", serde_json::json!(bytes));

        let mut document = Document::at_location(harvest.to_string_lossy())
            .data(serde_json::json!({ "registryData": { "manifest": registry.manifest } }));
        if let Some(date) = registry.release_date {
            document = document.release_date(date);
        }
        request.document = Some(document);
        request.content_origin = Some("origin".to_string());
        request.request_type = self.options.process_type.clone();
        Ok(request)
    }
}
