//! Mirror-sync collaborator: pulls a project's metadata workbooks and
//! checksum manifests from the archive mirror into a local directory. Thin
//! I/O only; no reconciliation logic lives here.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;
use tracing::{debug, info};

use crate::error::StrataError;

static PROJECT_PASSWORD_VARS: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        BTreeMap::from([
            ("soil-amplicons", "STRATA_SOIL_DOWNLOADS_PASSWORD"),
            ("soil-metagenomics", "STRATA_SOIL_DOWNLOADS_PASSWORD"),
            ("stemcell-transcriptome", "STRATA_STEMCELL_DOWNLOADS_PASSWORD"),
        ])
    });

/// Downloads password for a project, from the environment.
pub fn download_password(project: &str) -> Result<String, StrataError> {
    let var = PROJECT_PASSWORD_VARS
        .get(project)
        .ok_or_else(|| StrataError::UnknownProject(project.to_string()))?;
    match std::env::var(var) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => Err(StrataError::MissingCredential(var.to_string())),
    }
}

pub trait MirrorClient {
    /// Filenames linked from the mirror folder listing.
    fn list(&self, base_url: &str) -> Result<Vec<String>, StrataError>;
    fn fetch(&self, base_url: &str, name: &str, dest: &Utf8Path) -> Result<(), StrataError>;
}

pub struct HttpMirror {
    client: reqwest::blocking::Client,
    auth: Option<(String, String)>,
}

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"?#]+)""#).unwrap());

impl HttpMirror {
    pub fn new(auth: Option<(String, String)>) -> Result<Self, StrataError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| StrataError::MirrorHttp(err.to_string()))?;
        Ok(Self { client, auth })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, StrataError> {
        let mut request = self.client.get(url);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request
            .send()
            .map_err(|err| StrataError::MirrorHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StrataError::MirrorStatus {
                status: status.as_u16(),
                message: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl MirrorClient for HttpMirror {
    fn list(&self, base_url: &str) -> Result<Vec<String>, StrataError> {
        let body = self
            .get(base_url)?
            .text()
            .map_err(|err| StrataError::MirrorHttp(err.to_string()))?;
        Ok(HREF_RE
            .captures_iter(&body)
            .map(|caps| caps[1].to_string())
            .filter(|name| !name.contains('/'))
            .collect())
    }

    fn fetch(&self, base_url: &str, name: &str, dest: &Utf8Path) -> Result<(), StrataError> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
        let bytes = self
            .get(&url)?
            .bytes()
            .map_err(|err| StrataError::MirrorHttp(err.to_string()))?;

        let parent = dest
            .parent()
            .ok_or_else(|| StrataError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| StrataError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("strata-rec-fetch")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| StrataError::Filesystem(err.to_string()))?;
        temp.write_all(&bytes)
            .map_err(|err| StrataError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| StrataError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Sync the mirror folder into `dir`, keeping only names with one of the
/// wanted suffixes. Already-present files are not re-fetched.
pub fn sync_project(
    client: &dyn MirrorClient,
    base_url: &str,
    dir: &Utf8Path,
    suffixes: &[&str],
) -> Result<Vec<String>, StrataError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| StrataError::Filesystem(err.to_string()))?;
    let mut fetched = Vec::new();
    for name in client.list(base_url)? {
        if !suffixes.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        let dest = dir.join(&name);
        if dest.as_std_path().exists() {
            debug!(name = %name, "already present, skipping");
            continue;
        }
        info!(name = %name, base_url, "fetching");
        client.fetch(base_url, &name, &dest)?;
        fetched.push(name);
    }
    Ok(fetched)
}
