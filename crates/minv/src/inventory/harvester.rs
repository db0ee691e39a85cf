//! Remote location scanners.
//!
//! A [`Harvester`] lists the index files published at one location and
//! downloads single files into a target directory. The concrete
//! implementation is chosen by the location type.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::Url;

use crate::config::Settings;
use crate::db::inventory_repo::LocationRow;
use crate::error::{ConfigError, HarvestError, RetrieveError};
use crate::inventory::index_file::is_index_filename;

/// One index file offered by a remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIndexFile {
    pub name: String,
    pub url: String,
}

pub trait Harvester: Send + Sync {
    /// Lists the index files currently offered by the location.
    fn scan(&self) -> Result<Vec<RemoteIndexFile>, HarvestError>;

    /// Stores `url` as `target_dir/filename` and returns the final path.
    /// Nothing is left behind in `target_dir` on failure.
    fn retrieve(&self, url: &str, filename: &str, target_dir: &Path)
        -> Result<PathBuf, RetrieveError>;
}

/// Builds the harvester matching a location's type.
pub trait HarvesterFactory: Send + Sync {
    fn harvester(&self, location: &LocationRow) -> Result<Box<dyn Harvester>, HarvestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// HTML page with `<a class="index-file">` anchors.
    Oads,
    /// Plain directory listing.
    Nga,
}

impl LocationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LocationKind::Oads => "oads",
            LocationKind::Nga => "nga",
        }
    }
}

impl FromStr for LocationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oads" => Ok(LocationKind::Oads),
            "nga" => Ok(LocationKind::Nga),
            other => Err(ConfigError::InvalidLocationType(other.to_string())),
        }
    }
}

/// Creates HTTP harvesters honouring `retrieve.timeout`.
#[derive(Debug, Clone, Default)]
pub struct HttpHarvesterFactory {
    timeout: Option<Duration>,
}

impl HttpHarvesterFactory {
    pub fn new(settings: &Settings) -> Self {
        Self {
            timeout: settings.retrieve.timeout.map(Duration::from_secs),
        }
    }
}

impl HarvesterFactory for HttpHarvesterFactory {
    fn harvester(&self, location: &LocationRow) -> Result<Box<dyn Harvester>, HarvestError> {
        let kind: LocationKind = location.location_type.parse()?;

        let mut builder = Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HarvestError::Http {
            url: location.url.clone(),
            source: e,
        })?;

        let harvester = HttpHarvester {
            kind,
            url: location.url.clone(),
            client,
        };
        Ok(Box::new(harvester))
    }
}

pub struct HttpHarvester {
    kind: LocationKind,
    url: String,
    client: Client,
}

impl Harvester for HttpHarvester {
    fn scan(&self) -> Result<Vec<RemoteIndexFile>, HarvestError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Error scanning {}: {}", self.url, e);
                HarvestError::Http {
                    url: self.url.clone(),
                    source: e,
                }
            })?;

        let final_url = response.url().clone();
        debug!("Scanning: got response from {}", final_url);

        let body = response.text().map_err(|e| HarvestError::Http {
            url: self.url.clone(),
            source: e,
        })?;

        let files = match self.kind {
            LocationKind::Oads => extract_index_hrefs(&body, &final_url),
            LocationKind::Nga => {
                let base = directory_url(&self.url)?;
                Ok(extract_listing_names(&body, &base))
            }
        };

        files.map_err(|reason| {
            error!("Error parsing {}: {}", self.url, reason);
            HarvestError::Listing {
                url: self.url.clone(),
                reason,
            }
        })
    }

    fn retrieve(
        &self,
        url: &str,
        filename: &str,
        target_dir: &Path,
    ) -> Result<PathBuf, RetrieveError> {
        let path = target_dir.join(filename);
        let tmp_path = target_dir.join(format!("{}.tmp", filename));
        debug!("Retrieving {} and storing it under {}", url, path.display());

        let started = Instant::now();
        let result = download(&self.client, url, &tmp_path).and_then(|size| {
            std::fs::rename(&tmp_path, &path).map_err(|e| RetrieveError::Store {
                path: path.clone(),
                source: e,
            })?;
            Ok(size)
        });

        match result {
            Ok(size) => {
                info!(
                    "'{}' -> '{}' {}B {:.3}s",
                    url,
                    path.display(),
                    size,
                    started.elapsed().as_secs_f64()
                );
                Ok(path)
            }
            Err(e) => {
                if tmp_path.is_file() {
                    let _ = std::fs::remove_file(&tmp_path);
                }
                error!("Error retrieving {}: {}", url, e);
                Err(e)
            }
        }
    }
}

fn download(client: &Client, url: &str, tmp_path: &Path) -> Result<u64, RetrieveError> {
    let request_error = |e: reqwest::Error| RetrieveError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    };

    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(request_error)?;

    let mut file = File::create(tmp_path).map_err(|e| RetrieveError::Store {
        path: tmp_path.to_path_buf(),
        source: e,
    })?;
    response.copy_to(&mut file).map_err(request_error)
}

fn directory_url(url: &str) -> Result<Url, HarvestError> {
    let url = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    };
    Url::parse(&url).map_err(|e| HarvestError::Listing {
        url: url.clone(),
        reason: e.to_string(),
    })
}

fn remote_file(base: &Url, href: &str) -> Option<RemoteIndexFile> {
    let name = href.rsplit('/').next()?.to_string();
    if !is_index_filename(&name) {
        return None;
    }
    let url = base.join(href).ok()?;
    Some(RemoteIndexFile {
        name,
        url: url.to_string(),
    })
}

fn is_index_anchor(element: &BytesStart<'_>) -> Result<Option<String>, String> {
    if element.local_name().as_ref() != b"a" {
        return Ok(None);
    }

    let mut is_index = false;
    let mut href = None;
    for attr in element.attributes().with_checks(false) {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = std::str::from_utf8(&attr.value).map_err(|e| e.to_string())?;
        match attr.key.local_name().as_ref() {
            b"class" => is_index = value.split_whitespace().any(|c| c == "index-file"),
            b"href" => {
                let value = quick_xml::escape::unescape(value).map_err(|e| e.to_string())?;
                href = Some(value.into_owned());
            }
            _ => {}
        }
    }

    Ok(if is_index { href } else { None })
}

/// Index file anchors of an (X)HTML page, resolved against `base`.
pub fn extract_index_hrefs(body: &str, base: &Url) -> Result<Vec<RemoteIndexFile>, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut files = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if let Some(href) = is_index_anchor(e)? {
                    if let Some(file) = remote_file(base, &href) {
                        files.push(file);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parsing error: {}", e)),
            _ => {}
        }
    }
    Ok(files)
}

fn listing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{8}-\d{6}_\d{8}-\d{6}_\d{8}-\d{6}\.index(?:\.zip)?")
            .expect("listing pattern is valid")
    })
}

/// Index file names mentioned anywhere in a plain listing, deduplicated in
/// order of appearance.
pub fn extract_listing_names(body: &str, base: &Url) -> Vec<RemoteIndexFile> {
    let mut files: Vec<RemoteIndexFile> = Vec::new();
    for m in listing_regex().find_iter(body) {
        // Skip tokens that continue past the match, e.g. `.index.zip.md5`.
        let rest = &body[m.end()..];
        if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '.') {
            continue;
        }
        if files.iter().any(|f| f.name == m.as_str()) {
            continue;
        }
        if let Some(file) = remote_file(base, m.as_str()) {
            files.push(file);
        }
    }
    files
}
