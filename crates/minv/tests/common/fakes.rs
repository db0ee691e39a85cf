//! In-memory stand-ins for remote locations and the daemon.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use minv::db::inventory_repo::LocationRow;
use minv::error::{HarvestError, IpcError, RetrieveError};
use minv::inventory::{Harvester, HarvesterFactory, RemoteIndexFile};
use minv::tasks::ReloadNotifier;

/// What a fake location serves for one file.
#[derive(Debug, Clone)]
pub enum Served {
    Content(String),
    /// Listed, but every download fails.
    Broken,
}

type Listing = BTreeMap<String, Served>;

/// Serves listings keyed by location URL. Listings can be changed between
/// harvests to simulate new publications.
#[derive(Default, Clone)]
pub struct FakeHarvesterFactory {
    listings: Arc<Mutex<HashMap<String, Listing>>>,
    retrievals: Arc<Mutex<Vec<String>>>,
}

impl FakeHarvesterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, filename: &str, content: &str) {
        self.listings
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .insert(filename.to_string(), Served::Content(content.to_string()));
    }

    pub fn serve_broken(&self, url: &str, filename: &str) {
        self.listings
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .insert(filename.to_string(), Served::Broken);
    }

    pub fn withdraw(&self, url: &str, filename: &str) {
        if let Some(listing) = self.listings.lock().unwrap().get_mut(url) {
            listing.remove(filename);
        }
    }

    /// Filenames whose download was attempted, in order.
    pub fn retrievals(&self) -> Vec<String> {
        self.retrievals.lock().unwrap().clone()
    }
}

impl HarvesterFactory for FakeHarvesterFactory {
    fn harvester(&self, location: &LocationRow) -> Result<Box<dyn Harvester>, HarvestError> {
        Ok(Box::new(FakeHarvester {
            url: location.url.clone(),
            listings: Arc::clone(&self.listings),
            retrievals: Arc::clone(&self.retrievals),
        }))
    }
}

struct FakeHarvester {
    url: String,
    listings: Arc<Mutex<HashMap<String, Listing>>>,
    retrievals: Arc<Mutex<Vec<String>>>,
}

impl FakeHarvester {
    fn served(&self, filename: &str) -> Option<Served> {
        self.listings
            .lock()
            .unwrap()
            .get(&self.url)
            .and_then(|listing| listing.get(filename).cloned())
    }
}

impl Harvester for FakeHarvester {
    fn scan(&self) -> Result<Vec<RemoteIndexFile>, HarvestError> {
        let listings = self.listings.lock().unwrap();
        let listing = listings.get(&self.url).ok_or_else(|| HarvestError::Scan {
            url: self.url.clone(),
            reason: "nothing served".to_string(),
        })?;
        Ok(listing
            .keys()
            .map(|name| RemoteIndexFile {
                name: name.clone(),
                url: format!("{}{}", self.url, name),
            })
            .collect())
    }

    fn retrieve(
        &self,
        url: &str,
        filename: &str,
        target_dir: &Path,
    ) -> Result<PathBuf, RetrieveError> {
        self.retrievals.lock().unwrap().push(filename.to_string());
        match self.served(filename) {
            Some(Served::Content(content)) => {
                let path = target_dir.join(filename);
                std::fs::write(&path, content).map_err(|e| RetrieveError::Store {
                    path: path.clone(),
                    source: e,
                })?;
                Ok(path)
            }
            Some(Served::Broken) | None => Err(RetrieveError::Request {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            }),
        }
    }
}

/// Counts reload notifications instead of talking to a daemon.
#[derive(Default)]
pub struct RecordingNotifier {
    reloads: AtomicUsize,
}

impl RecordingNotifier {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl ReloadNotifier for RecordingNotifier {
    fn notify_reload(&self) -> Result<(), IpcError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
