//! Rotating pseudonyms.
//!
//! Every participant plays under a pseudonym of three words joined by `-`.
//! The mapping from key (API key or bot alias) to pseudonym is created
//! lazily, persisted to disk as JSON and replaced wholesale every
//! [`ROTATION_INTERVAL`] so pseudonyms cannot be tracked across seasons.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pseudonyms are replaced after this interval.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// How often the rotation worker wakes up (and saves the book).
const WORKER_PERIOD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct Book {
    #[serde(rename = "LastUpdated")]
    last_updated: DateTime<Utc>,
    #[serde(rename = "Dict")]
    dict: HashMap<String, String>,
}

/// The pseudonym service. One instance per process, shared by admission,
/// the matchmaker and the rotation worker.
pub struct Pseudonyms {
    path: PathBuf,
    book: Mutex<Book>,
}

impl Pseudonyms {
    /// Load the book from `path`, or start an empty one if the file does
    /// not exist yet.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        let book = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Book {
                last_updated: Utc::now(),
                dict: HashMap::new(),
            },
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            book: Mutex::new(book),
        })
    }

    /// Current pseudonym for `key`, creating one on first use.
    pub fn get(&self, key: &str) -> String {
        let mut book = self.book.lock().unwrap();
        book.dict
            .entry(key.to_string())
            .or_insert_with(|| new_pseudonym(&mut rand::thread_rng()))
            .clone()
    }

    /// Rotate if due. Returns whether anything changed.
    fn maybe_rotate(&self) -> bool {
        let mut book = self.book.lock().unwrap();
        let age = Utc::now().signed_duration_since(book.last_updated);
        if age.to_std().map(|age| age > ROTATION_INTERVAL).unwrap_or(false) {
            let mut rng = rand::thread_rng();
            for pseudonym in book.dict.values_mut() {
                *pseudonym = new_pseudonym(&mut rng);
            }
            book.last_updated = Utc::now();
            info!("rotated pseudonyms");
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> Result<String, serde_json::Error> {
        let book = self.book.lock().unwrap();
        serde_json::to_string(&*book)
    }

    /// Periodically rotate and persist the book.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WORKER_PERIOD);
            loop {
                interval.tick().await;
                this.maybe_rotate();
                match this.snapshot() {
                    Ok(json) => {
                        if let Err(e) = tokio::fs::write(&this.path, json).await {
                            warn!("saving pseudonyms: {e}");
                        }
                    }
                    Err(e) => warn!("serializing pseudonyms: {e}"),
                }
            }
        })
    }
}

/// Three random words from the wordlist, joined by `-`.
fn new_pseudonym(rng: &mut impl rand::Rng) -> String {
    let words: Vec<&str> = (0..3)
        .map(|_| *WORDLIST.choose(rng).expect("wordlist not empty"))
        .collect();
    words.join("-")
}

const WORDLIST: &[&str] = &[
    "Anchor", "Apricot", "Asteroid", "Aurora", "Badger", "Bassoon", "Beacon", "Birch",
    "Bramble", "Cascade", "Cedar", "Chisel", "Cinder", "Citadel", "Compass", "Conifer",
    "Crater", "Cricket", "Dynamo", "Ember", "Falcon", "Fennel", "Flint", "Fresco",
    "Gable", "Garnet", "Glacier", "Gondola", "Granite", "Harbor", "Heron", "Hickory",
    "Ingot", "Iris", "Jasper", "Juniper", "Kestrel", "Lantern", "Larch", "Lichen",
    "Magnet", "Marble", "Meadow", "Mercury", "Nimbus", "Nutmeg", "Obsidian", "Orchard",
    "Osprey", "Pebble", "Pinion", "Plume", "Quartz", "Quill", "Raven", "Rudder",
    "Saffron", "Sextant", "Sparrow", "Spruce", "Tandem", "Thicket", "Tundra", "Turbine",
    "Umber", "Vellum", "Walnut", "Willow", "Xenon", "Yarrow", "Zephyr", "Zinnia",
];

// =============================================================================
// TESTS
// =============================================================================
