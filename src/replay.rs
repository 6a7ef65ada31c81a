//! Per-match replay log.
//!
//! Every match writes an LZ4-frame-compressed file under the log directory:
//! first a JSON map of player id to identity, then one JSON game state per
//! broadcast. Writes go through a queue to a dedicated blocking task; the
//! task closes the compressed file when the queue closes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use data_encoding::BASE32;
use lz4_flex::frame::FrameEncoder;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::game::engine::PlayerSlot;
use crate::game::state::GameState;

/// Identity line written once at the start of the log.
#[derive(Debug, Serialize)]
struct PlayerEntry {
    #[serde(rename = "APIKey")]
    api_key: String,
    #[serde(rename = "Pseudonym")]
    pseudonym: String,
    #[serde(rename = "AI")]
    ai: String,
}

/// Handle to one match's log file. Dropping it (or calling
/// [`ReplayLog::close`]) flushes and closes the file.
pub struct ReplayLog {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl ReplayLog {
    /// Open a log for a new match and return it together with the match id.
    /// The id is produced even when logging is disabled or the file cannot
    /// be created; it identifies the match in logs and statistics either
    /// way.
    pub fn create(dir: &Path, disabled: bool) -> (Option<ReplayLog>, String) {
        let mut prefix = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut prefix);
        let id = BASE32.encode(&prefix);
        if disabled {
            return (None, id);
        }

        let filename = format!(
            "{}-{}.json.lz4",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            id
        );
        let file = match std::fs::File::create(dir.join(filename)) {
            Ok(file) => file,
            Err(e) => {
                warn!("creating replay log: {e}");
                return (None, id);
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::task::spawn_blocking(move || {
            let mut encoder = FrameEncoder::new(file);
            while let Some(line) = rx.blocking_recv() {
                if let Err(e) = encoder.write_all(&line).and_then(|_| encoder.write_all(b"\n")) {
                    warn!("writing replay log: {e}");
                }
            }
            if let Err(e) = encoder.finish() {
                warn!("closing replay log: {e}");
            }
        });

        (Some(ReplayLog { tx: Some(tx) }), id)
    }

    /// Write the player identity map. Call once, before the first state.
    pub fn log_players(&self, slots: &BTreeMap<u8, PlayerSlot>) {
        let entries: BTreeMap<u8, PlayerEntry> = slots
            .iter()
            .map(|(&id, slot)| {
                (
                    id,
                    PlayerEntry {
                        api_key: slot.api_key().unwrap_or_default().to_string(),
                        pseudonym: slot.pseudonym.clone(),
                        ai: slot.bot_name().unwrap_or_default().to_string(),
                    },
                )
            })
            .collect();
        self.send(&entries);
    }

    /// Append one game state.
    pub fn log_state(&self, state: &GameState) {
        self.send(state);
    }

    fn send<T: Serialize>(&self, value: &T) {
        let Some(tx) = &self.tx else { return };
        match serde_json::to_vec(value) {
            Ok(line) => {
                let _ = tx.send(line);
            }
            Err(e) => warn!("encoding replay line: {e}"),
        }
    }

    /// Close the queue; the writer finishes the file. Idempotent.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

// =============================================================================
// TESTS
// =============================================================================
