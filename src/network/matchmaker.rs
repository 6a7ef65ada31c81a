//! Matchmaking: one open lobby, bot padding, match launch.
//!
//! At most one lobby is open at a time. Connections are attached to it as
//! they arrive; once the lobby reaches its per-match player count the engine
//! is spawned as a detached task. A background tick pads lobbies that have
//! waited too long with bots drawn from the pool.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::interval;
use tracing::{info, warn};

use crate::bot::BotRegistry;
use crate::game::engine::{Engine, MatchConfig, PlayerSlot};
use crate::pseudonym::Pseudonyms;
use crate::stats::StatsHandle;
use crate::PLAYERS_PER_GAME;

/// Period of the lobby-age check.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// A not-yet-started game. The per-match player count is sampled at
/// creation from `[2, PLAYERS_PER_GAME]`.
struct Lobby {
    slots: Vec<PlayerSlot>,
    max_player: usize,
    born: Instant,
}

impl Lobby {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            max_player: rand::thread_rng().gen_range(2..=PLAYERS_PER_GAME),
            born: Instant::now(),
        }
    }

    /// Attach a player; hands the slot back if the lobby is full.
    fn add(&mut self, slot: PlayerSlot) -> Result<(), PlayerSlot> {
        if self.slots.len() >= self.max_player {
            return Err(slot);
        }
        self.slots.push(slot);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.slots.len() == self.max_player
    }

    fn missing(&self) -> usize {
        self.max_player.saturating_sub(self.slots.len())
    }

    fn contains_token(&self, key: &str) -> bool {
        self.slots.iter().any(|s| s.api_key() == Some(key))
    }
}

/// Composes connections and bots into ready games.
pub struct Matchmaker {
    open: Mutex<Option<Lobby>>,
    registry: Arc<BotRegistry>,
    pseudonyms: Arc<Pseudonyms>,
    stats: Option<StatsHandle>,
    match_config: MatchConfig,
    max_wait: Duration,
}

impl Matchmaker {
    /// A matchmaker with no open lobby yet.
    pub fn new(
        registry: Arc<BotRegistry>,
        pseudonyms: Arc<Pseudonyms>,
        stats: Option<StatsHandle>,
        match_config: MatchConfig,
        max_wait: Duration,
    ) -> Self {
        Self {
            open: Mutex::new(None),
            registry,
            pseudonyms,
            stats,
            match_config,
            max_wait,
        }
    }

    /// Whether the given API key is already attached to the open lobby.
    pub fn contains_token(&self, key: &str) -> bool {
        self.open
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.contains_token(key))
            .unwrap_or(false)
    }

    /// Attach a player to the open lobby, starting the game if that made it
    /// ready. Hands the slot back only in the pathological full-but-not-
    /// ready case. The engine task is spawned after the lobby slot is
    /// released.
    pub fn admit(&self, slot: PlayerSlot) -> Result<(), PlayerSlot> {
        let mut ready = None;
        {
            let mut open = self.open.lock().unwrap();
            let lobby = open.get_or_insert_with(Lobby::new);

            if let Err(slot) = lobby.add(slot) {
                // Full lobby that never started: start it now and retry once
                // on a fresh one.
                if lobby.is_ready() {
                    ready = open.take();
                    let lobby = open.insert(Lobby::new());
                    if let Err(slot) = lobby.add(slot) {
                        if let Some(lobby) = ready {
                            self.start(lobby);
                        }
                        return Err(slot);
                    }
                } else {
                    warn!("open lobby full but not ready");
                    return Err(slot);
                }
            }

            if open.as_ref().map(|l| l.is_ready()).unwrap_or(false) {
                ready = open.take();
            }
        }
        if let Some(lobby) = ready {
            self.start(lobby);
        }
        Ok(())
    }

    /// Spawn the engine for a full lobby as a detached task.
    fn start(&self, lobby: Lobby) {
        let engine = Engine::new(lobby.slots, self.match_config.clone(), self.stats.clone());
        tokio::spawn(async move {
            engine.run().await;
        });
    }

    /// Pad the lobby with bots until ready.
    fn pad_with_bots(&self, lobby: &mut Lobby) {
        while !lobby.is_ready() {
            for drawn in self.registry.draw(lobby.missing()) {
                let pseudonym = self.pseudonyms.get(&drawn.alias);
                if lobby.add(PlayerSlot::bot(pseudonym, drawn.bot)).is_err() {
                    return;
                }
            }
        }
    }

    /// Run the lobby-age check every second: a lobby older than the
    /// configured wait is padded with bots and started.
    pub fn spawn_wait_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(TICK_PERIOD);
            loop {
                ticker.tick().await;
                let lobby = {
                    let mut open = this.open.lock().unwrap();
                    match open.as_ref() {
                        Some(lobby) if lobby.born.elapsed() > this.max_wait => open.take(),
                        _ => None,
                    }
                };
                if let Some(mut lobby) = lobby {
                    info!(
                        players = lobby.slots.len(),
                        missing = lobby.missing(),
                        "lobby wait expired, padding with bots"
                    );
                    this.pad_with_bots(&mut lobby);
                    this.start(lobby);
                }
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
