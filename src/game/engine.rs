//! The round loop.
//!
//! An [`Engine`] owns one match: the game state, one [`PlayerSlot`] per
//! participant and the collaborator handles. Each round it broadcasts the
//! state, collects at most one action per active player under a hard
//! deadline, applies all actions simultaneously in player-id order and
//! adjudicates crashes globally.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::game::state::{is_valid_action, Action, Direction, GameState, PathCell, PlayerState};
use crate::network::auth::TokenTicket;
use crate::replay::ReplayLog;
use crate::stats::{GameStats, PlayerStats, StatsHandle};
use crate::{
    FIELD_MAX_SIZE, FIELD_MIN_SIZE, ROUND_TIMEOUT_GRACE, ROUND_TIMEOUT_MAX, ROUND_TIMEOUT_MIN,
};

/// Timing knobs of a match. Production uses the defaults; tests shrink them
/// so whole matches run in milliseconds.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Minimum round time in seconds.
    pub round_timeout_min: u64,
    /// Maximum round time in seconds.
    pub round_timeout_max: u64,
    /// Extra seconds the engine keeps accepting answers past the deadline.
    pub round_grace: u64,
    /// Directory for replay logs.
    pub log_dir: PathBuf,
    /// Disables replay logging entirely.
    pub disable_logging: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            round_timeout_min: ROUND_TIMEOUT_MIN,
            round_timeout_max: ROUND_TIMEOUT_MAX,
            round_grace: ROUND_TIMEOUT_GRACE,
            log_dir: PathBuf::from("./log"),
            disable_logging: false,
        }
    }
}

// =============================================================================
// PLAYER SLOTS
// =============================================================================

/// The far side of a participant: a remote connection or an attached bot.
pub enum Endpoint {
    /// Serialized states are pushed to the connection's writer task; the
    /// ticket returns the API key credit when the player is done.
    Remote {
        /// Outbound queue drained by the connection's writer task.
        out: mpsc::UnboundedSender<String>,
        /// Claimed API key credit, released when the player is done.
        ticket: Arc<TokenTicket>,
    },
    /// A built-in player attached in place of a connection.
    Bot(Box<dyn Bot>),
}

/// One participant of a match, before and during the game.
pub struct PlayerSlot {
    /// Pseudonym, revealed to everyone at game end.
    pub pseudonym: String,
    endpoint: Option<Endpoint>,
    /// Inbound action buffer; `None` once the player has been invalidated.
    input: Option<mpsc::Receiver<String>>,
}

impl PlayerSlot {
    /// Wire a freshly upgraded connection into a slot.
    pub fn remote(
        pseudonym: String,
        ticket: Arc<TokenTicket>,
        out: mpsc::UnboundedSender<String>,
        input: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            pseudonym,
            endpoint: Some(Endpoint::Remote { out, ticket }),
            input: Some(input),
        }
    }

    /// Wire a freshly drawn bot into a slot, handing it the same bounded
    /// input channel the engine will read from.
    pub fn bot(pseudonym: String, mut bot: Box<dyn Bot>) -> Self {
        let (tx, rx) = mpsc::channel(crate::INPUT_BUFFER);
        bot.attach_input(tx);
        Self {
            pseudonym,
            endpoint: Some(Endpoint::Bot(bot)),
            input: Some(rx),
        }
    }

    /// API key of a remote participant, `None` for bots.
    pub fn api_key(&self) -> Option<&str> {
        match &self.endpoint {
            Some(Endpoint::Remote { ticket, .. }) => Some(ticket.key()),
            _ => None,
        }
    }

    /// Registry name of an attached bot, `None` for remote players.
    pub fn bot_name(&self) -> Option<&'static str> {
        match &self.endpoint {
            Some(Endpoint::Bot(bot)) => Some(bot.name()),
            _ => None,
        }
    }

    fn label(&self) -> &str {
        match &self.endpoint {
            Some(Endpoint::Remote { ticket, .. }) => ticket.key(),
            _ => &self.pseudonym,
        }
    }

    /// Deliver the current state. Remote players get one framed JSON
    /// message; bots get a mutable public copy with `you` already set.
    fn write_state(&mut self, state: &GameState) {
        match &mut self.endpoint {
            Some(Endpoint::Remote { out, ticket }) => {
                match serde_json::to_string(state) {
                    Ok(json) => {
                        if out.send(json).is_err() {
                            // Writer is gone; the reader will close the input
                            // channel and the engine invalidates from there.
                            ticket.release();
                        }
                    }
                    Err(e) => warn!("serializing state: {e}"),
                }
            }
            Some(Endpoint::Bot(bot)) => {
                let mut copy = state.public_copy();
                bot.on_state(&mut copy);
            }
            None => {}
        }
    }

    /// Release all underlying resources. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            if let Endpoint::Remote { ticket, .. } = endpoint {
                ticket.release();
            }
            // Dropping the sender ends the writer task and with it the
            // socket; dropping a bot simply discards it.
        }
        self.input = None;
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Runs one match from initialization to the final broadcast.
pub struct Engine {
    state: GameState,
    slots: BTreeMap<u8, PlayerSlot>,
    answers: BTreeMap<u8, Option<String>>,
    config: MatchConfig,
    stats: Option<StatsHandle>,
}

impl Engine {
    /// Take over a full lobby. Player ids are assigned 1..N in join order.
    pub fn new(slots: Vec<PlayerSlot>, config: MatchConfig, stats: Option<StatsHandle>) -> Self {
        let slots: BTreeMap<u8, PlayerSlot> = slots
            .into_iter()
            .enumerate()
            .map(|(i, s)| (i as u8 + 1, s))
            .collect();
        Self {
            state: GameState::new(0, 0),
            slots,
            answers: BTreeMap::new(),
            config,
            stats,
        }
    }

    /// Run the match to completion. Returns the winner's id, or `None` for
    /// a draw.
    pub async fn run(mut self) -> Option<u8> {
        let (mut log, game_id) = ReplayLog::create(&self.config.log_dir, self.config.disable_logging);
        info!(game = %game_id, players = self.slots.len(), "game starting");

        if let Some(log) = &log {
            log.log_players(&self.slots);
        }

        self.init_board();
        self.state.running = true;
        self.notify_start(&game_id);

        loop {
            let timeout = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.config.round_timeout_min..=self.config.round_timeout_max)
            };
            let deadline = Utc::now() + chrono::Duration::seconds(timeout as i64);
            self.state.deadline = Some(deadline.to_rfc3339_opts(SecondsFormat::Secs, true));
            self.broadcast(log.as_ref());

            let hard_deadline =
                Instant::now() + Duration::from_secs(timeout + self.config.round_grace);
            self.collect_actions(hard_deadline).await;
            self.process_actions();
            let paths = self.move_players();
            self.adjudicate(paths);

            if self.state.active_count() <= 1 {
                break;
            }
        }

        self.finish(&game_id, log.as_mut())
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Sample the board, place every player in its own region and write the
    /// initial trail cells.
    fn init_board(&mut self) {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(FIELD_MIN_SIZE + 1..=FIELD_MAX_SIZE + 1);
        let height = rng.gen_range(FIELD_MIN_SIZE + 1..=FIELD_MAX_SIZE + 1);
        self.state = GameState::new(width, height);

        // The board is split into a 4x2 grid of regions; each player gets a
        // random cell of its own shuffled region.
        let region_width = width / 4;
        let region_height = height / 2;
        let mut regions: Vec<i32> = (0..8).collect();
        regions.shuffle(&mut rng);

        let ids: Vec<u8> = self.slots.keys().copied().collect();
        for (region, id) in regions.iter().zip(ids) {
            let x0 = (region % 4) * region_width;
            let y0 = (region / 4) * region_height;
            let x = x0 + rng.gen_range(0..region_width);
            let y = y0 + rng.gen_range(0..region_height);

            // Initial direction points inward, toward the board center.
            let direction = match (x > width / 2, y > height / 2) {
                (true, true) => Direction::Up,
                (false, true) => Direction::Right,
                (true, false) => Direction::Left,
                (false, false) => Direction::Down,
            };

            self.state.players.insert(id, PlayerState::new(x, y, direction));
            self.state.set_cell(x, y, id as i8);
        }
    }

    fn notify_start(&self, game_id: &str) {
        let Some(stats) = &self.stats else { return };
        let mut players = BTreeMap::new();
        for (&id, slot) in &self.slots {
            let entry = if let Some(name) = slot.bot_name() {
                PlayerStats {
                    key: name.to_string(),
                    pseudonym: slot.pseudonym.clone(),
                    bot: true,
                }
            } else {
                let key = slot.api_key().unwrap_or_default().to_string();
                stats.lobby_left(key.clone());
                PlayerStats {
                    key,
                    pseudonym: slot.pseudonym.clone(),
                    bot: false,
                }
            };
            players.insert(id, entry);
        }
        stats.game_started(GameStats {
            key: game_id.to_string(),
            start: Utc::now(),
            players,
        });
    }

    // -------------------------------------------------------------------------
    // Round phases
    // -------------------------------------------------------------------------

    /// Send the state to every player, with `you` set to the recipient's id
    /// and reset to 0 afterwards. The logged state carries `you = 0`.
    fn broadcast(&mut self, log: Option<&ReplayLog>) {
        let ids: Vec<u8> = self.slots.keys().copied().collect();
        for id in ids {
            self.state.you = id;
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.write_state(&self.state);
            }
        }
        self.state.you = 0;
        if let Some(log) = log {
            log.log_state(&self.state);
        }
    }

    /// Collect one action per active player, ending early as soon as every
    /// still-active player has answered or been invalidated, else at the
    /// hard deadline.
    async fn collect_actions(&mut self, hard_deadline: Instant) {
        self.answers = self.slots.keys().map(|&id| (id, None)).collect();
        loop {
            if self.round_complete() {
                return;
            }
            let received = timeout_at(hard_deadline, Self::recv_any(&mut self.slots)).await;
            match received {
                Err(_) => return, // deadline
                Ok((id, message)) => self.record_answer(id, message),
            }
        }
    }

    /// Wait for the next message on any live input channel.
    async fn recv_any(slots: &mut BTreeMap<u8, PlayerSlot>) -> (u8, Option<String>) {
        let futures: Vec<_> = slots
            .iter_mut()
            .filter_map(|(&id, slot)| {
                slot.input
                    .as_mut()
                    .map(|rx| Box::pin(async move { (id, rx.recv().await) }))
            })
            .collect();
        if futures.is_empty() {
            // round_complete() prevents this; never resolve.
            std::future::pending::<()>().await;
            unreachable!();
        }
        let ((id, message), _, _) = futures_util::future::select_all(futures).await;
        (id, message)
    }

    /// Every player with a live channel has answered.
    fn round_complete(&self) -> bool {
        self.slots.iter().all(|(id, slot)| {
            slot.input.is_none() || self.answers.get(id).is_some_and(Option::is_some)
        })
    }

    fn record_answer(&mut self, id: u8, message: Option<String>) {
        match message {
            None => {
                debug!(player = id, "input channel closed");
                self.invalidate(id);
            }
            Some(action) => {
                let duplicate = self.answers.get(&id).is_some_and(Option::is_some);
                if action.is_empty() || duplicate || !is_valid_action(&action) {
                    let label = self.slots.get(&id).map(|s| s.label().to_string());
                    warn!(player = id, from = ?label, answer = %action, "invalid answer");
                    self.invalidate(id);
                } else {
                    self.answers.insert(id, Some(action));
                }
            }
        }
    }

    /// Apply the collected answers in player-id order. An empty slot, an
    /// unknown action or a speed bound escape invalidates the player.
    fn process_actions(&mut self) {
        let ids: Vec<u8> = self.slots.keys().copied().collect();
        for id in ids {
            let action = self
                .answers
                .get(&id)
                .and_then(|a| a.as_deref())
                .and_then(Action::parse);
            match action {
                None => self.invalidate(id),
                Some(action) => {
                    let valid = self
                        .state
                        .players
                        .get_mut(&id)
                        .map(|p| p.apply(action))
                        .unwrap_or(false);
                    if !valid {
                        self.invalidate(id);
                    }
                }
            }
        }
    }

    /// Move every active player onto the board, in id order.
    fn move_players(&mut self) -> BTreeMap<u8, Vec<PathCell>> {
        let ids: Vec<u8> = self.slots.keys().copied().collect();
        let mut paths = BTreeMap::new();
        for id in ids {
            if !self.state.players.get(&id).map(|p| p.active).unwrap_or(false) {
                continue;
            }
            let outcome = self.state.move_player(id);
            if outcome.off_grid {
                self.invalidate(id);
            }
            paths.insert(id, outcome.path);
        }
        paths
    }

    /// Global crash adjudication: any player whose travelled path crosses a
    /// collision cell (holes exempt) is invalidated. Running after all
    /// movement makes head-on and side-on collisions symmetric.
    fn adjudicate(&mut self, paths: BTreeMap<u8, Vec<PathCell>>) {
        for (id, path) in paths {
            if !self.state.players.get(&id).map(|p| p.active).unwrap_or(false) {
                continue;
            }
            if self.state.path_crashes(&path) {
                self.invalidate(id);
            }
        }
    }

    /// Deactivate a player and stop reading its input. The slot itself is
    /// closed at game end.
    fn invalidate(&mut self, id: u8) {
        self.state.deactivate(id);
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.input = None;
        }
    }

    // -------------------------------------------------------------------------
    // End of match
    // -------------------------------------------------------------------------

    fn finish(&mut self, game_id: &str, log: Option<&mut ReplayLog>) -> Option<u8> {
        self.state.running = false;
        for (id, slot) in &self.slots {
            if let Some(p) = self.state.players.get_mut(id) {
                p.name = Some(slot.pseudonym.clone());
            }
        }
        self.state.deadline = None;
        self.broadcast(log.as_deref());

        let winner = self
            .state
            .players
            .iter()
            .find(|(_, p)| p.active)
            .map(|(&id, _)| id);

        let winner_label = match winner {
            Some(id) => {
                let slot = &self.slots[&id];
                match slot.bot_name() {
                    Some(name) => format!("#AI#-{name}"),
                    None => format!("#Player#-{}", slot.label()),
                }
            }
            None => "none".to_string(),
        };

        for slot in self.slots.values_mut() {
            slot.close();
        }

        info!(game = %game_id, winner = %winner_label, "game ending");

        if let Some(stats) = &self.stats {
            stats.game_ended(game_id.to_string());
        }
        if let Some(log) = log {
            log.close();
        }
        winner
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::CELL_COLLISION;
    use crate::network::auth::TokenGate;

    /// A bot that answers `change_nothing` every round.
    struct Idle {
        input: Option<mpsc::Sender<String>>,
    }

    impl Idle {
        fn boxed() -> Box<dyn Bot> {
            Box::new(Idle { input: None })
        }
    }

    impl Bot for Idle {
        fn name(&self) -> &'static str {
            "Idle"
        }

        fn attach_input(&mut self, tx: mpsc::Sender<String>) {
            self.input = Some(tx);
        }

        fn on_state(&mut self, game: &mut GameState) {
            if !game.running {
                return;
            }
            if let Some(tx) = &self.input {
                let _ = tx.try_send(Action::ChangeNothing.as_str().to_string());
            }
        }
    }

    fn fast_config() -> MatchConfig {
        MatchConfig {
            round_timeout_min: 0,
            round_timeout_max: 0,
            round_grace: 0,
            disable_logging: true,
            ..Default::default()
        }
    }

    fn bot_slot(name: &str) -> PlayerSlot {
        PlayerSlot::bot(name.to_string(), Idle::boxed())
    }

    fn remote_slot(key: &str) -> (PlayerSlot, mpsc::Sender<String>, mpsc::UnboundedReceiver<String>) {
        let gate = Arc::new(TokenGate::from_tokens([key]));
        assert!(matches!(gate.claim(key), crate::network::auth::TokenCheck::Ok));
        let ticket = Arc::new(TokenTicket::new(gate, key.to_string()));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(crate::INPUT_BUFFER);
        let slot = PlayerSlot::remote(format!("pseudo-{key}"), ticket, out_tx, in_rx);
        (slot, in_tx, out_rx)
    }

    #[test]
    fn test_init_board_invariants() {
        let mut engine = Engine::new(
            vec![bot_slot("a"), bot_slot("b"), bot_slot("c")],
            fast_config(),
            None,
        );
        engine.init_board();
        let state = &engine.state;

        assert!(state.width > FIELD_MIN_SIZE && state.width <= FIELD_MAX_SIZE + 1);
        assert!(state.height > FIELD_MIN_SIZE && state.height <= FIELD_MAX_SIZE + 1);
        assert_eq!(state.players.len(), 3);
        for (&id, p) in &state.players {
            assert!(p.active);
            assert_eq!(p.speed, 1);
            assert!(state.in_bounds(p.x, p.y));
            assert_eq!(state.cell(p.x, p.y), id as i8);
        }
    }

    #[tokio::test]
    async fn test_bot_match_runs_to_completion() {
        let engine = Engine::new(vec![bot_slot("a"), bot_slot("b")], fast_config(), None);
        // Two straight-line players always end at a wall or each other.
        let _winner = engine.run().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_player_is_invalidated_at_deadline() {
        let (slot, _in_tx, mut out_rx) = remote_slot("key-1");
        let engine = Engine::new(vec![slot, bot_slot("b")], fast_config(), None);
        let winner = engine.run().await;

        // The silent remote player loses by timeout; the bot survives the
        // very first round and wins.
        assert_eq!(winner, Some(2));

        // First broadcast announced a running game to the remote player.
        let first = out_rx.recv().await.expect("broadcast");
        let v: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(v["running"], true);
        assert_eq!(v["you"], 1);
        assert!(v["deadline"].is_string());
    }

    #[tokio::test]
    async fn test_second_action_in_round_invalidates() {
        let (slot, in_tx, _out_rx) = remote_slot("key-2");
        let mut engine = Engine::new(vec![slot], fast_config(), None);
        engine.init_board();

        in_tx.try_send("change_nothing".to_string()).unwrap();
        in_tx.try_send("turn_left".to_string()).unwrap();

        // Generous deadline: completion must come from invalidation, not
        // timeout.
        engine
            .collect_actions(Instant::now() + Duration::from_secs(5))
            .await;
        assert!(!engine.state.players[&1].active);
        assert!(engine.slots[&1].input.is_none());
    }

    #[tokio::test]
    async fn test_invalid_action_string_invalidates() {
        let (slot, in_tx, _out_rx) = remote_slot("key-3");
        let mut engine = Engine::new(vec![slot], fast_config(), None);
        engine.init_board();

        in_tx.try_send("strafe_left".to_string()).unwrap();
        engine
            .collect_actions(Instant::now() + Duration::from_secs(5))
            .await;
        assert!(!engine.state.players[&1].active);
    }

    #[tokio::test]
    async fn test_closed_channel_invalidates() {
        let (slot, in_tx, _out_rx) = remote_slot("key-4");
        let mut engine = Engine::new(vec![slot], fast_config(), None);
        engine.init_board();

        drop(in_tx);
        engine
            .collect_actions(Instant::now() + Duration::from_secs(5))
            .await;
        assert!(!engine.state.players[&1].active);
    }

    #[tokio::test]
    async fn test_round_ends_early_when_all_answered() {
        let (slot_a, in_a, _out_a) = remote_slot("key-5");
        let (slot_b, in_b, _out_b) = remote_slot("key-6");
        let mut engine = Engine::new(vec![slot_a, slot_b], fast_config(), None);
        engine.init_board();

        in_a.try_send("change_nothing".to_string()).unwrap();
        in_b.try_send("turn_left".to_string()).unwrap();

        // A one-hour deadline: if early completion is broken this hangs and
        // the test harness times out.
        engine
            .collect_actions(Instant::now() + Duration::from_secs(3600))
            .await;
        assert_eq!(engine.answers[&1].as_deref(), Some("change_nothing"));
        assert_eq!(engine.answers[&2].as_deref(), Some("turn_left"));
    }

    #[test]
    fn test_head_on_collision_ends_in_draw() {
        let mut engine = Engine::new(vec![bot_slot("a"), bot_slot("b")], fast_config(), None);
        engine.state = GameState::new(40, 41);
        engine
            .state
            .players
            .insert(1, PlayerState::new(10, 20, Direction::Right));
        engine
            .state
            .players
            .insert(2, PlayerState::new(11, 20, Direction::Left));
        engine.state.set_cell(10, 20, 1);
        engine.state.set_cell(11, 20, 2);
        engine.state.running = true;

        engine.answers = [(1, Some("change_nothing".to_string())), (2, Some("change_nothing".to_string()))]
            .into_iter()
            .collect();
        engine.process_actions();
        let paths = engine.move_players();
        engine.adjudicate(paths);

        assert_eq!(engine.state.cell(10, 20), CELL_COLLISION);
        assert_eq!(engine.state.cell(11, 20), CELL_COLLISION);
        assert_eq!(engine.state.active_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_reveals_names_and_releases_tokens() {
        let gate = Arc::new(TokenGate::from_tokens(["key-7"]));
        assert!(matches!(gate.claim("key-7"), crate::network::auth::TokenCheck::Ok));
        let ticket = Arc::new(TokenTicket::new(gate.clone(), "key-7".to_string()));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::channel(crate::INPUT_BUFFER);
        let slot = PlayerSlot::remote("Nussknacker-Jazz-Paket".to_string(), ticket, out_tx, in_rx);

        let mut engine = Engine::new(vec![slot], fast_config(), None);
        engine.init_board();
        engine.state.running = true;
        let winner = engine.finish("test-game", None);

        assert_eq!(winner, Some(1));
        let last = out_rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&last).unwrap();
        assert_eq!(v["running"], false);
        assert!(v.get("deadline").is_none());
        assert_eq!(v["players"]["1"]["name"], "Nussknacker-Jazz-Paket");

        // Token credit is back: a new claim succeeds.
        assert!(matches!(gate.claim("key-7"), crate::network::auth::TokenCheck::Ok));
    }
}
