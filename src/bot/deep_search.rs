//! Bounded depth-first search bot.

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::bot::search::{mark_dead_zones, plan_step, undo, StepOutcome};
use crate::bot::{random_safe, Bot};
use crate::game::state::{Action, GameState};
use crate::{HOLES_EACH_STEP, MAX_SPEED};

/// Search horizon in rounds.
const MAX_DEPTH: u32 = HOLES_EACH_STEP * 2;

/// Speed ceiling during search; higher speeds rarely survive the horizon.
const SEARCH_SPEED_CAP: i32 = 5;

fn candidates(game: &GameState) -> Vec<Action> {
    let speed = game.players[&game.you].speed;
    let mut actions = vec![Action::TurnLeft, Action::TurnRight, Action::ChangeNothing];
    if speed > 1 {
        actions.push(Action::SlowDown);
    }
    if speed < SEARCH_SPEED_CAP && speed < MAX_SPEED {
        actions.push(Action::SpeedUp);
    }
    actions.shuffle(&mut rand::thread_rng());
    actions
}

/// Longest surviving action sequence from the current state, up to `depth`.
fn survivable_depth(game: &mut GameState, depth: u32) -> u32 {
    if depth == 0 {
        return 0;
    }
    let you = game.you;
    let mut found = 0;
    for action in candidates(game) {
        let (outcome, revert) = plan_step(game, you, action);
        if outcome != StepOutcome::Crashed {
            let reach = 1 + survivable_depth(game, depth - 1);
            if reach > found {
                found = reach;
            }
        }
        undo(game, you, &revert);
        if found == depth {
            break;
        }
    }
    found
}

/// First action of the deepest surviving branch, or the random-safe choice
/// when every branch dies immediately.
pub fn choose(game: &mut GameState) -> Action {
    mark_dead_zones(game);
    let you = game.you;

    let mut best: Option<(Action, u32)> = None;
    for action in candidates(game) {
        let (outcome, revert) = plan_step(game, you, action);
        if outcome == StepOutcome::Crashed {
            undo(game, you, &revert);
            continue;
        }
        let reach = 1 + survivable_depth(game, MAX_DEPTH - 1);
        undo(game, you, &revert);
        if best.map(|(_, r)| reach > r).unwrap_or(true) {
            best = Some((action, reach));
            if reach == MAX_DEPTH {
                break;
            }
        }
    }

    match best {
        Some((action, _)) => action,
        None => random_safe::choose(game),
    }
}

/// Limited-depth DFS over action sequences on the public copy.
pub struct DeepSearch {
    input: Option<mpsc::Sender<String>>,
}

impl DeepSearch {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(DeepSearch { input: None })
    }
}

impl Bot for DeepSearch {
    fn name(&self) -> &'static str {
        "DeepSearch"
    }

    fn attach_input(&mut self, tx: mpsc::Sender<String>) {
        self.input = Some(tx);
    }

    fn on_state(&mut self, game: &mut GameState) {
        let Some(tx) = &self.input else { return };
        if !game.running || !game.players.get(&game.you).map(|p| p.active).unwrap_or(false) {
            return;
        }
        let action = choose(game);
        let _ = tx.try_send(action.as_str().to_string());
    }
}
