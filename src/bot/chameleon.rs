//! Dispatcher bot: delegates to a randomly picked sub-policy.

use rand::Rng;
use tokio::sync::mpsc;

use crate::bot::search::free_run;
use crate::bot::{deep_search, random_safe, script, survivor, Bot};
use crate::game::state::{Action, Direction, GameState};

/// Re-pick probability per round.
const REPICK_CHANCE: f64 = 0.1;

/// Lazily picks one of the other policies and forwards rounds to it,
/// re-picking occasionally. While its own speed is above 1 it overrides the
/// sub-policy with a one-shot safe deceleration or turn, because most
/// sub-policies only reason about speed 1.
pub struct Chameleon {
    input: Option<mpsc::Sender<String>>,
    sub: Option<Box<dyn Bot>>,
}

impl Chameleon {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(Chameleon {
            input: None,
            sub: None,
        })
    }

    /// A safe action at speed > 1, tried in the order slow down, turn left,
    /// turn right. Falls back to slowing down.
    fn safe_high_speed_action(game: &GameState) -> Action {
        let p = &game.players[&game.you];

        // Slowing down shortens the move by one cell.
        if Self::clear_run(game, p.x, p.y, p.direction, p.speed - 1) {
            return Action::SlowDown;
        }
        for (direction, action) in [
            (p.direction.turned_left(), Action::TurnLeft),
            (p.direction.turned_right(), Action::TurnRight),
        ] {
            if Self::clear_run(game, p.x, p.y, direction, p.speed) {
                return action;
            }
        }
        Action::SlowDown
    }

    fn clear_run(game: &GameState, x: i32, y: i32, direction: Direction, cells: i32) -> bool {
        free_run(game, x, y, direction) >= cells
    }
}

impl Bot for Chameleon {
    fn name(&self) -> &'static str {
        "Chameleon"
    }

    fn attach_input(&mut self, tx: mpsc::Sender<String>) {
        self.input = Some(tx);
    }

    fn on_state(&mut self, game: &mut GameState) {
        let Some(tx) = &self.input else { return };
        if !game.running || !game.players.get(&game.you).map(|p| p.active).unwrap_or(false) {
            return;
        }

        if rand::thread_rng().gen_bool(REPICK_CHANCE) {
            self.sub = None;
        }

        if self.sub.is_none() {
            if game.players[&game.you].speed > 1 {
                let action = Self::safe_high_speed_action(game);
                let _ = tx.try_send(action.as_str().to_string());
                return;
            }
            let mut sub = match rand::thread_rng().gen_range(0..4) {
                0 => survivor::Survivor::boxed(),
                1 => deep_search::DeepSearch::boxed(),
                2 => random_safe::RandomSafe::boxed(),
                _ => script::Script::boxed(),
            };
            sub.attach_input(tx.clone());
            self.sub = Some(sub);
        }

        if let Some(sub) = &mut self.sub {
            sub.on_state(game);
        }
    }
}
