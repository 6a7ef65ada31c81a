//! Mirror bot: shadows another player's moves.

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::game::state::{Action, GameState};
use crate::MAX_SPEED;

/// Picks a random other active player on its first round and afterwards
/// emits whatever action would reproduce that player's observed speed and
/// direction deltas.
pub struct Mirror {
    input: Option<mpsc::Sender<String>>,
    target: u8,
    target_speed: i32,
    target_direction: Option<crate::game::Direction>,
}

impl Mirror {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(Mirror {
            input: None,
            target: 0,
            target_speed: 0,
            target_direction: None,
        })
    }
}

impl Bot for Mirror {
    fn name(&self) -> &'static str {
        "Mirror"
    }

    fn attach_input(&mut self, tx: mpsc::Sender<String>) {
        self.input = Some(tx);
    }

    fn on_state(&mut self, game: &mut GameState) {
        let Some(tx) = &self.input else { return };
        if !game.running || !game.players.get(&game.you).map(|p| p.active).unwrap_or(false) {
            return;
        }

        // Target gone? Find a new one.
        if self.target != 0 && !game.players.get(&self.target).map(|p| p.active).unwrap_or(false) {
            self.target = 0;
        }

        if self.target == 0 {
            let candidates: Vec<u8> = game
                .players
                .iter()
                .filter(|&(&id, p)| id != game.you && p.active)
                .map(|(&id, _)| id)
                .collect();
            let Some(&target) = candidates.choose(&mut rand::thread_rng()) else {
                let _ = tx.try_send(Action::ChangeNothing.as_str().to_string());
                return;
            };
            self.target = target;
            self.target_speed = game.players[&target].speed;
            self.target_direction = Some(game.players[&target].direction);
            let _ = tx.try_send(Action::ChangeNothing.as_str().to_string());
            return;
        }

        let observed = &game.players[&self.target];
        let me = &game.players[&game.you];
        let mut action = Action::ChangeNothing;

        if observed.speed > self.target_speed {
            self.target_speed = observed.speed;
            if me.speed < MAX_SPEED {
                action = Action::SpeedUp;
            }
        } else if observed.speed < self.target_speed {
            self.target_speed = observed.speed;
            if me.speed > 1 {
                action = Action::SlowDown;
            }
        } else if let Some(prev) = self.target_direction {
            if observed.direction != prev {
                if observed.direction == prev.turned_left() {
                    action = Action::TurnLeft;
                } else if observed.direction == prev.turned_right() {
                    action = Action::TurnRight;
                }
                self.target_direction = Some(observed.direction);
            }
        }

        let _ = tx.try_send(action.as_str().to_string());
    }
}
