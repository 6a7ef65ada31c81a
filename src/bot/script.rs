//! Scripted bot: replays a fixed program of actions.

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::game::state::{Action, GameState};

/// A small preset of fixed programs. Whatever the board looks like, the
/// program is played to its end; once exhausted the bot answers
/// `change_nothing` until it crashes.
const PROGRAMS: [&[Action]; 3] = [
    // A widening staircase.
    &[
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::TurnRight,
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::TurnRight,
        Action::ChangeNothing,
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::TurnRight,
    ],
    // A comb pattern.
    &[
        Action::ChangeNothing,
        Action::TurnRight,
        Action::TurnRight,
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::TurnLeft,
        Action::ChangeNothing,
        Action::TurnRight,
        Action::TurnRight,
        Action::ChangeNothing,
    ],
    // An outward spiral.
    &[
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::ChangeNothing,
        Action::ChangeNothing,
        Action::TurnLeft,
        Action::ChangeNothing,
        Action::ChangeNothing,
        Action::ChangeNothing,
        Action::TurnLeft,
    ],
];

/// Replays one randomly chosen preset program, then idles.
pub struct Script {
    input: Option<mpsc::Sender<String>>,
    program: Option<&'static [Action]>,
    cursor: usize,
}

impl Script {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(Script {
            input: None,
            program: None,
            cursor: 0,
        })
    }
}

impl Bot for Script {
    fn name(&self) -> &'static str {
        "Script"
    }

    fn attach_input(&mut self, tx: mpsc::Sender<String>) {
        self.input = Some(tx);
    }

    fn on_state(&mut self, game: &mut GameState) {
        let Some(tx) = &self.input else { return };
        if !game.running || !game.players.get(&game.you).map(|p| p.active).unwrap_or(false) {
            return;
        }

        let program = *self
            .program
            .get_or_insert_with(|| *PROGRAMS.choose(&mut rand::thread_rng()).unwrap());

        let action = program.get(self.cursor).copied().unwrap_or(Action::ChangeNothing);
        self.cursor += 1;
        let _ = tx.try_send(action.as_str().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::PlayerState;
    use crate::game::Direction;

    fn game_for(id: u8) -> GameState {
        let mut g = GameState::new(50, 50);
        g.players.insert(id, PlayerState::new(25, 25, Direction::Right));
        g.you = id;
        g.running = true;
        g
    }

    #[test]
    fn test_replays_program_then_idles() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut bot = Script {
            input: Some(tx),
            program: Some(PROGRAMS[0]),
            cursor: 0,
        };
        let mut g = game_for(1);

        for _ in 0..PROGRAMS[0].len() + 3 {
            bot.on_state(&mut g);
        }
        for &expected in PROGRAMS[0] {
            assert_eq!(rx.try_recv().unwrap(), expected.as_str());
        }
        for _ in 0..3 {
            assert_eq!(rx.try_recv().unwrap(), "change_nothing");
        }
    }

    #[test]
    fn test_silent_without_channel_or_game() {
        let mut bot = Script {
            input: None,
            program: None,
            cursor: 0,
        };
        let mut g = game_for(1);
        bot.on_state(&mut g); // no channel: nothing to do

        let (tx, mut rx) = mpsc::channel(4);
        bot.input = Some(tx);
        g.running = false;
        bot.on_state(&mut g);
        assert!(rx.try_recv().is_err(), "no answer while not running");
    }
}
