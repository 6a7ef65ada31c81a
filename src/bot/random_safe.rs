//! Random-safe bot: a shuffled one-step lookahead.

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::bot::search::{mark_dead_zones, probe_path, CrashRisk};
use crate::bot::Bot;
use crate::game::state::{Action, GameState};
use crate::MAX_SPEED;

/// Enumerate the five actions in random order and simulate one move each:
/// the first that does not crash wins, else the first that merely enters a
/// dead zone, else the first candidate unconditionally.
pub fn choose(game: &mut GameState) -> Action {
    mark_dead_zones(game);

    let mut actions = Action::ALL;
    actions.shuffle(&mut rand::thread_rng());

    let p = game.players[&game.you].clone();
    let mut fallback = None;
    for action in actions {
        let mut direction = p.direction;
        let mut speed = p.speed;
        match action {
            Action::TurnLeft => direction = direction.turned_left(),
            Action::TurnRight => direction = direction.turned_right(),
            Action::SpeedUp => speed += 1,
            Action::SlowDown => speed -= 1,
            Action::ChangeNothing => {}
        }
        if !(1..=MAX_SPEED).contains(&speed) {
            continue;
        }

        match probe_path(game, p.x, p.y, direction, speed, p.step_counter + 1) {
            CrashRisk::Safe => return action,
            CrashRisk::Maybe => fallback = fallback.or(Some(action)),
            CrashRisk::Certain => {}
        }
    }
    fallback.unwrap_or(actions[0])
}

/// One-step lookahead over a randomized action order.
pub struct RandomSafe {
    input: Option<mpsc::Sender<String>>,
}

impl RandomSafe {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(RandomSafe { input: None })
    }
}

impl Bot for RandomSafe {
    fn name(&self) -> &'static str {
        "RandomSafe"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Direction, PlayerState};

    fn corridor_game() -> GameState {
        // Player 1 in a one-cell-wide corridor pointing right, dead end two
        // cells ahead; the only non-crashing move is one step forward.
        let mut g = GameState::new(50, 50);
        g.players.insert(1, PlayerState::new(10, 10, Direction::Right));
        g.set_cell(10, 10, 1);
        for x in 5..15 {
            g.set_cell(x, 9, 2);
            g.set_cell(x, 11, 2);
        }
        g.set_cell(12, 10, 2);
        g.you = 1;
        g.running = true;
        g
    }

    #[test]
    fn test_picks_the_only_safe_action() {
        for _ in 0..20 {
            let mut g = corridor_game();
            assert_eq!(choose(&mut g), Action::ChangeNothing);
        }
    }

    #[test]
    fn test_prefers_maybe_over_certain() {
        // Fully boxed in by trails except one dead-zone cell ahead.
        let mut g = GameState::new(50, 50);
        g.players.insert(1, PlayerState::new(10, 10, Direction::Right));
        g.players.insert(2, PlayerState::new(13, 10, Direction::Left));
        g.set_cell(10, 10, 1);
        g.set_cell(13, 10, 2);
        g.set_cell(10, 9, 3);
        g.set_cell(10, 11, 3);

        for _ in 0..20 {
            let mut g = g.clone();
            // Moving ahead only enters player 2's dead zone; turning up or
            // down is a certain crash and must never be picked.
            let action = choose(&mut g);
            assert!(
                matches!(action, Action::ChangeNothing | Action::SpeedUp),
                "picked {action:?}"
            );
        }
    }

    #[test]
    fn test_answers_via_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut bot = RandomSafe { input: Some(tx) };
        let mut g = corridor_game();
        bot.on_state(&mut g);
        assert_eq!(rx.try_recv().unwrap(), "change_nothing");
    }
}
