//! Survival-greedy bot.

use tokio::sync::mpsc;

use crate::bot::search::{free_run, mark_dead_zones, plan_step, undo, StepOutcome};
use crate::bot::Bot;
use crate::game::state::{Action, GameState};

/// Candidate actions, straight ahead first.
const CANDIDATES: [Action; 3] = [Action::ChangeNothing, Action::TurnLeft, Action::TurnRight];

/// Pick the surviving candidate whose resulting heading has the longest
/// straight free run. If no candidate survives a one-step lookahead, turn
/// toward the longest free run regardless.
pub fn choose(game: &mut GameState) -> Action {
    mark_dead_zones(game);
    let you = game.you;

    let mut best: Option<(Action, i32)> = None;
    let mut best_any: Option<(Action, i32)> = None;

    for action in CANDIDATES {
        let (outcome, revert) = plan_step(game, you, action);
        let p = &game.players[&you];
        let run = free_run(game, p.x, p.y, p.direction);
        let survived = outcome != StepOutcome::Crashed;
        undo(game, you, &revert);

        // The free run from the original position, along the heading this
        // action would give, decides ties and the fallback.
        let heading = match action {
            Action::TurnLeft => game.players[&you].direction.turned_left(),
            Action::TurnRight => game.players[&you].direction.turned_right(),
            _ => game.players[&you].direction,
        };
        let p = &game.players[&you];
        let fallback_run = free_run(game, p.x, p.y, heading);

        if survived && best.map(|(_, r)| run > r).unwrap_or(true) {
            best = Some((action, run));
        }
        if best_any.map(|(_, r)| fallback_run > r).unwrap_or(true) {
            best_any = Some((action, fallback_run));
        }
    }

    best.or(best_any).map(|(a, _)| a).unwrap_or(Action::ChangeNothing)
}

/// One-step survival lookahead with a longest-free-run tiebreak.
pub struct Survivor {
    input: Option<mpsc::Sender<String>>,
}

impl Survivor {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(Survivor { input: None })
    }
}

impl Bot for Survivor {
    fn name(&self) -> &'static str {
        "Survivor"
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
