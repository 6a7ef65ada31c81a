//! Jumping bot: hunts for hole crossings.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::bot::search::{mark_dead_zones, plan_step, undo, undo_all, Revert, StepOutcome};
use crate::bot::{random_safe, Bot};
use crate::game::state::{Action, GameState};
use crate::HOLES_EACH_STEP;

/// Searches for a short action plan that crosses an occupied cell through
/// the hole rule, then executes it round by round. Without a plan it plays
/// like the random-safe bot.
pub struct Jumper {
    input: Option<mpsc::Sender<String>>,
    plan: VecDeque<Action>,
}

impl Jumper {
    /// Fresh boxed instance for the registry.
    pub fn boxed() -> Box<dyn Bot> {
        Box::new(Jumper {
            input: None,
            plan: VecDeque::new(),
        })
    }
}

/// Depth-first hunt for a plan whose final step jumps. The plan is at most
/// `length` actions long so the hole round stays reachable.
fn find_plan(game: &mut GameState, length: u32) -> Option<Vec<Action>> {
    if length == 0 {
        return None;
    }
    let you = game.you;
    let mut actions = Action::ALL;
    actions.shuffle(&mut rand::thread_rng());

    for action in actions {
        let (outcome, revert) = plan_step(game, you, action);
        match outcome {
            StepOutcome::Crashed => {
                undo(game, you, &revert);
            }
            StepOutcome::Jumped => {
                undo(game, you, &revert);
                return Some(vec![action]);
            }
            StepOutcome::Survived => {
                let rest = find_plan(game, length - 1);
                undo(game, you, &revert);
                if let Some(mut rest) = rest {
                    rest.insert(0, action);
                    return Some(rest);
                }
            }
        }
    }
    None
}

/// Replay the remaining plan against the current copy. The plan is still
/// good if it survives and still jumps over something.
fn plan_still_jumps(game: &mut GameState, plan: &VecDeque<Action>) -> bool {
    let you = game.you;
    let mut reverts: Vec<Revert> = Vec::with_capacity(plan.len());
    let mut jumped = false;
    let mut crashed = false;
    for &action in plan {
        let (outcome, revert) = plan_step(game, you, action);
        reverts.push(revert);
        match outcome {
            StepOutcome::Crashed => {
                crashed = true;
                break;
            }
            StepOutcome::Jumped => jumped = true,
            StepOutcome::Survived => {}
        }
    }
    undo_all(game, you, &reverts);
    jumped && !crashed
}

impl Bot for Jumper {
    fn name(&self) -> &'static str {
        "Jumper"
    }

    fn attach_input(&mut self, tx: mpsc::Sender<String>) {
        self.input = Some(tx);
    }

    fn on_state(&mut self, game: &mut GameState) {
        let Some(tx) = &self.input else { return };
        if !game.running || !game.players.get(&game.you).map(|p| p.active).unwrap_or(false) {
            return;
        }

        mark_dead_zones(game);

        if !self.plan.is_empty() && !plan_still_jumps(game, &self.plan) {
            self.plan.clear();
        }

        if self.plan.is_empty() {
            // Plans must end before the next hole round passes.
            let counter = game.players[&game.you].step_counter;
            let length = HOLES_EACH_STEP - (counter % HOLES_EACH_STEP);
            if let Some(plan) = find_plan(game, length) {
                self.plan = plan.into();
            }
        }

        let action = match self.plan.pop_front() {
            Some(action) => action,
            None => random_safe::choose(game),
        };
        let _ = tx.try_send(action.as_str().to_string());
    }
}
