//! Round-synchronized game simulation.

pub mod engine;
pub mod state;

pub use engine::{Engine, MatchConfig, PlayerSlot};
pub use state::{Action, Direction, GameState, PlayerState};
