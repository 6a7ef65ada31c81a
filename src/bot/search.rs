//! Shared lookahead machinery for search bots.
//!
//! Bots receive a disposable public copy of the game, so hypothetical moves
//! are played directly onto that copy and undone afterwards. Every mutation
//! of [`plan_step`] is captured in a [`Revert`] record; applying the records
//! in reverse order restores the copy byte-for-byte.

use crate::game::state::{Action, Direction, GameState, CELL_EMPTY};
use crate::{HOLES_EACH_STEP, HOLE_SPEED, MAX_SPEED};

/// Cell marker for an opponent's dead zone (cells an opponent could reach
/// next round). Only ever written into a bot's local copy.
pub const CELL_DEAD_ZONE: i8 = -100;

/// Cell marker for hypothetical occupancy during a search.
pub const CELL_HYPOTHETICAL: i8 = -33;

/// Result of one hypothetical round for the searched player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The move completes without touching anything occupied.
    Survived,
    /// The move completes and crosses at least one occupied cell through a
    /// hole.
    Jumped,
    /// Border exit, speed bound escape or occupied cell: this branch dies.
    Crashed,
}

/// Everything needed to undo one [`plan_step`].
#[derive(Clone, Debug)]
pub struct Revert {
    x: i32,
    y: i32,
    speed: i32,
    step_counter: u32,
    direction: Direction,
    cells: Vec<(i32, i32)>,
}

/// Play one action for `id` on the copy: apply the action, move by the
/// resulting speed, and write [`CELL_HYPOTHETICAL`] into every cell used.
/// The player's position is left wherever the move ended (also on a crash),
/// exactly as recorded in the revert record.
pub fn plan_step(game: &mut GameState, id: u8, action: Action) -> (StepOutcome, Revert) {
    let p = game.players.get_mut(&id).expect("searched player exists");
    let mut revert = Revert {
        x: p.x,
        y: p.y,
        speed: p.speed,
        step_counter: p.step_counter,
        direction: p.direction,
        cells: Vec::with_capacity(p.speed as usize),
    };

    match action {
        Action::TurnLeft => p.direction = p.direction.turned_left(),
        Action::TurnRight => p.direction = p.direction.turned_right(),
        Action::SpeedUp => {
            p.speed += 1;
            if p.speed > MAX_SPEED {
                return (StepOutcome::Crashed, revert);
            }
        }
        Action::SlowDown => {
            p.speed -= 1;
            if p.speed < 1 {
                return (StepOutcome::Crashed, revert);
            }
        }
        Action::ChangeNothing => {}
    }

    p.step_counter += 1;
    let speed = p.speed;
    let hole_round = speed >= HOLE_SPEED && p.step_counter % HOLES_EACH_STEP == 0;

    let mut jumped = false;
    for s in 0..speed {
        let p = game.players.get_mut(&id).expect("searched player exists");
        let (x, y) = p.direction.step(p.x, p.y);
        p.x = x;
        p.y = y;
        if !game.in_bounds(x, y) {
            return (StepOutcome::Crashed, revert);
        }
        if hole_round && s != 0 && s != speed - 1 {
            if game.cell(x, y) != CELL_EMPTY {
                jumped = true;
            }
            continue;
        }
        if game.cell(x, y) != CELL_EMPTY {
            return (StepOutcome::Crashed, revert);
        }
        revert.cells.push((x, y));
        game.set_cell(x, y, CELL_HYPOTHETICAL);
    }

    if jumped {
        (StepOutcome::Jumped, revert)
    } else {
        (StepOutcome::Survived, revert)
    }
}

/// Undo a single [`plan_step`].
pub fn undo(game: &mut GameState, id: u8, revert: &Revert) {
    for &(x, y) in &revert.cells {
        game.set_cell(x, y, CELL_EMPTY);
    }
    if let Some(p) = game.players.get_mut(&id) {
        p.x = revert.x;
        p.y = revert.y;
        p.speed = revert.speed;
        p.step_counter = revert.step_counter;
        p.direction = revert.direction;
    }
}

/// Undo a whole stack of steps, newest first.
pub fn undo_all(game: &mut GameState, id: u8, reverts: &[Revert]) {
    for revert in reverts.iter().rev() {
        undo(game, id, revert);
    }
}

/// Mark the dead zone of every active opponent: the cross of cells within
/// `speed + 1` in each cardinal direction. Biases searches away from cells
/// an opponent could claim next round.
pub fn mark_dead_zones(game: &mut GameState) {
    let you = game.you;
    let zones: Vec<(i32, i32, i32)> = game
        .players
        .iter()
        .filter(|&(&id, p)| id != you && p.active)
        .map(|(_, p)| (p.x, p.y, p.speed))
        .collect();

    for (px, py, speed) in zones {
        for i in 1..=speed + 1 {
            for (x, y) in [(px + i, py), (px - i, py), (px, py + i), (px, py - i)] {
                if game.in_bounds(x, y) {
                    game.set_cell(x, y, CELL_DEAD_ZONE);
                }
            }
        }
    }
}

/// Risk classification of one hypothetical move, without mutating the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrashRisk {
    /// Every checked cell is free.
    Safe,
    /// Enters a dead zone but no known trail.
    Maybe,
    /// Border exit or a known trail cell.
    Certain,
}

/// Walk one move from `(x, y)` and classify it. `step_counter` is the value
/// the counter would have after the move.
pub fn probe_path(
    game: &GameState,
    mut x: i32,
    mut y: i32,
    direction: Direction,
    speed: i32,
    step_counter: u32,
) -> CrashRisk {
    let hole_round = speed >= HOLE_SPEED && step_counter % HOLES_EACH_STEP == 0;
    let mut risk = CrashRisk::Safe;
    for s in 0..speed {
        let next = direction.step(x, y);
        x = next.0;
        y = next.1;
        if !game.in_bounds(x, y) {
            return CrashRisk::Certain;
        }
        if hole_round && s != 0 && s != speed - 1 {
            continue;
        }
        match game.cell(x, y) {
            CELL_EMPTY => {}
            CELL_DEAD_ZONE => risk = CrashRisk::Maybe,
            _ => return CrashRisk::Certain,
        }
    }
    risk
}

/// Straight-line free run from the player's position in `direction`,
/// counting empty cells only.
pub fn free_run(game: &GameState, mut x: i32, mut y: i32, direction: Direction) -> i32 {
    let mut free = 0;
    loop {
        let next = direction.step(x, y);
        x = next.0;
        y = next.1;
        if !game.in_bounds(x, y) || game.cell(x, y) != CELL_EMPTY {
            return free;
        }
        free += 1;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::PlayerState;

    pub(crate) fn game(width: i32, height: i32) -> GameState {
        let mut g = GameState::new(width, height);
        g.running = true;
        g
    }

    fn add_player(g: &mut GameState, id: u8, x: i32, y: i32, direction: Direction) {
        g.players.insert(id, PlayerState::new(x, y, direction));
        g.set_cell(x, y, id as i8);
    }

    #[test]
    fn test_plan_step_and_undo_restore_exactly() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 10, 10, Direction::Right);
        add_player(&mut g, 2, 30, 30, Direction::Left);
        g.you = 1;
        let snapshot = g.clone();

        let mut reverts = Vec::new();
        for action in [Action::SpeedUp, Action::TurnLeft, Action::ChangeNothing] {
            let (outcome, revert) = plan_step(&mut g, 1, action);
            assert_ne!(outcome, StepOutcome::Crashed);
            reverts.push(revert);
        }
        assert_ne!(g, snapshot);

        undo_all(&mut g, 1, &reverts);
        assert_eq!(g, snapshot, "revert must be perfect");
    }

    #[test]
    fn test_plan_step_crash_on_trail() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 10, 10, Direction::Right);
        g.set_cell(11, 10, 2);

        let snapshot = g.clone();
        let (outcome, revert) = plan_step(&mut g, 1, Action::ChangeNothing);
        assert_eq!(outcome, StepOutcome::Crashed);
        undo(&mut g, 1, &revert);
        assert_eq!(g, snapshot);
    }

    #[test]
    fn test_plan_step_crash_on_speed_bounds() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 10, 10, Direction::Right);
        let (outcome, revert) = plan_step(&mut g, 1, Action::SlowDown);
        assert_eq!(outcome, StepOutcome::Crashed);
        undo(&mut g, 1, &revert);
        assert_eq!(g.players[&1].speed, 1);
    }

    #[test]
    fn test_plan_step_detects_jump() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 5, 5, Direction::Right);
        {
            let p = g.players.get_mut(&1).unwrap();
            p.speed = 3;
            p.step_counter = 5;
        }
        g.set_cell(7, 5, 2);

        let (outcome, revert) = plan_step(&mut g, 1, Action::ChangeNothing);
        assert_eq!(outcome, StepOutcome::Jumped);
        assert_eq!(g.cell(7, 5), 2, "hole cell untouched by the search");
        undo(&mut g, 1, &revert);
        assert_eq!(g.cell(6, 5), CELL_EMPTY);
        assert_eq!(g.cell(8, 5), CELL_EMPTY);
    }

    #[test]
    fn test_mark_dead_zones_cross_shape() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 10, 10, Direction::Right);
        add_player(&mut g, 2, 30, 30, Direction::Left);
        g.players.get_mut(&2).unwrap().speed = 2;
        g.you = 1;

        mark_dead_zones(&mut g);
        // speed + 1 = 3 cells in each cardinal direction around player 2.
        for i in 1..=3 {
            assert_eq!(g.cell(30 + i, 30), CELL_DEAD_ZONE);
            assert_eq!(g.cell(30 - i, 30), CELL_DEAD_ZONE);
            assert_eq!(g.cell(30, 30 + i), CELL_DEAD_ZONE);
            assert_eq!(g.cell(30, 30 - i), CELL_DEAD_ZONE);
        }
        assert_eq!(g.cell(34, 30), CELL_EMPTY);
        // The bot's own surroundings stay clean.
        assert_eq!(g.cell(11, 10), CELL_EMPTY);
    }

    #[test]
    fn test_probe_path_classification() {
        let mut g = game(50, 50);
        add_player(&mut g, 1, 10, 10, Direction::Right);

        assert_eq!(
            probe_path(&g, 10, 10, Direction::Right, 1, 1),
            CrashRisk::Safe
        );

        g.set_cell(11, 10, CELL_DEAD_ZONE);
        assert_eq!(
            probe_path(&g, 10, 10, Direction::Right, 1, 1),
            CrashRisk::Maybe
        );

        g.set_cell(11, 10, 3);
        assert_eq!(
            probe_path(&g, 10, 10, Direction::Right, 1, 1),
            CrashRisk::Certain
        );

        assert_eq!(
            probe_path(&g, 0, 10, Direction::Left, 1, 1),
            CrashRisk::Certain
        );
    }

    #[test]
    fn test_free_run_counts_empty_cells() {
        let mut g = game(50, 50);
        g.set_cell(15, 10, 2);
        assert_eq!(free_run(&g, 10, 10, Direction::Right), 4);
        assert_eq!(free_run(&g, 10, 10, Direction::Left), 10);
    }
}
