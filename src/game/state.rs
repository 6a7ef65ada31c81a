//! Board, player and movement rules.
//!
//! Everything in this module is synchronous and deterministic given its
//! inputs. The engine drives it once per round; bots run the same rules on a
//! disposable public copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{HOLES_EACH_STEP, HOLE_SPEED, MAX_SPEED};

/// Value of an unoccupied cell.
pub const CELL_EMPTY: i8 = 0;

/// Marker written when two trails enter the same cell in the same turn.
/// Stays on the board afterwards; a crash site is an occupied cell.
pub const CELL_COLLISION: i8 = -1;

// =============================================================================
// DIRECTIONS & ACTIONS
// =============================================================================

/// Cardinal movement direction of a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Negative y.
    Up,
    /// Positive y.
    Down,
    /// Negative x.
    Left,
    /// Positive x.
    Right,
}

impl Direction {
    /// Direction after a `turn_left`. Inverse of [`Direction::turned_right`].
    pub fn turned_left(self) -> Self {
        match self {
            Direction::Left => Direction::Down,
            Direction::Right => Direction::Up,
            Direction::Up => Direction::Left,
            Direction::Down => Direction::Right,
        }
    }

    /// Direction after a `turn_right`. Inverse of [`Direction::turned_left`].
    pub fn turned_right(self) -> Self {
        match self {
            Direction::Left => Direction::Up,
            Direction::Right => Direction::Down,
            Direction::Up => Direction::Right,
            Direction::Down => Direction::Left,
        }
    }

    /// One cell forward from `(x, y)`.
    pub fn step(self, x: i32, y: i32) -> (i32, i32) {
        match self {
            Direction::Up => (x, y - 1),
            Direction::Down => (x, y + 1),
            Direction::Left => (x - 1, y),
            Direction::Right => (x + 1, y),
        }
    }
}

/// One of the five actions a player may answer with each round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Rotate 90° counter-clockwise.
    TurnLeft,
    /// Rotate 90° clockwise.
    TurnRight,
    /// Increase speed by one.
    SpeedUp,
    /// Decrease speed by one.
    SlowDown,
    /// Keep direction and speed (NOOP).
    ChangeNothing,
}

impl Action {
    /// All actions, in protocol order.
    pub const ALL: [Action; 5] = [
        Action::TurnLeft,
        Action::TurnRight,
        Action::SpeedUp,
        Action::SlowDown,
        Action::ChangeNothing,
    ];

    /// The wire representation of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::TurnLeft => "turn_left",
            Action::TurnRight => "turn_right",
            Action::SpeedUp => "speed_up",
            Action::SlowDown => "slow_down",
            Action::ChangeNothing => "change_nothing",
        }
    }

    /// Parse a wire string. Accepts exactly the five protocol strings.
    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "turn_left" => Some(Action::TurnLeft),
            "turn_right" => Some(Action::TurnRight),
            "speed_up" => Some(Action::SpeedUp),
            "slow_down" => Some(Action::SlowDown),
            "change_nothing" => Some(Action::ChangeNothing),
            _ => None,
        }
    }
}

/// Whether `s` is one of the five valid action strings.
pub fn is_valid_action(s: &str) -> bool {
    Action::parse(s).is_some()
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Public state of a single player.
///
/// `step_counter` is not part of the wire protocol but is carried into
/// public copies so bots can compute hole timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Column of the current position.
    pub x: i32,
    /// Row of the current position.
    pub y: i32,
    /// Current heading.
    pub direction: Direction,
    /// Cells moved per round, in `[1, MAX_SPEED]` while active.
    pub speed: i32,
    /// Still participating in the game.
    pub active: bool,
    /// Pseudonym, revealed only when the game has finished.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Monotone move counter, used for hole timing.
    #[serde(skip)]
    pub step_counter: u32,
}

impl PlayerState {
    /// A freshly placed player at `(x, y)` facing `direction`.
    pub fn new(x: i32, y: i32, direction: Direction) -> Self {
        Self {
            x,
            y,
            direction,
            speed: 1,
            active: true,
            name: None,
            step_counter: 0,
        }
    }

    /// Apply an action to direction/speed. Returns `false` if the action
    /// pushed the speed out of `[1, MAX_SPEED]`; the escaped value is left in
    /// place, the caller invalidates the player.
    pub fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::TurnLeft => self.direction = self.direction.turned_left(),
            Action::TurnRight => self.direction = self.direction.turned_right(),
            Action::SpeedUp => {
                self.speed += 1;
                if self.speed > MAX_SPEED {
                    return false;
                }
            }
            Action::SlowDown => {
                self.speed -= 1;
                if self.speed < 1 {
                    return false;
                }
            }
            Action::ChangeNothing => {}
        }
        true
    }
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// One sub-step position travelled during a move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathCell {
    /// Column of the visited cell.
    pub x: i32,
    /// Row of the visited cell.
    pub y: i32,
    /// Hole sub-steps neither write to nor collide with the board.
    pub hole: bool,
}

/// Result of moving one player for one round.
#[derive(Debug, Default)]
pub struct MoveOutcome {
    /// Cells travelled this round, in order. Ends early on a border exit.
    pub path: Vec<PathCell>,
    /// The player left the grid and must be invalidated.
    pub off_grid: bool,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete protocol-visible state of a game.
///
/// Serializes directly into the broadcast message. `players` is keyed by the
/// one-based player id, which serde renders as the `"1".."6"` object keys the
/// protocol requires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Board width in cells.
    pub width: i32,
    /// Board height in cells.
    pub height: i32,
    /// `height` rows of `width` cells. 0 = empty, 1..6 = trail of that
    /// player, -1 = same-turn collision. Bots use further negative
    /// sentinels in their own copies.
    pub cells: Vec<Vec<i8>>,
    /// All players, keyed by one-based id.
    pub players: BTreeMap<u8, PlayerState>,
    /// Id of the broadcast recipient; 0 outside of a broadcast.
    pub you: u8,
    /// Whether the game is in progress.
    pub running: bool,
    /// RFC3339 answer deadline; absent while not running.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deadline: Option<String>,
}

impl GameState {
    /// An empty board of the given size with no players.
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            cells: vec![vec![CELL_EMPTY; width as usize]; height as usize],
            players: BTreeMap::new(),
            you: 0,
            running: false,
            deadline: None,
        }
    }

    /// Whether `(x, y)` lies on the board.
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    /// Cell value at `(x, y)`. Caller guarantees bounds.
    pub fn cell(&self, x: i32, y: i32) -> i8 {
        self.cells[y as usize][x as usize]
    }

    /// Write `value` at `(x, y)`. Caller guarantees bounds.
    pub fn set_cell(&mut self, x: i32, y: i32, value: i8) {
        self.cells[y as usize][x as usize] = value;
    }

    /// Number of players still active.
    pub fn active_count(&self) -> usize {
        self.players.values().filter(|p| p.active).count()
    }

    /// Deep copy exposing only protocol fields plus each player's step
    /// counter. Shares no mutable state with `self`; bots may mutate the
    /// copy arbitrarily.
    pub fn public_copy(&self) -> GameState {
        self.clone()
    }

    /// Move one player by its current speed, writing trail cells and the
    /// collision marker as it goes. Movement stops at the border.
    ///
    /// The returned path is the input to crash adjudication: after all
    /// players have moved, any non-hole path cell holding [`CELL_COLLISION`]
    /// invalidates its player.
    pub fn move_player(&mut self, id: u8) -> MoveOutcome {
        let Some(p) = self.players.get_mut(&id) else {
            return MoveOutcome::default();
        };
        p.step_counter += 1;

        let speed = p.speed;
        let hole_round = speed >= HOLE_SPEED && p.step_counter % HOLES_EACH_STEP == 0;

        let mut outcome = MoveOutcome::default();
        for s in 0..speed {
            let p = self.players.get_mut(&id).expect("player vanished mid-move");
            let (x, y) = p.direction.step(p.x, p.y);
            p.x = x;
            p.y = y;
            if !self.in_bounds(x, y) {
                outcome.off_grid = true;
                break;
            }
            let hole = hole_round && s != 0 && s != speed - 1;
            outcome.path.push(PathCell { x, y, hole });
            if hole {
                continue;
            }
            if self.cell(x, y) != CELL_EMPTY {
                self.set_cell(x, y, CELL_COLLISION);
            } else {
                self.set_cell(x, y, id as i8);
            }
        }
        outcome
    }

    /// Whether a path travelled this round runs through an unadjudicated
    /// collision cell (holes exempt).
    pub fn path_crashes(&self, path: &[PathCell]) -> bool {
        path.iter()
            .any(|c| !c.hole && self.cell(c.x, c.y) == CELL_COLLISION)
    }

    /// Deactivate a player. Channel teardown is the engine's job.
    pub fn deactivate(&mut self, id: u8) {
        if let Some(p) = self.players.get_mut(&id) {
            p.active = false;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn game_with_player(id: u8, x: i32, y: i32, direction: Direction) -> GameState {
        let mut g = GameState::new(40, 41);
        g.players.insert(id, PlayerState::new(x, y, direction));
        g.set_cell(x, y, id as i8);
        g.running = true;
        g
    }

    #[test]
    fn test_turning_involution() {
        for d in [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ] {
            assert_eq!(d.turned_left().turned_right(), d);
            assert_eq!(d.turned_right().turned_left(), d);
        }
    }

    #[test]
    fn test_action_roundtrip() {
        for a in Action::ALL {
            assert_eq!(Action::parse(a.as_str()), Some(a));
        }
        assert!(is_valid_action("change_nothing"));
        assert!(!is_valid_action(""));
        assert!(!is_valid_action("turn_around"));
        assert!(!is_valid_action("Turn_Left"));
    }

    #[test]
    fn test_speed_bounds_invalidate() {
        let mut p = PlayerState::new(0, 0, Direction::Right);
        p.speed = MAX_SPEED;
        assert!(!p.apply(Action::SpeedUp));

        let mut p = PlayerState::new(0, 0, Direction::Right);
        assert!(!p.apply(Action::SlowDown));
    }

    #[test]
    fn test_turn_left_then_right_is_noop() {
        let mut p = PlayerState::new(0, 0, Direction::Up);
        assert!(p.apply(Action::TurnLeft));
        assert!(p.apply(Action::TurnRight));
        assert_eq!(p.direction, Direction::Up);
    }

    #[test]
    fn test_movement_writes_trail() {
        let mut g = game_with_player(1, 5, 5, Direction::Right);
        g.players.get_mut(&1).unwrap().speed = 2;

        let out = g.move_player(1);
        assert!(!out.off_grid);
        assert_eq!(out.path.len(), 2);
        assert_eq!(g.cell(6, 5), 1);
        assert_eq!(g.cell(7, 5), 1);
        assert_eq!(g.players[&1].x, 7);
        assert_eq!(g.players[&1].step_counter, 1);
    }

    #[test]
    fn test_movement_off_grid() {
        let mut g = game_with_player(1, 0, 5, Direction::Left);
        let out = g.move_player(1);
        assert!(out.off_grid);
        assert!(out.path.is_empty());
    }

    #[test]
    fn test_hole_skips_interior_cells() {
        // Speed 3, step counter 5 before the move: the post-increment counter
        // is 6, divisible by HOLES_EACH_STEP, so the middle sub-step is a
        // hole. A pre-existing trail there must neither block nor be
        // overwritten.
        let mut g = game_with_player(1, 5, 5, Direction::Right);
        {
            let p = g.players.get_mut(&1).unwrap();
            p.speed = 3;
            p.step_counter = 5;
        }
        g.set_cell(7, 5, 2);

        let out = g.move_player(1);
        assert!(!out.off_grid);
        assert_eq!(out.path[1], PathCell { x: 7, y: 5, hole: true });
        assert_eq!(g.cell(6, 5), 1);
        assert_eq!(g.cell(7, 5), 2, "hole cell untouched");
        assert_eq!(g.cell(8, 5), 1);
        assert!(!g.path_crashes(&out.path));
    }

    #[test]
    fn test_head_on_collision_invalidates_both() {
        let mut g = game_with_player(1, 10, 20, Direction::Right);
        g.players.insert(2, PlayerState::new(11, 20, Direction::Left));
        g.set_cell(11, 20, 2);

        let out1 = g.move_player(1);
        let out2 = g.move_player(2);
        assert_eq!(g.cell(11, 20), CELL_COLLISION);
        assert_eq!(g.cell(10, 20), CELL_COLLISION);

        for (id, out) in [(1u8, &out1), (2u8, &out2)] {
            if g.path_crashes(&out.path) {
                g.deactivate(id);
            }
        }
        assert!(!g.players[&1].active);
        assert!(!g.players[&2].active);
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn test_side_on_collision_invalidates_both() {
        // Two players stepping onto the same empty cell in the same round.
        let mut g = game_with_player(1, 5, 4, Direction::Down);
        g.players.insert(2, PlayerState::new(4, 5, Direction::Right));
        g.set_cell(4, 5, 2);

        let out1 = g.move_player(1);
        let out2 = g.move_player(2);
        assert_eq!(g.cell(5, 5), CELL_COLLISION);
        assert!(g.path_crashes(&out1.path));
        assert!(g.path_crashes(&out2.path));
    }

    #[test]
    fn test_border_stop_does_not_false_positive() {
        // A player stopped short by the border must only be adjudicated over
        // the cells it actually wrote.
        let mut g = game_with_player(1, 2, 5, Direction::Left);
        g.players.get_mut(&1).unwrap().speed = 5;
        let out = g.move_player(1);
        assert!(out.off_grid);
        assert_eq!(out.path.len(), 2);
        assert!(!g.path_crashes(&out.path));
    }

    #[test]
    fn test_public_copy_is_isolated() {
        let g = game_with_player(1, 5, 5, Direction::Right);
        let mut copy = g.public_copy();
        copy.set_cell(0, 0, -33);
        copy.players.get_mut(&1).unwrap().speed = 9;
        copy.you = 1;

        assert_eq!(g.cell(0, 0), CELL_EMPTY);
        assert_eq!(g.players[&1].speed, 1);
        assert_eq!(g.you, 0);
    }

    #[test]
    fn test_public_copy_carries_step_counter() {
        let mut g = game_with_player(1, 5, 5, Direction::Right);
        g.players.get_mut(&1).unwrap().step_counter = 7;
        assert_eq!(g.public_copy().players[&1].step_counter, 7);
    }

    #[test]
    fn test_wire_shape() {
        let mut g = game_with_player(1, 5, 5, Direction::Right);
        g.you = 1;
        g.deadline = Some("2026-01-01T00:00:00Z".into());
        let v: serde_json::Value = serde_json::to_value(&g).unwrap();

        assert_eq!(v["width"], 40);
        assert_eq!(v["height"], 41);
        assert_eq!(v["you"], 1);
        assert_eq!(v["running"], true);
        assert_eq!(v["deadline"], "2026-01-01T00:00:00Z");
        assert_eq!(v["players"]["1"]["direction"], "right");
        assert_eq!(v["players"]["1"]["speed"], 1);
        assert!(v["players"]["1"].get("name").is_none());
        assert!(v["players"]["1"].get("step_counter").is_none());
        assert_eq!(v["cells"][5][5], 1);
    }

    #[test]
    fn test_wire_shape_finished_game() {
        let mut g = game_with_player(1, 5, 5, Direction::Right);
        g.players.get_mut(&1).unwrap().name = Some("Zeppelin-Taxi-Radar".into());
        let v: serde_json::Value = serde_json::to_value(&g).unwrap();
        assert!(v.get("deadline").is_none());
        assert_eq!(v["players"]["1"]["name"], "Zeppelin-Taxi-Radar");
    }
}
