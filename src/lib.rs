//! # spe_ed Game Server
//!
//! Authoritative server for the multiplayer trail game "spe_ed": up to six
//! players steer trails across a bounded grid, round by round, until at most
//! one of them is left.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SPE_ED SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  game/           - Round-synchronized simulation             │
//! │  ├── state.rs    - Board, players, movement and crash rules  │
//! │  └── engine.rs   - Round loop with deadline-bounded fan-in   │
//! │                                                              │
//! │  bot/            - Built-in players                          │
//! │  ├── mod.rs      - Bot trait, registry, weighted pool        │
//! │  ├── search.rs   - Shared mutate-and-revert lookahead        │
//! │  └── *.rs        - One policy per file                       │
//! │                                                              │
//! │  network/        - HTTP/WebSocket surface                    │
//! │  ├── server.rs   - Upgrade endpoint, time + stats pages      │
//! │  ├── auth.rs     - API key gate                              │
//! │  └── matchmaker.rs - Open lobby, bot padding, match launch   │
//! │                                                              │
//! │  pseudonym.rs    - Rotating player pseudonyms                │
//! │  replay.rs       - LZ4-compressed per-match round log        │
//! │  stats.rs        - Live statistics worker                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The simulation in `game/` is synchronous and self-contained; everything
//! asynchronous (sockets, deadlines, lobby padding) lives around it. Bots
//! receive a disposable public copy of the game each round and answer through
//! the same bounded input channel a remote player would.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bot;
pub mod game;
pub mod network;
pub mod pseudonym;
pub mod replay;
pub mod stats;

/// Minimum size of the field (both width and height, exclusive).
pub const FIELD_MIN_SIZE: i32 = 40;

/// Maximum size of the field (both width and height, inclusive after +1).
pub const FIELD_MAX_SIZE: i32 = 80;

/// Maximum number of players allowed in one game.
pub const PLAYERS_PER_GAME: usize = 6;

/// Maximum speed a player may reach.
pub const MAX_SPEED: i32 = 10;

/// Minimum speed needed for a hole.
pub const HOLE_SPEED: i32 = 3;

/// After how many steps a hole occurs (if the speed precondition is met).
pub const HOLES_EACH_STEP: u32 = 6;

/// Minimum round time in seconds.
pub const ROUND_TIMEOUT_MIN: u64 = 5;

/// Maximum round time in seconds.
pub const ROUND_TIMEOUT_MAX: u64 = 15;

/// Grace period in seconds during which an answer is still accepted after
/// the announced deadline has passed.
pub const ROUND_TIMEOUT_GRACE: u64 = 2;

/// Capacity of each player's inbound action buffer.
pub const INPUT_BUFFER: usize = 5;
