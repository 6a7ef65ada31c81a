//! Built-in players.
//!
//! Every bot implements the same three-operation capability a remote player
//! presents: it is handed the bounded input channel once per match, receives
//! a disposable public copy of the game each round, and answers with at most
//! one non-blocking send. A bot that sends nothing forfeits the round.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::game::state::GameState;
use crate::PLAYERS_PER_GAME;

pub mod chameleon;
pub mod deep_search;
pub mod jumper;
pub mod mirror;
pub mod random_safe;
pub mod script;
pub mod search;
pub mod survivor;

/// A reactive per-match policy.
///
/// `on_state` receives a mutable public copy and may scribble on it freely;
/// the engine never observes those mutations. Implementations must never
/// block and must use `try_send` for their one answer per round.
pub trait Bot: Send {
    /// Unique registry name.
    fn name(&self) -> &'static str;

    /// Called once per match with the input channel the engine reads from.
    fn attach_input(&mut self, tx: mpsc::Sender<String>);

    /// Called once per broadcast with a fresh copy; `game.you` identifies
    /// this bot's player.
    fn on_state(&mut self, game: &mut GameState);
}

/// Zero-argument constructor for a fresh bot instance.
pub type BotFactory = fn() -> Box<dyn Bot>;

/// Errors of the registry surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A bot with this name is already registered.
    #[error("bot name {0} already registered")]
    Duplicate(String),

    /// A pool update referenced an unregistered name.
    #[error("bot name {0} not known")]
    UnknownBot(String),

    /// A pool update carried fewer entries than a full game needs.
    #[error("at least {needed} bot names must be included (repetitions count), got {got}")]
    PoolTooSmall { needed: usize, got: usize },
}

/// One weighted pool slot: the registry name plus the stable pseudonym key
/// (`AI-<Name>-<k>`) routed through the pseudonym service.
#[derive(Clone, Debug)]
struct PoolEntry {
    name: String,
    alias: String,
}

/// A bot drawn from the pool, paired with its pseudonym key.
pub struct DrawnBot {
    /// Fresh instance from the factory.
    pub bot: Box<dyn Bot>,
    /// Pseudonym-service key of the form `AI-<Name>-<k>`.
    pub alias: String,
}

struct Inner {
    factories: HashMap<String, BotFactory>,
    pool: Vec<PoolEntry>,
}

/// Name → factory map plus the weighted pool lobbies are padded from.
/// Read-mostly; a single reader/writer lock covers both.
pub struct BotRegistry {
    inner: RwLock<Inner>,
}

impl BotRegistry {
    /// An empty registry with an empty pool.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                factories: HashMap::new(),
                pool: Vec::new(),
            }),
        }
    }

    /// The built-in catalog with its default pool weights, biased toward
    /// the stronger policies.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let catalog: [(&str, BotFactory, usize); 7] = [
            ("Survivor", survivor::Survivor::boxed, 5),
            ("DeepSearch", deep_search::DeepSearch::boxed, 5),
            ("Jumper", jumper::Jumper::boxed, 4),
            ("Chameleon", chameleon::Chameleon::boxed, 4),
            ("RandomSafe", random_safe::RandomSafe::boxed, 3),
            ("Mirror", mirror::Mirror::boxed, 2),
            ("Script", script::Script::boxed, 1),
        ];
        let mut pool = Vec::new();
        for (name, factory, weight) in catalog {
            registry
                .register(name, factory)
                .expect("duplicate built-in bot name");
            for _ in 0..weight {
                pool.push(name.to_string());
            }
        }
        registry
            .update_pool(&pool)
            .expect("built-in pool invalid");
        registry
    }

    /// Register a bot under a unique name.
    pub fn register(&self, name: &str, factory: BotFactory) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        if inner.factories.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        inner.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<String> = inner.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the pool. Repetitions are allowed and increase draw weight.
    /// On error the previous pool is left unchanged.
    pub fn update_pool(&self, names: &[String]) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        if names.len() < PLAYERS_PER_GAME {
            return Err(RegistryError::PoolTooSmall {
                needed: PLAYERS_PER_GAME,
                got: names.len(),
            });
        }

        let mut counter: HashMap<&str, usize> = HashMap::new();
        let mut pool = Vec::with_capacity(names.len());
        for name in names {
            if !inner.factories.contains_key(name) {
                return Err(RegistryError::UnknownBot(name.clone()));
            }
            let k = counter.entry(name.as_str()).or_insert(0);
            *k += 1;
            pool.push(PoolEntry {
                name: name.clone(),
                alias: format!("AI-{name}-{k}"),
            });
        }
        inner.pool = pool;
        Ok(())
    }

    /// Draw `count` fresh bots without replacement.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the pool size. The engine guarantees
    /// `count <= PLAYERS_PER_GAME - 1`, which any valid pool satisfies.
    pub fn draw(&self, count: usize) -> Vec<DrawnBot> {
        let inner = self.inner.read().unwrap();
        assert!(
            count <= inner.pool.len(),
            "drawing {count} bots from a pool of {}",
            inner.pool.len()
        );

        let mut indices: Vec<usize> = (0..inner.pool.len()).collect();
        indices.shuffle(&mut rand::thread_rng());

        indices[..count]
            .iter()
            .map(|&i| {
                let entry = &inner.pool[i];
                let factory = inner.factories[&entry.name];
                DrawnBot {
                    bot: factory(),
                    alias: entry.alias.clone(),
                }
            })
            .collect()
    }

    /// Current pool size (for diagnostics).
    pub fn pool_len(&self) -> usize {
        self.inner.read().unwrap().pool.len()
    }
}

impl Default for BotRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_factory() -> Box<dyn Bot> {
        script::Script::boxed()
    }

    #[test]
    fn test_register_duplicate() {
        let registry = BotRegistry::new();
        registry.register("A", noop_factory).unwrap();
        assert_eq!(
            registry.register("A", noop_factory),
            Err(RegistryError::Duplicate("A".to_string()))
        );
    }

    #[test]
    fn test_names_sorted() {
        let registry = BotRegistry::new();
        registry.register("Zulu", noop_factory).unwrap();
        registry.register("Alpha", noop_factory).unwrap();
        registry.register("Mike", noop_factory).unwrap();
        assert_eq!(registry.names(), ["Alpha", "Mike", "Zulu"]);
    }

    #[test]
    fn test_update_pool_too_small() {
        let registry = BotRegistry::new();
        registry.register("A", noop_factory).unwrap();
        let err = registry.update_pool(&vec!["A".to_string(); 5]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::PoolTooSmall {
                needed: PLAYERS_PER_GAME,
                got: 5
            }
        );
    }

    #[test]
    fn test_update_pool_unknown_name_is_atomic() {
        let registry = BotRegistry::with_builtins();
        let before = registry.pool_len();

        let mut names = vec!["Survivor".to_string(); 5];
        names.push("DoesNotExist".to_string());
        assert_eq!(
            registry.update_pool(&names),
            Err(RegistryError::UnknownBot("DoesNotExist".to_string()))
        );
        assert_eq!(registry.pool_len(), before, "pool unchanged on error");
    }

    #[test]
    fn test_update_pool_repetitions_weight() {
        let registry = BotRegistry::new();
        registry.register("A", noop_factory).unwrap();
        registry.register("B", noop_factory).unwrap();
        let names = vec![
            "A".to_string(),
            "A".to_string(),
            "A".to_string(),
            "A".to_string(),
            "A".to_string(),
            "B".to_string(),
        ];
        registry.update_pool(&names).unwrap();
        assert_eq!(registry.pool_len(), 6);
    }

    #[test]
    fn test_draw_aliases_are_stable_keys() {
        let registry = BotRegistry::new();
        registry.register("A", noop_factory).unwrap();
        let names = vec!["A".to_string(); 6];
        registry.update_pool(&names).unwrap();

        let mut aliases: Vec<String> = registry.draw(6).into_iter().map(|d| d.alias).collect();
        aliases.sort();
        assert_eq!(aliases, ["A-1", "A-2", "A-3", "A-4", "A-5", "A-6"].map(|s| format!("AI-{s}")));
    }

    #[test]
    fn test_draw_without_replacement() {
        let registry = BotRegistry::with_builtins();
        let drawn = registry.draw(PLAYERS_PER_GAME - 1);
        assert_eq!(drawn.len(), PLAYERS_PER_GAME - 1);
        let mut aliases: Vec<&str> = drawn.iter().map(|d| d.alias.as_str()).collect();
        aliases.sort();
        aliases.dedup();
        assert_eq!(aliases.len(), PLAYERS_PER_GAME - 1, "no pool slot drawn twice");
    }

    #[test]
    #[should_panic]
    fn test_draw_beyond_pool_panics() {
        let registry = BotRegistry::new();
        registry.register("A", noop_factory).unwrap();
        registry.update_pool(&vec!["A".to_string(); 6]).unwrap();
        registry.draw(7);
    }

    #[test]
    fn test_builtin_pool_covers_a_full_game() {
        let registry = BotRegistry::with_builtins();
        assert!(registry.pool_len() >= PLAYERS_PER_GAME);
        assert_eq!(
            registry.names(),
            [
                "Chameleon",
                "DeepSearch",
                "Jumper",
                "Mirror",
                "RandomSafe",
                "Script",
                "Survivor"
            ]
        );
    }
}
