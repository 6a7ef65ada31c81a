//! API key gate.
//!
//! Keys are opaque bearer tokens compared by equality. Each key starts with
//! [`NUMBER_ALLOWED_GAMES`] credits; claiming takes one, releasing returns
//! one. Releases never push the balance above the initial credit.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

/// Number of concurrent games a key may participate in.
pub const NUMBER_ALLOWED_GAMES: u32 = 1;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Key is valid and a credit was taken.
    Ok,
    /// Key is valid but all credits are in use.
    RateLimited,
    /// Key is not on the list.
    Unknown,
}

/// Credit accounting for all known API keys.
pub struct TokenGate {
    credits: Mutex<HashMap<String, u32>>,
}

impl TokenGate {
    /// Load keys from a file: one key per line, `#`-prefixed lines are
    /// comments, blank lines are ignored.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::from_tokens(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        ))
    }

    /// Build a gate from an in-memory token list.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credits = tokens
            .into_iter()
            .map(|t| (t.into(), NUMBER_ALLOWED_GAMES))
            .collect();
        Self {
            credits: Mutex::new(credits),
        }
    }

    /// Try to claim a credit for `key`.
    pub fn claim(&self, key: &str) -> TokenCheck {
        if key.is_empty() {
            info!(key, "claim: invalid");
            return TokenCheck::Unknown;
        }
        let mut credits = self.credits.lock().unwrap();
        match credits.get_mut(key) {
            None => {
                info!(key, "claim: invalid");
                TokenCheck::Unknown
            }
            Some(0) => {
                info!(key, "claim: ratelimit");
                TokenCheck::RateLimited
            }
            Some(available) => {
                *available -= 1;
                info!(key, "claim: ok");
                TokenCheck::Ok
            }
        }
    }

    /// Return one credit for `key`, capped at the initial allowance.
    /// Unknown keys are ignored.
    pub fn release(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut credits = self.credits.lock().unwrap();
        if let Some(available) = credits.get_mut(key) {
            *available = (*available + 1).min(NUMBER_ALLOWED_GAMES);
        }
    }
}

/// A claimed credit that can be handed around and released exactly once,
/// no matter how many owners try.
pub struct TokenTicket {
    gate: Arc<TokenGate>,
    key: String,
    released: AtomicBool,
}

impl TokenTicket {
    /// Wrap a credit the caller has already claimed from `gate`.
    pub fn new(gate: Arc<TokenGate>, key: String) -> Self {
        Self {
            gate,
            key,
            released: AtomicBool::new(false),
        }
    }

    /// The claimed API key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the claimed credit. Later calls have no effect.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.gate.release(&self.key);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
