//! Live statistics worker.
//!
//! Lobby membership and running games are mirrored into a dedicated task
//! through send-only channels, so the engine and admission paths never wait
//! on page rendering. The worker answers page requests with a rendered HTML
//! snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{mpsc, oneshot};

/// Statistics of a single player.
#[derive(Debug, Clone)]
pub struct PlayerStats {
    /// API key for remote players, registry name for bots.
    pub key: String,
    /// Public pseudonym.
    pub pseudonym: String,
    /// Whether this participant is a bot.
    pub bot: bool,
}

/// Statistics of one running game.
#[derive(Debug, Clone)]
pub struct GameStats {
    /// Match id, as used in the replay log.
    pub key: String,
    /// When the game started.
    pub start: DateTime<Utc>,
    /// Participants by player id.
    pub players: BTreeMap<u8, PlayerStats>,
}

enum Update {
    GameStarted(GameStats),
    GameEnded(String),
    LobbyJoined(String),
    LobbyLeft(String),
    Page(oneshot::Sender<String>),
}

/// Cheap-to-clone handle to the worker. All sends are non-blocking.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<Update>,
}

impl StatsHandle {
    /// Record a newly started game.
    pub fn game_started(&self, stats: GameStats) {
        let _ = self.tx.send(Update::GameStarted(stats));
    }

    /// Remove a finished game.
    pub fn game_ended(&self, key: String) {
        let _ = self.tx.send(Update::GameEnded(key));
    }

    /// Record a key entering the lobby.
    pub fn lobby_joined(&self, key: String) {
        let _ = self.tx.send(Update::LobbyJoined(key));
    }

    /// Remove a key from the lobby.
    pub fn lobby_left(&self, key: String) {
        let _ = self.tx.send(Update::LobbyLeft(key));
    }

    /// Render the current statistics page.
    pub async fn page(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Update::Page(tx)).ok()?;
        rx.await.ok()
    }
}

/// Spawn the worker and hand back its channel handle.
pub fn spawn(max_wait: Duration) -> StatsHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut games: BTreeMap<String, GameStats> = BTreeMap::new();
        let mut lobby: BTreeSet<String> = BTreeSet::new();
        while let Some(update) = rx.recv().await {
            match update {
                Update::GameStarted(stats) => {
                    games.insert(stats.key.clone(), stats);
                }
                Update::GameEnded(key) => {
                    games.remove(&key);
                }
                Update::LobbyJoined(key) => {
                    lobby.insert(key);
                }
                Update::LobbyLeft(key) => {
                    lobby.remove(&key);
                }
                Update::Page(reply) => {
                    // Receiver may be gone; rendering is best-effort.
                    let _ = reply.send(render(&games, &lobby, max_wait));
                }
            }
        }
    });
    StatsHandle { tx }
}

/// Escape a dynamic value for interpolation into the HTML page. API keys
/// come from an operator-edited file and must not be able to break markup.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render(
    games: &BTreeMap<String, GameStats>,
    lobby: &BTreeSet<String>,
    max_wait: Duration,
) -> String {
    let mut page = String::new();
    let _ = write!(
        page,
        "<!DOCTYPE HTML>\n<html lang=\"en\">\n<body>\n\
         <p>Time: {}</p>\n<p>Lobby max. wait time: {:?}</p>\n<h1>Lobby</h1>\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        max_wait,
    );

    if lobby.is_empty() {
        page.push_str("<p>Empty</p>\n");
    } else {
        page.push_str("<ul>\n");
        for key in lobby {
            let _ = writeln!(page, "<li>{}</li>", escape(key));
        }
        page.push_str("</ul>\n");
    }

    page.push_str("<h1>Games</h1>\n");
    for (id, game) in games {
        let _ = write!(
            page,
            "<h2>{}</h2>\n<p>Start: {}</p>\n<h3>Players</h3>\n\
             <table>\n<tr><th>ID</th><th>Key</th><th>Pseudonym</th><th>Bot</th></tr>\n",
            escape(id),
            game.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        for (pid, player) in &game.players {
            let _ = writeln!(
                page,
                "<tr><td>{pid}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&player.key),
                escape(&player.pseudonym),
                player.bot,
            );
        }
        page.push_str("</table>\n");
    }
    page.push_str("</body>\n</html>\n");
    page
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_page_reflects_updates() {
        let handle = spawn(Duration::from_secs(300));
        handle.lobby_joined("key-a".to_string());

        let mut players = BTreeMap::new();
        players.insert(
            1,
            PlayerStats {
                key: "key-b".to_string(),
                pseudonym: "Falcon-Quartz-Willow".to_string(),
                bot: false,
            },
        );
        handle.game_started(GameStats {
            key: "GAME1".to_string(),
            start: Utc::now(),
            players,
        });

        let page = handle.page().await.unwrap();
        assert!(page.contains("key-a"));
        assert!(page.contains("GAME1"));
        assert!(page.contains("Falcon-Quartz-Willow"));

        handle.game_ended("GAME1".to_string());
        handle.lobby_left("key-a".to_string());
        let page = handle.page().await.unwrap();
        assert!(!page.contains("GAME1"));
        assert!(page.contains("<p>Empty</p>"));
    }

    #[tokio::test]
    async fn test_page_escapes_keys() {
        let handle = spawn(Duration::from_secs(300));
        handle.lobby_joined("<script>\"evil\"&'</script>".to_string());

        let page = handle.page().await.unwrap();
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;&#34;evil&#34;&amp;&#39;&lt;/script&gt;"));
    }

    #[test]
    fn test_escape_passthrough() {
        assert_eq!(escape("plain-key_123"), "plain-key_123");
    }
}
