//! Structured game-event logging.
//!
//! Engines receive a [`GameEventLog`] at construction instead of reaching for a
//! global logger. Diagnostics that are not game events use `tracing` directly.

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::board::GameId;
use crate::piece::PieceId;

/// One game-level event (superposition created, observer moved, turn advanced...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLogEvent {
    pub kind: &'static str,
    pub game_id: Option<GameId>,
    pub piece_id: Option<PieceId>,
    pub message: String,
}

impl GameLogEvent {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        GameLogEvent { kind, game_id: None, piece_id: None, message: message.into() }
    }

    pub fn game(mut self, game_id: &GameId) -> Self {
        self.game_id = Some(game_id.clone());
        self
    }

    pub fn piece(mut self, piece_id: &PieceId) -> Self {
        self.piece_id = Some(piece_id.clone());
        self
    }
}

pub trait GameEventLog: Send + Sync {
    fn record(&self, event: GameLogEvent);
}

/// Forwards game events to `tracing` under the `quantum_chess::game` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl GameEventLog for TracingEventLog {
    fn record(&self, event: GameLogEvent) {
        info!(
            target: "quantum_chess::game",
            kind = event.kind,
            game_id = event.game_id.as_ref().map(|g| g.as_str()).unwrap_or("-"),
            piece_id = event.piece_id.as_ref().map(|p| p.as_str()).unwrap_or("-"),
            "{}",
            event.message
        );
    }
}

/// Keeps every event in memory; handy when a caller wants to inspect what happened.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<GameLogEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<GameLogEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl GameEventLog for MemoryEventLog {
    fn record(&self, event: GameLogEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Shared handle for the default tracing-backed log.
pub fn tracing_log() -> Arc<dyn GameEventLog> {
    Arc::new(TracingEventLog)
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Returns false if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_keeps_order_and_context() {
        let log = MemoryEventLog::new();
        let game = GameId::from("g-1");
        let piece = PieceId::from("knight-w-1");
        log.record(GameLogEvent::new("superposition_created", "split").game(&game).piece(&piece));
        log.record(GameLogEvent::new("turn_advanced", "turn 2").game(&game));

        assert_eq!(log.kinds(), vec!["superposition_created", "turn_advanced"]);
        let first = &log.events()[0];
        assert_eq!(first.piece_id.as_ref(), Some(&piece));
        assert_eq!(first.game_id.as_ref(), Some(&game));
    }
}
