//! Real-time notification vocabulary and a per-game broadcast bus.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::board::{GameId, GameSnapshot};
use crate::piece::{Color, PieceId};
use crate::quantum::QuantumEvent;
use crate::square::Square;

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveType { Classical, QuantumSplit, Capture }

/// Events pushed to every viewer of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    MoveMade {
        game_id: GameId,
        player: Color,
        piece_id: PieceId,
        from_square: Square,
        to_square: Square,
        move_type: MoveType,
        quantum_events: Vec<QuantumEvent>,
    },
    PieceObserved {
        game_id: GameId,
        player: Color,
        piece_id: PieceId,
        collapsed_position: Square,
        cascade_events: Vec<QuantumEvent>,
    },
    GameUpdated(GameSnapshot),
    PlayerDisconnected { game_id: GameId, player: Color },
    SyncResponse(GameSnapshot),
}

/// Late joiners ask for the full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Sync(SyncRequest),
}

/// Capacity of each game's channel. A viewer that falls further behind gets
/// [`broadcast::error::TryRecvError::Lagged`] and skips to newer events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Fan-out of [`ServerEvent`]s, one broadcast channel per game.
#[derive(Debug, Default)]
pub struct EventBus {
    channels: Mutex<HashMap<GameId, broadcast::Sender<ServerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<GameId, broadcast::Sender<ServerEvent>>> {
        self.channels.lock().unwrap_or_else(|poisoned| {
            warn!("event channel table lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn subscribe(&self, game_id: &GameId) -> broadcast::Receiver<ServerEvent> {
        let rx = self
            .channels()
            .entry(game_id.clone())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe();
        debug!(game_id = %game_id, "viewer subscribed");
        rx
    }

    /// Returns how many viewers received the event. A game whose viewers
    /// have all gone loses its channel.
    pub fn publish(&self, game_id: &GameId, event: ServerEvent) -> usize {
        let mut channels = self.channels();
        let Some(tx) = channels.get(game_id) else { return 0 };
        match tx.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                channels.remove(game_id);
                debug!(game_id = %game_id, "no viewers left, channel dropped");
                0
            }
        }
    }

    pub fn subscriber_count(&self, game_id: &GameId) -> usize {
        self.channels().get(game_id).map_or(0, broadcast::Sender::receiver_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_to_subscribers_of_the_game_only() {
        let bus = EventBus::new();
        let (game, other) = (GameId::from("g1"), GameId::from("g2"));
        let mut rx = bus.subscribe(&game);
        let mut rx_other = bus.subscribe(&other);

        let event = ServerEvent::PlayerDisconnected { game_id: game.clone(), player: Color::Black };
        assert_eq!(bus.publish(&game, event.clone()), 1);
        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let game = GameId::from("g1");
        let mut rx = bus.subscribe(&game);
        drop(bus.subscribe(&game));
        assert_eq!(bus.subscriber_count(&game), 1);
        let event = ServerEvent::PlayerDisconnected { game_id: game.clone(), player: Color::White };
        assert_eq!(bus.publish(&game, event.clone()), 1);
        assert_eq!(rx.try_recv().unwrap(), event);

        drop(rx);
        assert_eq!(bus.publish(&game, event), 0);
        assert_eq!(bus.subscriber_count(&game), 0);
    }

    #[test]
    fn slow_viewers_lag_instead_of_blocking() {
        let bus = EventBus::new();
        let game = GameId::from("g1");
        let mut rx = bus.subscribe(&game);
        for _ in 0..EVENT_CHANNEL_CAPACITY + 1 {
            bus.publish(&game, ServerEvent::PlayerDisconnected { game_id: game.clone(), player: Color::Black });
        }
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(1))));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn wire_format_uses_event_names() {
        let event = ServerEvent::PlayerDisconnected { game_id: GameId::from("g1"), player: Color::White };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "player_disconnected");
        assert_eq!(json["data"]["player"], "white");

        let msg: ClientMessage = serde_json::from_str(r#"{"event":"sync","data":{"game_id":"g1"}}"#).unwrap();
        assert_eq!(msg, ClientMessage::Sync(SyncRequest { game_id: GameId::from("g1") }));
        assert_eq!(serde_json::to_value(MoveType::QuantumSplit).unwrap(), "quantum_split");
    }
}
