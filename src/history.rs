//! Move history log.
//!
//! Appends happen after the board commit; a failing log never undoes a move.

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::board::GameId;
use crate::events::MoveType;
use crate::piece::{Color, PieceId, PieceType};
use crate::quantum::QuantumEvent;
use crate::square::Square;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub sequence: u32, // Assigned by the log, 1-based per game
    pub game_id: GameId,
    pub turn_number: u32,
    pub player: Color,
    pub piece_id: PieceId,
    pub piece_type: PieceType,
    pub from_square: Square,
    pub to_square: Square,
    pub move_type: MoveType,
    pub quantum_events: Vec<QuantumEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error with file '{0}': {1}")]
    Io(String, std::io::Error),
}

pub trait MoveHistory: Send + Sync {
    /// Stores the record and returns the sequence number it was given.
    fn append(&self, record: MoveRecord) -> Result<u32, HistoryError>;

    fn moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>, HistoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    games: Mutex<HashMap<GameId, Vec<MoveRecord>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MoveHistory for InMemoryHistory {
    fn append(&self, mut record: MoveRecord) -> Result<u32, HistoryError> {
        let mut games = self.games.lock().map_err(|_| HistoryError::Unavailable("history lock poisoned".to_string()))?;
        let moves = games.entry(record.game_id.clone()).or_default();
        record.sequence = moves.len() as u32 + 1;
        let sequence = record.sequence;
        moves.push(record);
        Ok(sequence)
    }

    fn moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>, HistoryError> {
        let games = self.games.lock().map_err(|_| HistoryError::Unavailable("history lock poisoned".to_string()))?;
        Ok(games.get(game_id).cloned().unwrap_or_default())
    }
}

/// Writes a game's history as pretty JSON.
pub fn save_to_file(history: &dyn MoveHistory, game_id: &GameId, filename: &str) -> Result<(), HistoryError> {
    let moves = history.moves(game_id)?;
    let json = serde_json::to_string_pretty(&moves)?;
    fs::write(filename, json).map_err(|e| HistoryError::Io(filename.to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(game: &GameId, piece: &str, from: &str, to: &str) -> MoveRecord {
        MoveRecord {
            sequence: 0,
            game_id: game.clone(),
            turn_number: 1,
            player: Color::White,
            piece_id: PieceId::from(piece),
            piece_type: PieceType::Pawn,
            from_square: from.parse().unwrap(),
            to_square: to.parse().unwrap(),
            move_type: MoveType::QuantumSplit,
            quantum_events: Vec::new(),
        }
    }

    #[test]
    fn sequences_are_per_game() {
        let history = InMemoryHistory::new();
        let (g1, g2) = (GameId::from("g1"), GameId::from("g2"));
        assert_eq!(history.append(record(&g1, "pawn-w-4", "d2", "d4")).unwrap(), 1);
        assert_eq!(history.append(record(&g1, "pawn-b-4", "d7", "d5")).unwrap(), 2);
        assert_eq!(history.append(record(&g2, "pawn-w-1", "a2", "a3")).unwrap(), 1);
        let moves = history.moves(&g1).unwrap();
        assert_eq!(moves.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert!(history.moves(&GameId::from("none")).unwrap().is_empty());
    }

    #[test]
    fn saves_pretty_json() {
        let history = InMemoryHistory::new();
        let game = GameId::from("g1");
        history.append(record(&game, "pawn-w-4", "d2", "d4")).unwrap();
        let path = std::env::temp_dir().join(format!("quantum_chess_history_{}.json", std::process::id()));
        let filename = path.to_string_lossy().to_string();
        save_to_file(&history, &game, &filename).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        let back: Vec<MoveRecord> = serde_json::from_str(&written).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].move_type, MoveType::QuantumSplit);
        fs::remove_file(&path).ok();
    }
}
