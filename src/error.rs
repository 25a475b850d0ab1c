//! Error taxonomy shared by every engine and by the session controller.
//!
//! Legality failures are recovered locally as [`MoveRejection`] and surface to
//! callers as [`ChessError::InvalidMove`]; storage failures are fatal for the
//! operation that hit them.

use serde::{Deserialize, Serialize};

use crate::board::{GameId, GameStatus};
use crate::config::ConfigError;
use crate::piece::{Color, PieceId, PieceType, QuantumState};
use crate::square::Square;

/// Errors surfaced by the quantum chess core.
#[derive(Debug, thiserror::Error)]
pub enum ChessError {
    /// No game with this identifier exists in the repository.
    #[error("Game '{0}' not found")]
    GameNotFound(GameId),

    /// Unknown piece id, or the piece has already been captured.
    #[error("Piece '{0}' not found")]
    PieceNotFound(PieceId),

    /// The move failed a legality check.
    #[error("Invalid move {from} -> {to}: {reason}")]
    InvalidMove {
        from: Square,
        to: Square,
        reason: String,
        piece_id: Option<PieceId>,
    },

    /// The acting colour is not the active colour.
    #[error("It's {active}'s turn, but {attempted} attempted to move")]
    TurnOrder {
        game_id: GameId,
        active: Color,
        attempted: Color,
    },

    /// The operation needs a superposition or entanglement that is not there.
    #[error("Cannot perform '{operation}' on piece '{piece_id}' in state '{state}'")]
    QuantumState {
        piece_id: PieceId,
        state: QuantumState,
        operation: &'static str,
    },

    /// Voluntary observation refused (no tokens left, wrong target...).
    #[error("Cannot observe piece '{piece_id}': {reason}")]
    Observation { piece_id: PieceId, reason: String },

    /// The game is not in a status that allows the operation.
    #[error("Cannot perform '{operation}' on game '{game_id}' with status '{status}'")]
    GameState {
        game_id: GameId,
        status: GameStatus,
        operation: &'static str,
    },

    /// Repository or lock failure. Fatal for the current operation.
    #[error("Storage error during {operation}: {reason}")]
    Storage {
        operation: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ChessError {
    /// Builds an `InvalidMove` from a legality rejection.
    pub fn invalid_move(from: Square, to: Square, rejection: MoveRejection, piece_id: Option<PieceId>) -> Self {
        ChessError::InvalidMove { from, to, reason: rejection.to_string(), piece_id }
    }

    pub fn storage(operation: &'static str, reason: impl Into<String>) -> Self {
        ChessError::Storage { operation, reason: reason.into() }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ChessError::GameNotFound(_) => "GAME_NOT_FOUND",
            ChessError::PieceNotFound(_) => "PIECE_NOT_FOUND",
            ChessError::InvalidMove { .. } => "INVALID_MOVE",
            ChessError::TurnOrder { .. } => "TURN_ORDER_ERROR",
            ChessError::QuantumState { .. } => "QUANTUM_STATE_ERROR",
            ChessError::Observation { .. } => "OBSERVATION_ERROR",
            ChessError::GameState { .. } => "GAME_STATE_ERROR",
            ChessError::Storage { .. } => "STORAGE_ERROR",
            ChessError::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether the error is a rejected user action (nothing was mutated)
    /// rather than an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ChessError::Storage { .. } | ChessError::Config(_))
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { code: self.code().to_string(), message: self.to_string() }
    }
}

/// Serialized error body handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Why the legality engine refused a move. `Display` is the reason string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejection {
    #[error("Piece {0} not found")]
    PieceNotFound(PieceId),
    #[error("Piece {0} has been captured")]
    PieceCaptured(PieceId),
    #[error("Cannot capture own piece")]
    OwnPieceAtTarget,
    #[error("Square is held by superposed {0}")]
    FriendlyGhostAtTarget(PieceId),
    #[error("Invalid move pattern for {0}")]
    InvalidPattern(PieceType),
    #[error("Path is blocked at {0}")]
    PathBlocked(Square),
    #[error("Move would leave the {0} king in check")]
    LeavesKingInCheck(Color),
    #[error("Piece {0} has no definite square to move from")]
    NoDefiniteSquare(PieceId),
    #[error("Piece {0} is not on {1}")]
    NotOnSquare(PieceId, Square),
}

pub type Result<T, E = ChessError> = std::result::Result<T, E>;
