//! Quantum chess: classical chess extended with superposition, entanglement
//! and observation.
//!
//! Knights and pawns can split into two positions, pieces whose ghosts overlap
//! become entangled, and Observers (plus voluntary observation tokens) force
//! quantum pieces back into a single definite square.

pub mod board;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod observer;
pub mod piece;
pub mod quantum;
pub mod repository;
pub mod rules;
pub mod session;
pub mod square;

pub use board::{Board, GameId, GameInfo, GameSnapshot, GameStatus, PieceData};
pub use config::{ConfigError, EngineConfig};
pub use error::{ChessError, MoveRejection, Result};
pub use events::{MoveType, ServerEvent, SyncRequest};
pub use piece::{Color, Piece, PieceId, PieceType, QuantumState};
pub use quantum::{QuantumEngine, QuantumEvent};
pub use session::{GameService, MoveRequest, MoveResponse, ObserveRequest, ObserveResponse, ObserverMoveRequest};
pub use square::Square;
