//! Turn/session controller.
//!
//! Owns the engines and drives each request through the move pipeline:
//! validation, state change, entanglement scan, auto-collapse sweep, turn
//! advance and terminal-state check. The whole pipeline runs inside one
//! [`BoardRepository::update`], so it commits entirely or not at all. History
//! and broadcast happen after the commit.

use std::sync::Arc;

use rand::rngs::ThreadRng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::board::{Board, GameId, GameSnapshot, GameStatus};
use crate::config::EngineConfig;
use crate::error::{ChessError, Result};
use crate::events::{EventBus, MoveType, ServerEvent, SyncRequest};
use crate::history::{InMemoryHistory, MoveHistory, MoveRecord};
use crate::logging::{tracing_log, GameEventLog, GameLogEvent};
use crate::observer::{AffectedPiece, CollapsedPieceInfo, ObserverEngine, ObserverStats};
use crate::piece::{Color, PieceId, PieceType};
use crate::quantum::{should_trigger_superposition, QuantumEngine, QuantumEvent};
use crate::repository::{BoardRepository, InMemoryRepository};
use crate::rules::ChessRules;
use crate::square::Square;

// --- Request / Response shapes ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub game_id: GameId,
    pub from_square: Square,
    pub to_square: Square,
    pub player: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub success: bool,
    pub move_type: MoveType,
    pub quantum_events: Vec<QuantumEvent>,
    pub new_state: GameSnapshot,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveRequest {
    pub game_id: GameId,
    pub piece_id: PieceId,
    pub player: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveResponse {
    pub success: bool,
    pub collapsed_position: Square,
    pub cascade_events: Vec<QuantumEvent>,
    pub new_state: GameSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverMoveRequest {
    pub game_id: GameId,
    pub observer_id: PieceId,
    pub to_square: Square,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverMoveResponse {
    pub success: bool,
    pub new_position: Square,
    pub observed_pieces: Vec<PieceId>,
    pub collapsed_states: Vec<CollapsedPieceInfo>,
    pub quantum_events: Vec<QuantumEvent>,
    pub new_state: GameSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidMovesResponse {
    pub game_id: GameId,
    pub piece_id: PieceId,
    pub valid_moves: Vec<Square>,
    pub quantum_moves: Vec<Square>,
    pub capture_moves: Vec<Square>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationZoneResponse {
    pub observer_id: PieceId,
    pub position: Square,
    pub zone_squares: Vec<Square>,
    pub affected_pieces: Vec<AffectedPiece>,
}

// Result of one committed move, carried out of the repository closure
struct Committed {
    piece_id: PieceId,
    piece_type: PieceType,
    player: Color,
    turn: u32,
    move_type: MoveType,
    events: Vec<QuantumEvent>,
    snapshot: GameSnapshot,
}

pub struct GameService {
    repository: Arc<dyn BoardRepository>,
    rules: ChessRules,
    observer: ObserverEngine,
    history: Arc<dyn MoveHistory>,
    events: EventBus,
    config: EngineConfig,
    log: Arc<dyn GameEventLog>,
}

impl GameService {
    /// In-memory repository and history, game events logged through `tracing`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(InMemoryRepository::new()), Arc::new(InMemoryHistory::new()), tracing_log())
    }

    pub fn with_parts(
        config: EngineConfig,
        repository: Arc<dyn BoardRepository>,
        history: Arc<dyn MoveHistory>,
        log: Arc<dyn GameEventLog>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(GameService {
            repository,
            rules: ChessRules::new(log.clone()),
            observer: ObserverEngine::new(log.clone()),
            history,
            events: EventBus::new(),
            config,
            log,
        })
    }

    // Built per operation on the calling thread's generator, so games share no RNG state
    fn quantum_engine(&self) -> Result<QuantumEngine<ThreadRng>> {
        Ok(QuantumEngine::with_rng(self.config.clone(), self.log.clone(), rand::rng())?)
    }

    fn record(&self, game_id: &GameId, kind: &'static str, message: String) {
        self.log.record(GameLogEvent::new(kind, message).game(game_id));
    }

    // --- Game lifecycle ---

    pub fn new_game(&self, white_player: &str, black_player: &str) -> Result<GameId> {
        let game_id = self.repository.insert(Board::standard(GameId::generate(), white_player, black_player))?;
        self.record(&game_id, "game_created", format!("{} (white) vs {} (black)", white_player, black_player));
        Ok(game_id)
    }

    /// Stores a prepared position (custom layouts, resumed games).
    pub fn load_game(&self, board: Board) -> Result<GameId> {
        let game_id = self.repository.insert(board)?;
        self.record(&game_id, "game_loaded", "custom position loaded".to_string());
        Ok(game_id)
    }

    pub fn end_game(&self, game_id: &GameId, status: GameStatus, winner: Option<Color>) -> Result<GameSnapshot> {
        let mut snapshot = None;
        self.repository.update(game_id, &mut |board| {
            ensure_active(board, "end_game")?;
            if status == GameStatus::Active {
                return Err(ChessError::GameState { game_id: game_id.clone(), status, operation: "end_game" });
            }
            board.info.status = status;
            board.info.winner = winner;
            snapshot = Some(board.snapshot());
            Ok(())
        })?;
        let snapshot = snapshot.ok_or_else(|| ChessError::storage("end_game", "no snapshot after commit"))?;
        self.record(game_id, "game_ended", format!("game ended: {}", status));
        self.events.publish(game_id, ServerEvent::GameUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    // --- Queries ---

    pub fn state(&self, game_id: &GameId) -> Result<GameSnapshot> {
        Ok(self.repository.snapshot(game_id)?.snapshot())
    }

    /// Full board copy, e.g. for rendering.
    pub fn board(&self, game_id: &GameId) -> Result<Board> {
        self.repository.snapshot(game_id)
    }

    pub fn valid_moves(&self, game_id: &GameId, piece_id: &PieceId) -> Result<ValidMovesResponse> {
        let board = self.repository.snapshot(game_id)?;
        let piece = board.live_piece(piece_id)?;
        let (valid_moves, quantum_moves, capture_moves) = if piece.kind == PieceType::Observer {
            let moves = self.observer.get_valid_moves(&board, piece_id)?;
            let captures = moves.iter().copied().filter(|sq| board.get_piece_at_square(*sq).is_some()).collect();
            (moves, Vec::new(), captures)
        } else {
            let moves = self.rules.get_valid_moves(&board, piece_id);
            (moves.valid_moves, moves.quantum_moves, moves.capture_moves)
        };
        Ok(ValidMovesResponse { game_id: game_id.clone(), piece_id: piece_id.clone(), valid_moves, quantum_moves, capture_moves })
    }

    pub fn observation_zone(&self, game_id: &GameId, observer_id: &PieceId) -> Result<ObservationZoneResponse> {
        let board = self.repository.snapshot(game_id)?;
        let zone_squares = self.observer.get_observation_zone_preview(&board, observer_id)?;
        let position = board.live_piece(observer_id)?.real_square().ok_or_else(|| ChessError::PieceNotFound(observer_id.clone()))?;
        Ok(ObservationZoneResponse {
            observer_id: observer_id.clone(),
            position,
            zone_squares,
            affected_pieces: self.observer.get_affected_pieces_in_zone(&board, observer_id)?,
        })
    }

    pub fn observer_stats(&self, game_id: &GameId, observer_id: &PieceId) -> Result<ObserverStats> {
        let board = self.repository.snapshot(game_id)?;
        self.observer.observer_stats(&board, observer_id)
    }

    pub fn moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>> {
        self.repository.snapshot(game_id)?;
        self.history.moves(game_id).map_err(|e| ChessError::storage("read history", e.to_string()))
    }

    pub fn history(&self) -> &dyn MoveHistory {
        self.history.as_ref()
    }

    // --- Real-time ---

    pub fn subscribe(&self, game_id: &GameId) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe(game_id)
    }

    pub fn sync(&self, request: &SyncRequest) -> Result<ServerEvent> {
        Ok(ServerEvent::SyncResponse(self.state(&request.game_id)?))
    }

    pub fn disconnect(&self, game_id: &GameId, player: Color) -> Result<()> {
        self.repository.snapshot(game_id)?;
        self.record(game_id, "player_disconnected", format!("{} disconnected", player));
        self.events.publish(game_id, ServerEvent::PlayerDisconnected { game_id: game_id.clone(), player });
        Ok(())
    }

    // --- Mutations ---

    pub fn make_move(&self, request: &MoveRequest) -> Result<MoveResponse> {
        let (from, to, player) = (request.from_square, request.to_square, request.player);
        let mut committed = None;
        self.repository.update(&request.game_id, &mut |board| {
            ensure_active(board, "make_move")?;
            ensure_turn(board, player)?;
            let piece = board.get_piece_at_square(from).filter(|p| p.color == player).ok_or_else(|| ChessError::InvalidMove {
                from,
                to,
                reason: format!("No {} piece at {}", player, from),
                piece_id: None,
            })?;
            let (piece_id, piece_type, quantum_ability) = (piece.id.clone(), piece.kind, piece.quantum_ability);
            let turn = board.info.current_turn;
            let mut quantum = self.quantum_engine()?;
            let mut events = Vec::new();

            let move_type = if piece_type == PieceType::Observer {
                let moved = self.observer.move_observer(board, &mut quantum, &piece_id, to)?;
                events.extend(moved.observation.quantum_events);
                if moved.captured.is_some() { MoveType::Capture } else { MoveType::Classical }
            } else {
                self.rules
                    .is_valid_move(board, &piece_id, from, to)
                    .map_err(|rejection| ChessError::invalid_move(from, to, rejection, Some(piece_id.clone())))?;
                if quantum_ability && should_trigger_superposition(piece_type, from, to) {
                    events.push(quantum.create_superposition(board, &piece_id, from, to)?);
                    MoveType::QuantumSplit
                } else {
                    let target = board.get_piece_at_square(to).map(|p| p.id.clone());
                    if let Some(target) = &target {
                        board.capture_piece(target, &piece_id)?;
                    }
                    board.update_piece_position(&piece_id, from, to)?;
                    if target.is_some() { MoveType::Capture } else { MoveType::Classical }
                }
            };

            events.extend(self.finish_turn(board, &mut quantum)?);
            committed = Some(Committed { piece_id, piece_type, player, turn, move_type, events, snapshot: board.snapshot() });
            Ok(())
        })?;

        let committed = committed.ok_or_else(|| ChessError::storage("make_move", "no result after commit"))?;
        self.after_move(&request.game_id, from, to, &committed);
        Ok(MoveResponse {
            success: true,
            move_type: committed.move_type,
            quantum_events: committed.events,
            new_state: committed.snapshot,
            message: format!("Move executed: {} -> {}", from, to),
        })
    }

    pub fn move_observer(&self, request: &ObserverMoveRequest) -> Result<ObserverMoveResponse> {
        let to = request.to_square;
        let mut result = None;
        self.repository.update(&request.game_id, &mut |board| {
            ensure_active(board, "move_observer")?;
            let player = board.live_piece(&request.observer_id)?.color;
            ensure_turn(board, player)?;
            let turn = board.info.current_turn;
            let mut quantum = self.quantum_engine()?;

            let moved = self.observer.move_observer(board, &mut quantum, &request.observer_id, to)?;
            let mut events = moved.observation.quantum_events.clone();
            events.extend(self.finish_turn(board, &mut quantum)?);
            let committed = Committed {
                piece_id: request.observer_id.clone(),
                piece_type: PieceType::Observer,
                player,
                turn,
                move_type: if moved.captured.is_some() { MoveType::Capture } else { MoveType::Classical },
                events,
                snapshot: board.snapshot(),
            };
            result = Some((moved.from, moved, committed));
            Ok(())
        })?;

        let (from, moved, committed) = result.ok_or_else(|| ChessError::storage("move_observer", "no result after commit"))?;
        self.after_move(&request.game_id, from, to, &committed);
        Ok(ObserverMoveResponse {
            success: true,
            new_position: moved.new_position,
            observed_pieces: moved.observation.observed_pieces,
            collapsed_states: moved.observation.collapsed_states,
            quantum_events: committed.events,
            new_state: committed.snapshot,
        })
    }

    /// Voluntary observation: spends one token and does not end the turn.
    pub fn observe(&self, request: &ObserveRequest) -> Result<ObserveResponse> {
        let mut result = None;
        self.repository.update(&request.game_id, &mut |board| {
            ensure_active(board, "observe")?;
            ensure_turn(board, request.player)?;
            board.live_piece(&request.piece_id)?;
            if board.info.observations_left(request.player) == 0 {
                return Err(ChessError::Observation {
                    piece_id: request.piece_id.clone(),
                    reason: "No observations remaining this turn".to_string(),
                });
            }
            let mut quantum = self.quantum_engine()?;
            let (square, cascade) = quantum.collapse_superposition(board, &request.piece_id)?;
            board.spend_observation_token(request.player);
            self.evaluate_status(board);
            result = Some((square, cascade, board.snapshot()));
            Ok(())
        })?;

        let (collapsed_position, cascade_events, new_state) =
            result.ok_or_else(|| ChessError::storage("observe", "no result after commit"))?;
        let game_id = &request.game_id;
        self.record(
            game_id,
            "observation_executed",
            format!("{} observed {}, collapsed to {}", request.player, request.piece_id, collapsed_position),
        );
        self.events.publish(
            game_id,
            ServerEvent::PieceObserved {
                game_id: game_id.clone(),
                player: request.player,
                piece_id: request.piece_id.clone(),
                collapsed_position,
                cascade_events: cascade_events.clone(),
            },
        );
        self.events.publish(game_id, ServerEvent::GameUpdated(new_state.clone()));
        Ok(ObserveResponse { success: true, collapsed_position, cascade_events, new_state })
    }

    // Entanglement scan, auto-collapse sweep, turn advance, terminal check
    fn finish_turn(&self, board: &mut Board, quantum: &mut QuantumEngine<ThreadRng>) -> Result<Vec<QuantumEvent>> {
        let mut events = quantum.check_for_entanglement(board)?;
        events.extend(quantum.check_auto_collapses(board)?);
        board.advance_turn(self.config.observations_per_turn);
        self.record(board.game_id(), "turn_advanced", format!("turn {}, {} to move", board.info.current_turn, board.info.active_player));
        self.evaluate_status(board);
        Ok(events)
    }

    /// A missing king loses outright (quantum captures can take one); otherwise
    /// the side to move is tested for checkmate and stalemate.
    fn evaluate_status(&self, board: &mut Board) {
        let to_move = board.info.active_player;
        for color in [to_move, to_move.opponent()] {
            if board.king_square(color).is_none() {
                board.info.status = GameStatus::Checkmate;
                board.info.winner = Some(color.opponent());
                self.record(board.game_id(), "game_over", format!("{} king captured", color));
                return;
            }
        }
        if self.rules.is_checkmate(board, to_move) {
            board.info.status = GameStatus::Checkmate;
            board.info.winner = Some(to_move.opponent());
        } else if self.rules.is_stalemate(board, to_move) {
            board.info.status = GameStatus::Stalemate;
        }
    }

    // History and broadcast for a committed move; neither can undo it
    fn after_move(&self, game_id: &GameId, from: Square, to: Square, committed: &Committed) {
        let record = MoveRecord {
            sequence: 0,
            game_id: game_id.clone(),
            turn_number: committed.turn,
            player: committed.player,
            piece_id: committed.piece_id.clone(),
            piece_type: committed.piece_type,
            from_square: from,
            to_square: to,
            move_type: committed.move_type,
            quantum_events: committed.events.clone(),
        };
        if let Err(e) = self.history.append(record) {
            warn!(game_id = %game_id, error = %e, "failed to record move in history");
        }

        info!(
            game_id = %game_id,
            player = %committed.player,
            %from,
            %to,
            move_type = ?committed.move_type,
            quantum_events = committed.events.len(),
            "move executed"
        );
        self.record(game_id, "move_executed", format!("{} moved {} {} -> {}", committed.player, committed.piece_type, from, to));

        self.events.publish(
            game_id,
            ServerEvent::MoveMade {
                game_id: game_id.clone(),
                player: committed.player,
                piece_id: committed.piece_id.clone(),
                from_square: from,
                to_square: to,
                move_type: committed.move_type,
                quantum_events: committed.events.clone(),
            },
        );
        self.events.publish(game_id, ServerEvent::GameUpdated(committed.snapshot.clone()));
    }
}

fn ensure_active(board: &Board, operation: &'static str) -> Result<()> {
    if board.info.status != GameStatus::Active {
        return Err(ChessError::GameState { game_id: board.game_id().clone(), status: board.info.status, operation });
    }
    Ok(())
}

fn ensure_turn(board: &Board, player: Color) -> Result<()> {
    if board.info.active_player != player {
        return Err(ChessError::TurnOrder { game_id: board.game_id().clone(), active: board.info.active_player, attempted: player });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryEventLog;
    use crate::piece::Piece;

    fn sq(s: &str) -> Square { s.parse().unwrap() }

    fn service() -> (GameService, Arc<MemoryEventLog>) {
        let log = MemoryEventLog::new();
        let service = GameService::with_parts(
            EngineConfig::default(),
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryHistory::new()),
            log.clone(),
        )
        .unwrap();
        (service, log)
    }

    fn request(game_id: &GameId, from: &str, to: &str, player: Color) -> MoveRequest {
        MoveRequest { game_id: game_id.clone(), from_square: sq(from), to_square: sq(to), player }
    }

    #[test]
    fn move_advances_turn_and_replenishes_tokens() {
        let (service, log) = service();
        let game = service.new_game("alice", "bob").unwrap();
        let response = service.make_move(&request(&game, "b1", "c3", Color::White)).unwrap();
        assert_eq!(response.move_type, MoveType::QuantumSplit);

        let state = service.state(&game).unwrap();
        assert_eq!(state.game.current_turn, 2);
        assert_eq!(state.game.active_player, Color::Black);
        assert_eq!(state.game.black_observations_left, 1);
        assert!(log.kinds().contains(&"turn_advanced"));
        assert!(log.kinds().contains(&"move_executed"));
    }

    #[test]
    fn rejected_move_changes_nothing() {
        let (service, _) = service();
        let game = service.new_game("w", "b").unwrap();
        let err = service.make_move(&request(&game, "a1", "a4", Color::White)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid move a1 -> a4: Path is blocked at a2");
        let err = service.make_move(&request(&game, "e7", "e6", Color::White)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid move e7 -> e6: No white piece at e7");
        assert_eq!(service.state(&game).unwrap().game.current_turn, 1);
        assert!(service.moves(&game).unwrap().is_empty());
    }

    #[test]
    fn generic_move_of_an_observer_observes() {
        let (service, _) = service();
        let game = service.new_game("w", "b").unwrap();
        let response = service.make_move(&request(&game, "e2", "e3", Color::White)).unwrap();
        assert_eq!(response.move_type, MoveType::Classical);
        let stats = service.observer_stats(&game, &PieceId::from("observer-w-1")).unwrap();
        assert_eq!(stats.observations_made, 0);
        let zone = service.observation_zone(&game, &PieceId::from("observer-w-1")).unwrap();
        assert_eq!(zone.position, sq("e3"));
        assert_eq!(zone.zone_squares.len(), 9);
    }

    #[test]
    fn finished_games_reject_actions() {
        let (service, _) = service();
        let game = service.new_game("w", "b").unwrap();
        service.end_game(&game, GameStatus::Resigned, Some(Color::Black)).unwrap();
        let err = service.make_move(&request(&game, "d2", "d4", Color::White)).unwrap_err();
        assert_eq!(err.code(), "GAME_STATE_ERROR");
        assert_eq!(service.end_game(&game, GameStatus::Draw, None).unwrap_err().code(), "GAME_STATE_ERROR");
    }

    #[test]
    fn capturing_the_king_ends_the_game() {
        let (service, log) = service();
        let board = Board::from_layout(
            GameId::generate(),
            vec![
                Piece::new("king-w-1", PieceType::King, Color::White, sq("e1")),
                Piece::new("rook-w-1", PieceType::Rook, Color::White, sq("a8")),
                Piece::new("king-b-1", PieceType::King, Color::Black, sq("h8")),
            ],
        );
        let game = service.load_game(board).unwrap();
        let response = service.make_move(&request(&game, "a8", "h8", Color::White)).unwrap();
        assert_eq!(response.move_type, MoveType::Capture);
        assert_eq!(response.new_state.game.status, GameStatus::Checkmate);
        assert_eq!(response.new_state.game.winner, Some(Color::White));
        assert!(log.kinds().contains(&"game_over"));
        assert!(response.new_state.pieces.iter().all(|p| p.piece.id != PieceId::from("king-b-1")));
    }

    #[test]
    fn observation_needs_a_superposed_piece_and_a_token() {
        let (service, _) = service();
        let game = service.new_game("w", "b").unwrap();
        let observe = ObserveRequest { game_id: game.clone(), piece_id: PieceId::from("pawn-w-4"), player: Color::White };
        let err = service.observe(&observe).unwrap_err();
        assert_eq!(err.code(), "QUANTUM_STATE_ERROR");
        assert_eq!(service.state(&game).unwrap().game.white_observations_left, 1);

        service.make_move(&request(&game, "d2", "d4", Color::White)).unwrap();
        service.make_move(&request(&game, "g8", "f6", Color::Black)).unwrap();
        let first = service.observe(&observe).unwrap();
        assert!([sq("d2"), sq("d4")].contains(&first.collapsed_position));
        assert_eq!(first.new_state.game.white_observations_left, 0);
        assert_eq!(first.new_state.game.active_player, Color::White);

        let knight = ObserveRequest { game_id: game.clone(), piece_id: PieceId::from("knight-b-2"), player: Color::White };
        let err = service.observe(&knight).unwrap_err();
        assert_eq!(err.to_string(), "Cannot observe piece 'knight-b-2': No observations remaining this turn");
    }
}
