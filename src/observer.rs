//! Observer Engine.
//!
//! Observers step like a king, never enter superposition themselves and, after
//! every relocation, force every quantum piece touching their 3x3 zone to
//! resolve: superposed pieces collapse, entangled pieces lose their links.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::board::{Board, ObservationRecord};
use crate::error::{ChessError, MoveRejection, Result};
use crate::logging::{GameEventLog, GameLogEvent};
use crate::piece::{PieceId, PieceType, QuantumState};
use crate::quantum::{BreakReason, QuantumEngine, QuantumEvent};
use crate::square::Square;

/// Chebyshev radius of the observation zone.
pub const OBSERVATION_RANGE: u32 = 1;

/// What happened to one observed piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsedPieceInfo {
    pub piece_id: PieceId,
    pub from_state: QuantumState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_position: Option<Square>,
    pub to_state: QuantumState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationOutcome {
    pub observed_pieces: Vec<PieceId>,
    pub collapsed_states: Vec<CollapsedPieceInfo>,
    pub quantum_events: Vec<QuantumEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverMove {
    pub observer_id: PieceId,
    pub from: Square,
    pub new_position: Square,
    pub captured: Option<PieceId>,
    #[serde(flatten)]
    pub observation: ObservationOutcome,
}

/// A quantum piece an Observer would act on from where it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedPiece {
    pub piece_id: PieceId,
    pub current_state: QuantumState,
    pub will_collapse: bool,
    pub positions: Vec<Square>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverStats {
    pub observer_id: PieceId,
    pub observations_made: u32,
    pub total_pieces_affected: usize,
    pub observation_history: Vec<ObservationRecord>,
}

/// The 3x3 block around `center`, clipped to the board, in square order.
pub fn zone(center: Square) -> Vec<Square> {
    let mut squares: Vec<Square> = Square::all().filter(|sq| sq.chebyshev(center) <= OBSERVATION_RANGE).collect();
    squares.sort();
    squares
}

pub struct ObserverEngine {
    log: Arc<dyn GameEventLog>,
}

impl ObserverEngine {
    pub fn new(log: Arc<dyn GameEventLog>) -> Self {
        ObserverEngine { log }
    }

    fn observer_square(&self, board: &Board, observer_id: &PieceId) -> Result<Square> {
        let piece = board.live_piece(observer_id)?;
        if piece.kind != PieceType::Observer {
            return Err(ChessError::Observation { piece_id: observer_id.clone(), reason: format!("{} is not an observer", piece.kind) });
        }
        piece.real_square().ok_or_else(|| ChessError::PieceNotFound(observer_id.clone()))
    }

    /// King-pattern destinations where no friendly piece has any occupancy, real or ghost.
    pub fn get_valid_moves(&self, board: &Board, observer_id: &PieceId) -> Result<Vec<Square>> {
        let from = self.observer_square(board, observer_id)?;
        let color = board.live_piece(observer_id)?.color;
        let mut moves: Vec<Square> = from
            .king_targets()
            .iter()
            .copied()
            .filter(|sq| board.friendly_occupant(*sq, color).is_none())
            .collect();
        moves.sort();
        Ok(moves)
    }

    /// Relocates the Observer (capturing an enemy on `to`) and then observes.
    pub fn move_observer<R: RngCore + CryptoRng>(
        &self,
        board: &mut Board,
        quantum: &mut QuantumEngine<R>,
        observer_id: &PieceId,
        to: Square,
    ) -> Result<ObserverMove> {
        let from = self.observer_square(board, observer_id)?;
        if !self.get_valid_moves(board, observer_id)?.contains(&to) {
            let color = board.live_piece(observer_id)?.color;
            let rejection = match board.friendly_occupant(to, color) {
                Some(p) if p.real_square() == Some(to) => MoveRejection::OwnPieceAtTarget,
                Some(p) if from.chebyshev(to) == 1 => MoveRejection::FriendlyGhostAtTarget(p.id.clone()),
                _ => MoveRejection::InvalidPattern(PieceType::Observer),
            };
            return Err(ChessError::invalid_move(from, to, rejection, Some(observer_id.clone())));
        }

        let captured = match board.get_piece_at_square(to).map(|p| p.id.clone()) {
            Some(enemy) => {
                board.capture_piece(&enemy, observer_id)?;
                Some(enemy)
            }
            None => None,
        };
        board.update_piece_position(observer_id, from, to)?;
        self.log.record(
            GameLogEvent::new("observer_moved", format!("{} moved {} -> {}", observer_id, from, to))
                .game(board.game_id())
                .piece(observer_id),
        );

        let observation = self.observe_surrounding_area(board, quantum, observer_id)?;
        Ok(ObserverMove { observer_id: observer_id.clone(), from, new_position: to, captured, observation })
    }

    // Live quantum pieces with any occupancy (real or ghost) inside the zone, id order
    fn nearby_quantum_pieces(&self, board: &Board, observer_id: &PieceId, center: Square) -> Vec<PieceId> {
        let squares: BTreeSet<Square> = zone(center).into_iter().collect();
        board
            .live_pieces()
            .filter(|p| p.id != *observer_id)
            .filter(|p| matches!(p.quantum_state, QuantumState::Superposed | QuantumState::Entangled))
            .filter(|p| p.positions.iter().any(|o| squares.contains(&o.square)))
            .map(|p| p.id.clone())
            .collect()
    }

    /// Forces resolution of every quantum piece in the zone, friend or foe.
    pub fn observe_surrounding_area<R: RngCore + CryptoRng>(
        &self,
        board: &mut Board,
        quantum: &mut QuantumEngine<R>,
        observer_id: &PieceId,
    ) -> Result<ObservationOutcome> {
        let center = self.observer_square(board, observer_id)?;
        let nearby = self.nearby_quantum_pieces(board, observer_id, center);
        debug!(observer = %observer_id, %center, candidates = nearby.len(), "observing zone");

        let mut outcome = ObservationOutcome::default();
        for piece_id in nearby {
            // Earlier collapses in this pass may already have resolved or captured it
            let Some(piece) = board.piece(&piece_id).filter(|p| !p.captured) else { continue };
            let from_state = piece.quantum_state;

            let info = match from_state {
                QuantumState::Superposed if piece.is_superposed() => {
                    let (square, cascade) = quantum.collapse_superposition(board, &piece_id)?;
                    outcome.quantum_events.push(QuantumEvent::SuperpositionCollapsed { piece_id: piece_id.clone(), collapsed_to: square });
                    outcome.quantum_events.extend(cascade);
                    let to_state = board.piece(&piece_id).map_or(QuantumState::Classical, |p| p.quantum_state);
                    CollapsedPieceInfo { piece_id: piece_id.clone(), from_state, to_position: Some(square), to_state }
                }
                QuantumState::Entangled => {
                    for partner in board.get_entangled_partners(&piece_id) {
                        if quantum.break_entanglement(board, &piece_id, &partner)? {
                            outcome.quantum_events.push(QuantumEvent::EntanglementBroken {
                                pieces: [piece_id.clone(), partner],
                                reason: BreakReason::Observation,
                            });
                        }
                    }
                    let to_state = board.piece(&piece_id).map_or(QuantumState::Classical, |p| p.quantum_state);
                    CollapsedPieceInfo { piece_id: piece_id.clone(), from_state, to_position: None, to_state }
                }
                _ => continue,
            };

            board.record_observation(ObservationRecord {
                observer: observer_id.clone(),
                target: piece_id.clone(),
                turn: board.info.current_turn,
                target_state: from_state,
                forced: true,
            });
            outcome.observed_pieces.push(piece_id);
            outcome.collapsed_states.push(info);
        }

        if !outcome.observed_pieces.is_empty() {
            board.add_observations(observer_id, outcome.observed_pieces.len() as u32)?;
            info!(observer = %observer_id, observed = outcome.observed_pieces.len(), "observation completed");
            self.log.record(
                GameLogEvent::new("observation_completed", format!("{} observed {} quantum pieces", observer_id, outcome.observed_pieces.len()))
                    .game(board.game_id())
                    .piece(observer_id),
            );
        }
        Ok(outcome)
    }

    /// The nine (fewer on an edge) squares the Observer currently watches.
    pub fn get_observation_zone_preview(&self, board: &Board, observer_id: &PieceId) -> Result<Vec<Square>> {
        Ok(zone(self.observer_square(board, observer_id)?))
    }

    pub fn get_affected_pieces_in_zone(&self, board: &Board, observer_id: &PieceId) -> Result<Vec<AffectedPiece>> {
        let center = self.observer_square(board, observer_id)?;
        Ok(self
            .nearby_quantum_pieces(board, observer_id, center)
            .into_iter()
            .filter_map(|id| board.piece(&id))
            .map(|p| AffectedPiece {
                piece_id: p.id.clone(),
                current_state: p.quantum_state,
                will_collapse: p.is_superposed() && p.quantum_state == QuantumState::Superposed,
                positions: p.squares(),
            })
            .collect())
    }

    pub fn observer_stats(&self, board: &Board, observer_id: &PieceId) -> Result<ObserverStats> {
        let piece = board.piece(observer_id).ok_or_else(|| ChessError::PieceNotFound(observer_id.clone()))?;
        let history: Vec<ObservationRecord> =
            board.observations().iter().filter(|r| r.observer == *observer_id).cloned().collect();
        let distinct: BTreeSet<&PieceId> = history.iter().map(|r| &r.target).collect();
        Ok(ObserverStats {
            observer_id: observer_id.clone(),
            observations_made: piece.observations_made.unwrap_or(0),
            total_pieces_affected: distinct.len(),
            observation_history: history,
        })
    }
}
