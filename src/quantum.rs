//! Quantum Mechanics Engine: superposition, collapse, entanglement and the
//! per-turn auto-resolution sweep.
//!
//! Collapse draws come from a cryptographically secure generator. The engine is
//! generic over the RNG so tests can inject a seeded one, but only
//! `CryptoRng` implementors are accepted.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::distr::Bernoulli;
use rand::rngs::StdRng;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::board::Board;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{ChessError, MoveRejection, Result};
use crate::logging::{GameEventLog, GameLogEvent};
use crate::piece::{EntanglementLink, Occupancy, PieceId, PieceType, SuperpositionState};
use crate::square::Square;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correlation {
    #[serde(rename = "correlated")]
    Correlated,
    #[serde(rename = "anti-correlated")]
    AntiCorrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason { Collapse, Distance, Observation, Capture }

/// Events reported back to clients alongside a move or observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuantumEvent {
    SuperpositionCreated { piece_id: PieceId, positions: Vec<Square> },
    SuperpositionCollapsed { piece_id: PieceId, collapsed_to: Square },
    EntanglementFormed { pieces: [PieceId; 2], overlap_square: Square },
    EntanglementBroken { pieces: [PieceId; 2], reason: BreakReason },
    CascadeCollapse { piece_id: PieceId, collapsed_to: Square, caused_by: PieceId, correlation: Correlation },
    QuantumCapture { piece_id: PieceId, captured_by: PieceId, square: Square },
}

/// Knights superpose on every move; pawns only on file-aligned pushes.
pub fn should_trigger_superposition(kind: PieceType, from: Square, to: Square) -> bool {
    match kind {
        PieceType::Knight => true,
        PieceType::Pawn => from.file() == to.file(),
        _ => false,
    }
}

/// The candidate closest (Manhattan) to `reference`; the first one wins ties.
pub fn correlated_square(reference: Square, candidates: (Square, Square)) -> Square {
    let (first, second) = candidates;
    if reference.manhattan(second) < reference.manhattan(first) { second } else { first }
}

pub struct QuantumEngine<R = StdRng> {
    config: EngineConfig,
    rng: R,
    log: Arc<dyn GameEventLog>,
}

impl QuantumEngine<StdRng> {
    /// Engine backed by an OS-seeded ChaCha generator.
    pub fn new(config: EngineConfig, log: Arc<dyn GameEventLog>) -> std::result::Result<Self, ConfigError> {
        Self::with_rng(config, log, StdRng::from_os_rng())
    }
}

impl<R: RngCore + CryptoRng> QuantumEngine<R> {
    pub fn with_rng(config: EngineConfig, log: Arc<dyn GameEventLog>, rng: R) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            duration = config.max_superposition_duration,
            strength = config.entanglement_correlation_strength,
            max_distance = config.entanglement_max_distance,
            "quantum engine ready"
        );
        Ok(QuantumEngine { config, rng, log })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn record(&self, board: &Board, kind: &'static str, piece: &PieceId, message: String) {
        self.log.record(GameLogEvent::new(kind, message).game(board.game_id()).piece(piece));
    }

    /// Replaces the piece's single square with two ghosts (`from`, `to`).
    pub fn create_superposition(&mut self, board: &mut Board, piece_id: &PieceId, from: Square, to: Square) -> Result<QuantumEvent> {
        let piece = board.live_piece(piece_id)?;
        if !piece.quantum_ability || piece.positions.len() != 1 {
            return Err(ChessError::QuantumState {
                piece_id: piece_id.clone(),
                state: piece.quantum_state,
                operation: "create_superposition",
            });
        }
        if piece.real_square() != Some(from) {
            return Err(ChessError::invalid_move(from, to, MoveRejection::NotOnSquare(piece_id.clone(), from), Some(piece_id.clone())));
        }

        let turn = board.info.current_turn;
        board.set_positions(piece_id, vec![Occupancy::ghost(from), Occupancy::ghost(to)])?;
        board.set_superposition(
            piece_id,
            Some(SuperpositionState { created_turn: turn, expires_turn: turn + self.config.max_superposition_duration }),
        )?;
        board.piece_mut(piece_id)?.move_count += 1;
        board.refresh_quantum_state(piece_id)?;

        self.record(board, "superposition_created", piece_id, format!("{} entered superposition on {} and {}", piece_id, from, to));
        Ok(QuantumEvent::SuperpositionCreated { piece_id: piece_id.clone(), positions: vec![from, to] })
    }

    /// Resolves a superposed piece to one of its two squares with a fair coin,
    /// then cascades through its entangled partners. The returned events hold
    /// the cascade and any captures, not the collapse itself.
    pub fn collapse_superposition(&mut self, board: &mut Board, piece_id: &PieceId) -> Result<(Square, Vec<QuantumEvent>)> {
        let piece = board.live_piece(piece_id)?;
        let Some((first, second)) = board.get_superposition_positions(piece_id) else {
            return Err(ChessError::QuantumState {
                piece_id: piece_id.clone(),
                state: piece.quantum_state,
                operation: "collapse_superposition",
            });
        };

        let chosen = if self.rng.random_range(0..2) == 0 { first } else { second };
        let mut events = self.collapse_to_position(board, piece_id, chosen)?;
        self.record(board, "superposition_collapsed", piece_id, format!("{} collapsed to {}", piece_id, chosen));

        let mut visited = BTreeSet::from([piece_id.clone()]);
        events.extend(self.cascade_entangled_collapses(board, piece_id, chosen, &mut visited)?);

        // Cycles leave links between pieces that each resolved through another path
        let settled: Vec<(PieceId, PieceId)> = board
            .links()
            .filter(|(a, b, _)| visited.contains(*a) && visited.contains(*b))
            .map(|(a, b, _)| (a.clone(), b.clone()))
            .collect();
        for (a, b) in settled {
            self.break_entanglement(board, &a, &b)?;
        }
        Ok((chosen, events))
    }

    // Makes `square` the piece's only (real) occupancy. An enemy standing there is captured.
    fn collapse_to_position(&mut self, board: &mut Board, piece_id: &PieceId, square: Square) -> Result<Vec<QuantumEvent>> {
        board.set_positions(piece_id, vec![Occupancy::real(square)])?;
        board.set_superposition(piece_id, None)?;
        board.refresh_quantum_state(piece_id)?;

        let color = board.live_piece(piece_id)?.color;
        let occupant = board
            .pieces_on(square)
            .into_iter()
            .find(|p| p.id != *piece_id && p.real_square() == Some(square))
            .map(|p| (p.id.clone(), p.color));

        let mut events = Vec::new();
        match occupant {
            Some((other, other_color)) if other_color != color => {
                board.capture_piece(&other, piece_id)?;
                self.record(board, "quantum_capture", &other, format!("{} captured by {} on {}", other, piece_id, square));
                events.push(QuantumEvent::QuantumCapture { piece_id: other, captured_by: piece_id.clone(), square });
            }
            Some((other, _)) => {
                warn!(piece = %piece_id, other = %other, %square, "collapsed onto a friendly piece");
            }
            None => {}
        }
        Ok(events)
    }

    /// Resolves every still-superposed partner of `initiator`: to the square
    /// nearest `resolved` with the link's strength, otherwise to the other one.
    /// Continues transitively; each piece resolves at most once per initiating collapse.
    pub fn cascade_entangled_collapses(
        &mut self,
        board: &mut Board,
        initiator: &PieceId,
        resolved: Square,
        visited: &mut BTreeSet<PieceId>,
    ) -> Result<Vec<QuantumEvent>> {
        let mut events = Vec::new();
        for partner in board.get_entangled_partners(initiator) {
            if visited.contains(&partner) {
                continue;
            }
            let Some(squares) = board.get_superposition_positions(&partner) else {
                continue; // Partner already collapsed
            };
            let strength = board
                .link(initiator, &partner)
                .map(|link| link.strength)
                .unwrap_or(self.config.entanglement_correlation_strength);
            let bernoulli = Bernoulli::new(strength).map_err(|e| ConfigError::InvalidValue {
                field: "entanglement_correlation_strength".to_string(),
                reason: e.to_string(),
            })?;

            let correlated = correlated_square(resolved, squares);
            let (target, correlation) = if self.rng.sample(bernoulli) {
                (correlated, Correlation::Correlated)
            } else {
                (if correlated == squares.0 { squares.1 } else { squares.0 }, Correlation::AntiCorrelated)
            };
            debug!(partner = %partner, caused_by = %initiator, %target, ?correlation, "cascade collapse");

            visited.insert(partner.clone());
            let captures = self.collapse_to_position(board, &partner, target)?;
            events.push(QuantumEvent::CascadeCollapse {
                piece_id: partner.clone(),
                collapsed_to: target,
                caused_by: initiator.clone(),
                correlation,
            });
            events.extend(captures);
            self.break_entanglement(board, initiator, &partner)?;
            events.extend(self.cascade_entangled_collapses(board, &partner, target, visited)?);
        }
        if !events.is_empty() {
            self.record(board, "cascade_collapse_complete", initiator, format!("{} cascade events from {}", events.len(), initiator));
        }
        Ok(events)
    }

    /// Links every pair of superposed pieces sharing a square, lower id first,
    /// as long as neither is at its partner budget.
    pub fn check_for_entanglement(&mut self, board: &mut Board) -> Result<Vec<QuantumEvent>> {
        let superposed: Vec<(PieceId, Vec<Square>)> = board
            .live_pieces()
            .filter(|p| p.is_superposed())
            .map(|p| (p.id.clone(), p.squares()))
            .collect();

        let mut events = Vec::new();
        for (i, (first, first_squares)) in superposed.iter().enumerate() {
            for (second, second_squares) in &superposed[i + 1..] {
                let Some(overlap) = first_squares.iter().copied().find(|sq| second_squares.contains(sq)) else { continue };
                if board.link(first, second).is_some() {
                    continue;
                }
                let budget = self.config.max_entangled_partners;
                if board.get_entangled_partners(first).len() >= budget || board.get_entangled_partners(second).len() >= budget {
                    debug!(first = %first, second = %second, "overlap skipped: partner budget reached");
                    continue;
                }
                self.create_entanglement(board, first, second)?;
                events.push(QuantumEvent::EntanglementFormed { pieces: [first.clone(), second.clone()], overlap_square: overlap });
            }
        }
        Ok(events)
    }

    pub fn create_entanglement(&mut self, board: &mut Board, first: &PieceId, second: &PieceId) -> Result<()> {
        for id in [first, second] {
            let piece = board.live_piece(id)?;
            if !piece.is_superposed() || first == second {
                return Err(ChessError::QuantumState { piece_id: id.clone(), state: piece.quantum_state, operation: "create_entanglement" });
            }
        }
        let link = EntanglementLink {
            strength: self.config.entanglement_correlation_strength,
            max_distance: self.config.entanglement_max_distance,
            created_turn: board.info.current_turn,
        };
        board.insert_link(first, second, link);
        board.refresh_quantum_state(first)?;
        board.refresh_quantum_state(second)?;
        self.record(board, "entanglement_created", first, format!("{} entangled with {}", first, second));
        Ok(())
    }

    /// Removes the link, if any; returns whether one existed.
    pub fn break_entanglement(&mut self, board: &mut Board, first: &PieceId, second: &PieceId) -> Result<bool> {
        if board.remove_link(first, second).is_none() {
            return Ok(false);
        }
        board.refresh_quantum_state(first)?;
        board.refresh_quantum_state(second)?;
        self.record(board, "entanglement_broken", first, format!("{} no longer entangled with {}", first, second));
        Ok(true)
    }

    /// Turn-processing sweep: collapse expired superpositions, then dissolve
    /// links whose real squares drifted beyond the link's distance.
    pub fn check_auto_collapses(&mut self, board: &mut Board) -> Result<Vec<QuantumEvent>> {
        let turn = board.info.current_turn;
        let expired: Vec<PieceId> = board
            .live_pieces()
            .filter(|p| p.superposition.is_some_and(|s| s.expires_turn <= turn))
            .map(|p| p.id.clone())
            .collect();

        let mut events = Vec::new();
        for piece_id in expired {
            // An earlier cascade in this sweep may already have resolved it
            if !board.piece(&piece_id).is_some_and(|p| p.is_superposed()) {
                continue;
            }
            let (square, cascade) = self.collapse_superposition(board, &piece_id)?;
            events.push(QuantumEvent::SuperpositionCollapsed { piece_id, collapsed_to: square });
            events.extend(cascade);
        }

        let drifted: Vec<(PieceId, PieceId)> = board
            .links()
            .filter_map(|(a, b, link)| {
                let sa = board.piece(a)?.real_square()?;
                let sb = board.piece(b)?.real_square()?;
                (sa.manhattan(sb) > link.max_distance).then(|| (a.clone(), b.clone()))
            })
            .collect();
        for (a, b) in drifted {
            self.break_entanglement(board, &a, &b)?;
            events.push(QuantumEvent::EntanglementBroken { pieces: [a, b], reason: BreakReason::Distance });
        }
        Ok(events)
    }
}
