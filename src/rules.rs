//! Legality Engine: move patterns, path obstruction, check, checkmate and stalemate.
//!
//! Everything here is a pure function of a [`Board`]. Blocking only considers
//! real occupancies; check detection lets a superposed attacker strike from
//! either of its ghost squares.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::board::Board;
use crate::error::MoveRejection;
use crate::logging::{GameEventLog, GameLogEvent};
use crate::piece::{Color, Piece, PieceId, PieceType};
use crate::quantum::should_trigger_superposition;
use crate::square::{Square, DIRECTIONS};

/// Legal destinations for one piece, split the way clients display them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidMoves {
    pub piece_id: PieceId,
    pub valid_moves: Vec<Square>,
    pub quantum_moves: Vec<Square>,
    pub capture_moves: Vec<Square>,
}

// Board occupancy with an optional hypothetical move applied on top
#[derive(Clone, Copy)]
struct Occupied<'a> {
    board: &'a Board,
    vacated: Option<Square>,
    filled: Option<Square>,
}

impl<'a> Occupied<'a> {
    fn current(board: &'a Board) -> Self {
        Occupied { board, vacated: None, filled: None }
    }

    fn is_occupied(&self, square: Square) -> bool {
        if self.filled == Some(square) { return true; }
        if self.vacated == Some(square) { return false; }
        self.board.get_piece_at_square(square).is_some()
    }

    fn first_blocker(&self, from: Square, to: Square) -> Option<Square> {
        from.between(to).into_iter().find(|sq| self.is_occupied(*sq))
    }
}

pub struct ChessRules {
    log: Arc<dyn GameEventLog>,
}

impl ChessRules {
    pub fn new(log: Arc<dyn GameEventLog>) -> Self {
        ChessRules { log }
    }

    /// Short-circuits in order: piece alive and on `from`, own piece (real or ghost) at target,
    /// movement pattern, path obstruction (not for knights), self-check.
    pub fn is_valid_move(&self, board: &Board, piece_id: &PieceId, from: Square, to: Square) -> Result<(), MoveRejection> {
        let piece = board.piece(piece_id).ok_or_else(|| MoveRejection::PieceNotFound(piece_id.clone()))?;
        if piece.captured {
            return Err(MoveRejection::PieceCaptured(piece_id.clone()));
        }
        match piece.real_square() {
            None => return Err(MoveRejection::NoDefiniteSquare(piece_id.clone())),
            Some(square) if square != from => return Err(MoveRejection::NotOnSquare(piece_id.clone(), from)),
            Some(_) => {}
        }

        // Friendly ghosts count as occupied: a later collapse must never land on a friend
        match board.friendly_occupant(to, piece.color) {
            Some(friend) if friend.real_square() == Some(to) => return Err(MoveRejection::OwnPieceAtTarget),
            Some(friend) => return Err(MoveRejection::FriendlyGhostAtTarget(friend.id.clone())),
            None => {}
        }

        if !self.matches_pattern(board, piece, from, to) {
            debug!(piece = %piece_id, %from, %to, kind = %piece.kind, "pattern rejected");
            return Err(MoveRejection::InvalidPattern(piece.kind));
        }

        if piece.kind != PieceType::Knight {
            if let Some(blocker) = Occupied::current(board).first_blocker(from, to) {
                return Err(MoveRejection::PathBlocked(blocker));
            }
        }

        if self.would_be_in_check_after_move(board, piece, from, to) {
            return Err(MoveRejection::LeavesKingInCheck(piece.color));
        }
        Ok(())
    }

    fn matches_pattern(&self, board: &Board, piece: &Piece, from: Square, to: Square) -> bool {
        let (df, dr) = from.deltas(to);
        let (adf, adr) = (df.abs(), dr.abs());
        let diagonal = adf == adr && adf > 0;
        let straight = (adf == 0) != (adr == 0);
        match piece.kind {
            PieceType::Knight => (adf, adr) == (1, 2) || (adf, adr) == (2, 1),
            PieceType::Bishop => diagonal,
            PieceType::Rook => straight,
            PieceType::Queen => diagonal || straight,
            PieceType::King | PieceType::Observer => adf <= 1 && adr <= 1 && adf + adr > 0,
            PieceType::Pawn => {
                let advance = dr * piece.color.forward();
                let target = board.get_piece_at_square(to);
                match (adf, advance) {
                    (0, 1) => target.is_none(),
                    (0, 2) => piece.move_count == 0 && target.is_none(),
                    (1, 1) => target.is_some_and(|t| t.color != piece.color), // No en passant
                    _ => false,
                }
            }
        }
    }

    /// Raw reach of a piece standing on `from` against `target`, ignoring
    /// what stands on the target itself.
    fn can_attack(&self, occupied: &Occupied<'_>, kind: PieceType, color: Color, from: Square, target: Square) -> bool {
        let (df, dr) = from.deltas(target);
        let (adf, adr) = (df.abs(), dr.abs());
        match kind {
            PieceType::Knight => (adf, adr) == (1, 2) || (adf, adr) == (2, 1),
            // Restricted one-step reach, no recursive self-check evaluation
            PieceType::King | PieceType::Observer => from.chebyshev(target) == 1,
            PieceType::Pawn => adf == 1 && dr == color.forward(),
            PieceType::Bishop | PieceType::Rook | PieceType::Queen => {
                let diagonal = adf == adr && adf > 0;
                let straight = (adf == 0) != (adr == 0);
                let fits = match kind {
                    PieceType::Bishop => diagonal,
                    PieceType::Rook => straight,
                    _ => diagonal || straight,
                };
                fits && occupied.first_blocker(from, target).is_none()
            }
        }
    }

    fn attacked_by(&self, occupied: &Occupied<'_>, target: Square, attacker_color: Color) -> bool {
        occupied.board.pieces_of(attacker_color).any(|attacker| {
            attacker
                .positions
                .iter()
                .any(|occ| self.can_attack(occupied, attacker.kind, attacker.color, occ.square, target))
        })
    }

    /// Whether `attacker_color` reaches `target`, optionally pretending `vacated` is empty.
    pub fn is_square_attacked(&self, board: &Board, target: Square, attacker_color: Color, vacated: Option<Square>) -> bool {
        self.attacked_by(&Occupied { board, vacated, filled: None }, target, attacker_color)
    }

    pub fn is_check(&self, board: &Board, color: Color) -> bool {
        match board.king_square(color) {
            Some(king) => self.is_square_attacked(board, king, color.opponent(), None),
            None => false,
        }
    }

    /// Simplified self-check test. King moves re-check the destination with the
    /// origin vacated. Other moves only look for sliding attackers lined up
    /// behind the origin square; revealed knight or pawn attacks, and checks
    /// that already exist, are not considered.
    pub fn would_be_in_check_after_move(&self, board: &Board, piece: &Piece, from: Square, to: Square) -> bool {
        let enemy = piece.color.opponent();
        if piece.kind == PieceType::King {
            return self.is_square_attacked(board, to, enemy, Some(from));
        }

        let Some(king) = board.king_square(piece.color) else { return false };
        if !from.is_aligned_with(king) {
            return false;
        }
        let occupied = Occupied { board, vacated: Some(from), filled: Some(to) };
        board.pieces_of(enemy).filter(|p| p.kind.is_slider()).any(|slider| {
            slider.positions.iter().any(|occ| {
                if !occ.is_ghost && occ.square == to {
                    return false; // Captured by this move
                }
                king.between(occ.square).contains(&from)
                    && self.can_attack(&occupied, slider.kind, slider.color, occ.square, king)
            })
        })
    }

    // Geometric reach only: occupants and blockers are left to is_valid_move
    fn candidate_squares(&self, piece: &Piece, from: Square) -> Vec<Square> {
        match piece.kind {
            PieceType::Knight => from.knight_targets().to_vec(),
            PieceType::King | PieceType::Observer => from.king_targets().to_vec(),
            PieceType::Bishop | PieceType::Rook | PieceType::Queen => {
                let mut squares = Vec::new();
                for &(dr, df, is_diagonal) in DIRECTIONS {
                    let wanted = match piece.kind {
                        PieceType::Bishop => is_diagonal,
                        PieceType::Rook => !is_diagonal,
                        _ => true,
                    };
                    if !wanted { continue; }
                    let mut current = from.offset(df, dr);
                    while let Some(sq) = current {
                        squares.push(sq);
                        current = sq.offset(df, dr);
                    }
                }
                squares
            }
            PieceType::Pawn => {
                let forward = piece.color.forward();
                let mut squares: Vec<Square> = [(0, forward), (-1, forward), (1, forward)]
                    .iter()
                    .filter_map(|&(df, dr)| from.offset(df, dr))
                    .collect();
                if piece.move_count == 0 {
                    squares.extend(from.offset(0, 2 * forward));
                }
                squares
            }
        }
    }

    /// Every legal destination of a piece. Superposed and captured pieces have none.
    pub fn get_valid_moves(&self, board: &Board, piece_id: &PieceId) -> ValidMoves {
        let mut moves = ValidMoves {
            piece_id: piece_id.clone(),
            valid_moves: Vec::new(),
            quantum_moves: Vec::new(),
            capture_moves: Vec::new(),
        };
        let Some(piece) = board.piece(piece_id).filter(|p| !p.captured) else { return moves };
        let Some(from) = piece.real_square() else { return moves };

        for to in self.candidate_squares(piece, from) {
            if self.is_valid_move(board, piece_id, from, to).is_err() {
                continue;
            }
            moves.valid_moves.push(to);
            if board.get_piece_at_square(to).is_some() {
                moves.capture_moves.push(to);
            }
            if piece.quantum_ability && should_trigger_superposition(piece.kind, from, to) {
                moves.quantum_moves.push(to);
            }
        }
        debug!(
            piece = %piece_id,
            valid = moves.valid_moves.len(),
            quantum = moves.quantum_moves.len(),
            captures = moves.capture_moves.len(),
            "valid moves generated"
        );
        moves
    }

    fn has_legal_move(&self, board: &Board, color: Color) -> bool {
        board.pieces_of(color).any(|p| !self.get_valid_moves(board, &p.id).valid_moves.is_empty())
    }

    pub fn is_checkmate(&self, board: &Board, color: Color) -> bool {
        let mate = self.is_check(board, color) && !self.has_legal_move(board, color);
        if mate {
            self.log.record(GameLogEvent::new("checkmate_detected", format!("{} is checkmated", color)).game(board.game_id()));
        }
        mate
    }

    pub fn is_stalemate(&self, board: &Board, color: Color) -> bool {
        let stale = !self.is_check(board, color) && !self.has_legal_move(board, color);
        if stale {
            self.log.record(GameLogEvent::new("stalemate_detected", format!("{} has no legal moves", color)).game(board.game_id()));
        }
        stale
    }
}
