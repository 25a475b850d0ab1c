//! Per-game board state with point-lookup indices.
//!
//! A [`Board`] owns every piece of one game plus the indices the engines need:
//! piece-by-id, pieces-by-colour, square-to-pieces (real and ghost occupancy)
//! and the entanglement link table. All mutation goes through methods here so
//! the indices never drift from the pieces they describe.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChessError, MoveRejection, Result};
use crate::piece::{
    Color, EntanglementLink, Occupancy, Piece, PieceId, PieceType, QuantumState, SuperpositionState,
};
use crate::square::Square;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Fresh random (v4) identifier.
    pub fn generate() -> Self {
        GameId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self { GameId(s.to_string()) }
}

impl From<String> for GameId {
    fn from(s: String) -> Self { GameId(s) }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus { Active, Checkmate, Stalemate, Draw, Resigned }

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GameStatus::Active => "active",
            GameStatus::Checkmate => "checkmate",
            GameStatus::Stalemate => "stalemate",
            GameStatus::Draw => "draw",
            GameStatus::Resigned => "resigned",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: GameId,
    pub current_turn: u32,
    pub active_player: Color,
    pub status: GameStatus,
    pub winner: Option<Color>,
    pub white_observations_left: u32,
    pub black_observations_left: u32,
    pub white_player: String,
    pub black_player: String,
}

impl GameInfo {
    fn new(id: GameId, white_player: String, black_player: String) -> Self {
        GameInfo {
            id,
            current_turn: 1,
            active_player: Color::White,
            status: GameStatus::Active,
            winner: None,
            white_observations_left: 1,
            black_observations_left: 1,
            white_player,
            black_player,
        }
    }

    pub fn observations_left(&self, color: Color) -> u32 {
        match color { Color::White => self.white_observations_left, Color::Black => self.black_observations_left }
    }

    fn observations_left_mut(&mut self, color: Color) -> &mut u32 {
        match color { Color::White => &mut self.white_observations_left, Color::Black => &mut self.black_observations_left }
    }
}

/// One forced observation performed by an Observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub observer: PieceId,
    pub target: PieceId,
    pub turn: u32,
    pub target_state: QuantumState, // State before the observation
    pub forced: bool,
}

/// Read projection of a piece including its entangled partners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceData {
    #[serde(flatten)]
    pub piece: Piece,
    pub entangled_with: Vec<PieceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game: GameInfo,
    pub pieces: Vec<PieceData>,
}

// Back rank layout, a-file to h-file
const BACK_RANK: [PieceType; 8] = [
    PieceType::Rook, PieceType::Knight, PieceType::Bishop, PieceType::Queen,
    PieceType::King, PieceType::Bishop, PieceType::Knight, PieceType::Rook,
];

const OBSERVER_FILE: u8 = 4; // e-file pawn is replaced by the Observer

type LinkKey = (PieceId, PieceId);

fn link_key(a: &PieceId, b: &PieceId) -> LinkKey {
    if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) }
}

#[derive(Debug, Clone)]
pub struct Board {
    pub info: GameInfo,
    pieces: BTreeMap<PieceId, Piece>,
    by_color: HashMap<Color, BTreeSet<PieceId>>,
    squares: HashMap<Square, Vec<PieceId>>,
    links: BTreeMap<LinkKey, EntanglementLink>,
    observations: Vec<ObservationRecord>,
}

impl Board {
    /// The 32-piece starting position, with Observers on e2 and e7.
    pub fn standard(game_id: GameId, white_player: impl Into<String>, black_player: impl Into<String>) -> Board {
        let mut pieces = Vec::with_capacity(32);
        for color in [Color::White, Color::Black] {
            let (back, front) = match color { Color::White => (0u8, 1u8), Color::Black => (7, 6) };
            let mut counters: HashMap<PieceType, u32> = HashMap::new();
            for (file, kind) in BACK_RANK.iter().enumerate() {
                let n = counters.entry(*kind).or_insert(0);
                *n += 1;
                if let Some(square) = Square::new(file as u8, back) {
                    let id = format!("{}-{}-{}", kind, color.initial(), n);
                    pieces.push(Piece::new(id, *kind, color, square));
                }
            }
            for file in 0..8u8 {
                let Some(square) = Square::new(file, front) else { continue };
                if file == OBSERVER_FILE {
                    let id = format!("observer-{}-1", color.initial());
                    pieces.push(Piece::new(id, PieceType::Observer, color, square));
                } else {
                    // Pawns keep their file number, so pawn-w-5 does not exist
                    let id = format!("pawn-{}-{}", color.initial(), file + 1);
                    pieces.push(Piece::new(id, PieceType::Pawn, color, square));
                }
            }
        }
        let mut board = Board::from_layout(game_id, pieces);
        board.info.white_player = white_player.into();
        board.info.black_player = black_player.into();
        board
    }

    /// Arbitrary position. Pieces keep whatever state they carry.
    pub fn from_layout(game_id: GameId, pieces: impl IntoIterator<Item = Piece>) -> Board {
        let mut board = Board {
            info: GameInfo::new(game_id, "White".to_string(), "Black".to_string()),
            pieces: BTreeMap::new(),
            by_color: HashMap::new(),
            squares: HashMap::new(),
            links: BTreeMap::new(),
            observations: Vec::new(),
        };
        for piece in pieces {
            board.by_color.entry(piece.color).or_default().insert(piece.id.clone());
            if !piece.captured {
                for occ in &piece.positions {
                    board.squares.entry(occ.square).or_default().push(piece.id.clone());
                }
            }
            board.pieces.insert(piece.id.clone(), piece);
        }
        board
    }

    pub fn game_id(&self) -> &GameId { &self.info.id }

    // --- Lookups ---

    pub fn piece(&self, id: &PieceId) -> Option<&Piece> {
        self.pieces.get(id)
    }

    /// Like [`Board::piece`], but unknown and captured pieces are errors.
    pub fn live_piece(&self, id: &PieceId) -> Result<&Piece> {
        match self.pieces.get(id) {
            Some(piece) if !piece.captured => Ok(piece),
            _ => Err(ChessError::PieceNotFound(id.clone())),
        }
    }

    pub fn get_piece_state(&self, id: &PieceId) -> Option<PieceData> {
        self.pieces.get(id).map(|piece| PieceData {
            piece: piece.clone(),
            entangled_with: self.get_entangled_partners(id),
        })
    }

    pub fn get_board_state(&self) -> GameSnapshot {
        self.snapshot()
    }

    /// Non-captured pieces in id order.
    pub fn live_pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values().filter(|p| !p.captured)
    }

    pub fn pieces_of(&self, color: Color) -> impl Iterator<Item = &Piece> {
        self.by_color
            .get(&color)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.pieces.get(id))
            .filter(|p| !p.captured)
    }

    /// The piece definitely standing on `square`. Ghosts are ignored.
    pub fn get_piece_at_square(&self, square: Square) -> Option<&Piece> {
        self.pieces_on(square).into_iter().find(|p| p.real_square() == Some(square))
    }

    /// Every live piece with any occupancy (real or ghost) on `square`.
    pub fn pieces_on(&self, square: Square) -> Vec<&Piece> {
        self.squares
            .get(&square)
            .map(|ids| ids.iter().filter_map(|id| self.pieces.get(id)).filter(|p| !p.captured).collect())
            .unwrap_or_default()
    }

    /// A live piece of `color` with any occupancy (real first, then ghost) on `square`.
    pub fn friendly_occupant(&self, square: Square, color: Color) -> Option<&Piece> {
        let friends: Vec<&Piece> = self.pieces_on(square).into_iter().filter(|p| p.color == color).collect();
        friends.iter().find(|p| p.real_square() == Some(square)).or_else(|| friends.first()).copied()
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        self.pieces_of(color).find(|p| p.kind == PieceType::King).and_then(|k| k.real_square())
    }

    pub fn get_superposition_positions(&self, id: &PieceId) -> Option<(Square, Square)> {
        let piece = self.pieces.get(id)?;
        match piece.positions.as_slice() {
            [a, b] if !piece.captured => Some((a.square, b.square)),
            _ => None,
        }
    }

    pub fn get_entangled_partners(&self, id: &PieceId) -> Vec<PieceId> {
        self.links
            .keys()
            .filter_map(|(a, b)| {
                if a == id { Some(b.clone()) } else if b == id { Some(a.clone()) } else { None }
            })
            .collect()
    }

    pub fn link(&self, a: &PieceId, b: &PieceId) -> Option<&EntanglementLink> {
        self.links.get(&link_key(a, b))
    }

    pub fn links(&self) -> impl Iterator<Item = (&PieceId, &PieceId, &EntanglementLink)> {
        self.links.iter().map(|((a, b), link)| (a, b, link))
    }

    pub fn observations(&self) -> &[ObservationRecord] {
        &self.observations
    }

    // --- Repository mutations ---

    /// Classical relocation of a piece standing on `from`.
    pub fn update_piece_position(&mut self, id: &PieceId, from: Square, to: Square) -> Result<()> {
        let piece = self.live_piece(id)?;
        if piece.real_square() != Some(from) {
            return Err(ChessError::invalid_move(from, to, MoveRejection::NoDefiniteSquare(id.clone()), Some(id.clone())));
        }
        self.set_positions(id, vec![Occupancy::real(to)])?;
        if let Some(piece) = self.pieces.get_mut(id) {
            piece.move_count += 1;
        }
        Ok(())
    }

    /// Removes a piece from the board. Its entanglement links are broken and its
    /// superposition discarded first; returns the partners that lost a link.
    pub fn capture_piece(&mut self, id: &PieceId, captured_by: &PieceId) -> Result<Vec<PieceId>> {
        self.live_piece(id)?;
        let partners = self.get_entangled_partners(id);
        for partner in &partners {
            self.links.remove(&link_key(id, partner));
            self.refresh_quantum_state(partner)?;
        }
        self.set_positions(id, Vec::new())?;
        if let Some(piece) = self.pieces.get_mut(id) {
            piece.captured = true;
            piece.captured_by = Some(captured_by.clone());
            piece.superposition = None;
            piece.quantum_state = QuantumState::Classical;
        }
        Ok(partners)
    }

    /// Replaces a piece's occupancies and keeps the square index in sync.
    pub(crate) fn set_positions(&mut self, id: &PieceId, positions: Vec<Occupancy>) -> Result<()> {
        let piece = self.pieces.get_mut(id).ok_or_else(|| ChessError::PieceNotFound(id.clone()))?;
        for occ in &piece.positions {
            if let Some(ids) = self.squares.get_mut(&occ.square) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.squares.remove(&occ.square);
                }
            }
        }
        for occ in &positions {
            self.squares.entry(occ.square).or_default().push(id.clone());
        }
        piece.positions = positions;
        Ok(())
    }

    pub(crate) fn piece_mut(&mut self, id: &PieceId) -> Result<&mut Piece> {
        self.pieces.get_mut(id).ok_or_else(|| ChessError::PieceNotFound(id.clone()))
    }

    pub(crate) fn insert_link(&mut self, a: &PieceId, b: &PieceId, link: EntanglementLink) {
        self.links.insert(link_key(a, b), link);
    }

    pub(crate) fn remove_link(&mut self, a: &PieceId, b: &PieceId) -> Option<EntanglementLink> {
        self.links.remove(&link_key(a, b))
    }

    /// Entangled while any link remains, otherwise superposed with two
    /// occupancies, otherwise classical.
    pub(crate) fn refresh_quantum_state(&mut self, id: &PieceId) -> Result<QuantumState> {
        let linked = self.links.keys().any(|(a, b)| a == id || b == id);
        let piece = self.piece_mut(id)?;
        piece.quantum_state = if piece.captured {
            QuantumState::Classical
        } else if linked {
            QuantumState::Entangled
        } else if piece.positions.len() == 2 {
            QuantumState::Superposed
        } else {
            QuantumState::Classical
        };
        Ok(piece.quantum_state)
    }

    pub(crate) fn set_superposition(&mut self, id: &PieceId, record: Option<SuperpositionState>) -> Result<()> {
        self.piece_mut(id)?.superposition = record;
        Ok(())
    }

    pub(crate) fn record_observation(&mut self, record: ObservationRecord) {
        self.observations.push(record);
    }

    pub(crate) fn add_observations(&mut self, observer: &PieceId, count: u32) -> Result<()> {
        let piece = self.piece_mut(observer)?;
        piece.observations_made = Some(piece.observations_made.unwrap_or(0) + count);
        Ok(())
    }

    /// Consumes one observation token; false when none are left.
    pub(crate) fn spend_observation_token(&mut self, color: Color) -> bool {
        let tokens = self.info.observations_left_mut(color);
        if *tokens == 0 { return false; }
        *tokens -= 1;
        true
    }

    /// Next turn: counter up, colour flips, the new side's tokens are replenished.
    pub(crate) fn advance_turn(&mut self, tokens: u32) {
        self.info.current_turn += 1;
        self.info.active_player = self.info.active_player.opponent();
        let active = self.info.active_player;
        *self.info.observations_left_mut(active) = tokens;
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            game: self.info.clone(),
            pieces: self
                .live_pieces()
                .map(|p| PieceData { piece: p.clone(), entangled_with: self.get_entangled_partners(&p.id) })
                .collect(),
        }
    }
}

// Board rendering: real pieces by symbol, ghost-only squares as '*'
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for color in [Color::White, Color::Black] {
            write!(f, "Captured by {}: ", if color == Color::White { "White" } else { "Black" })?;
            for piece in self.pieces.values().filter(|p| p.captured && p.color == color.opponent()) {
                write!(f, "{} ", piece)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "---------------------")?;

        writeln!(f, "  +-----------------+")?;
        for rank in (0..8u8).rev() {
            write!(f, "{} | ", rank + 1)?;
            for file in 0..8u8 {
                let Some(square) = Square::new(file, rank) else { continue };
                match self.get_piece_at_square(square) {
                    Some(piece) => write!(f, "{} ", piece)?,
                    None if !self.pieces_on(square).is_empty() => write!(f, "* ")?,
                    None => write!(f, ". ")?,
                }
            }
            writeln!(f, "|")?;
        }
        writeln!(f, "  +-----------------+")?;
        writeln!(f, "    a b c d e f g h")?;

        writeln!(f, "Turn: {} ({} to move), status: {}", self.info.current_turn, self.info.active_player, self.info.status)?;
        writeln!(f, "Observation tokens: W:{} B:{}", self.info.white_observations_left, self.info.black_observations_left)?;

        let superposed: Vec<&Piece> = self.live_pieces().filter(|p| p.is_superposed()).collect();
        if !superposed.is_empty() {
            writeln!(f, "Superpositions:")?;
            for piece in superposed {
                let squares: Vec<String> = piece.squares().iter().map(|s| s.to_string()).collect();
                let expiry = piece.superposition.map(|s| s.expires_turn.to_string()).unwrap_or_else(|| "-".to_string());
                writeln!(f, "  {} {{{}}} expires turn {}", piece.id, squares.join(","), expiry)?;
            }
        }
        if !self.links.is_empty() {
            writeln!(f, "Entanglements:")?;
            for ((a, b), link) in &self.links {
                writeln!(f, "  {} <-> {} (strength {:.2})", a, b, link.strength)?;
            }
        }
        Ok(())
    }
}
