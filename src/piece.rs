//! Piece model: identity, colour, kind, quantum state and occupied squares.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::square::Square;

// --- Enums and Basic Structs ---

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Color { White, Black }

impl Color {
    pub fn opponent(&self) -> Color {
        match self { Color::White => Color::Black, Color::Black => Color::White }
    }

    /// Rank direction pawns advance in.
    pub fn forward(&self) -> i8 {
        match self { Color::White => 1, Color::Black => -1 }
    }

    /// Letter used in piece identifiers (`knight-w-1`).
    pub fn initial(&self) -> char {
        match self { Color::White => 'w', Color::Black => 'b' }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Color::White => "white", Color::Black => "black" })
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PieceType { King, Queen, Rook, Bishop, Knight, Pawn, Observer }

impl PieceType {
    /// Only knights and pawns may ever enter superposition.
    pub fn is_quantum_capable(&self) -> bool {
        matches!(self, PieceType::Knight | PieceType::Pawn)
    }

    pub fn is_slider(&self) -> bool {
        matches!(self, PieceType::Queen | PieceType::Rook | PieceType::Bishop)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PieceType::King => "king", PieceType::Queen => "queen", PieceType::Rook => "rook",
            PieceType::Bishop => "bishop", PieceType::Knight => "knight", PieceType::Pawn => "pawn",
            PieceType::Observer => "observer",
        }
    }

    fn symbol(&self) -> char {
        match self {
            PieceType::Pawn => 'p', PieceType::Knight => 'n', PieceType::Bishop => 'b',
            PieceType::Rook => 'r', PieceType::Queen => 'q', PieceType::King => 'k',
            PieceType::Observer => 'o',
        }
    }
}

impl fmt::Display for PieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuantumState { Classical, Superposed, Entangled }

impl fmt::Display for QuantumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuantumState::Classical => "classical",
            QuantumState::Superposed => "superposed",
            QuantumState::Entangled => "entangled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    pub fn new(id: impl Into<String>) -> Self { PieceId(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for PieceId {
    fn from(s: &str) -> Self { PieceId(s.to_string()) }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// One square a piece occupies. Real occupancies have probability 1.0;
/// each half of a superposition is a ghost with probability 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    pub square: Square,
    pub probability: f64,
    pub is_ghost: bool,
}

impl Occupancy {
    pub fn real(square: Square) -> Self {
        Occupancy { square, probability: 1.0, is_ghost: false }
    }

    pub fn ghost(square: Square) -> Self {
        Occupancy { square, probability: 0.5, is_ghost: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperpositionState {
    pub created_turn: u32,
    pub expires_turn: u32,
}

/// Symmetric link between two superposed pieces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntanglementLink {
    pub strength: f64,
    pub max_distance: u32,
    pub created_turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    #[serde(rename = "type")]
    pub kind: PieceType,
    pub color: Color,
    pub quantum_ability: bool, // Fixed at creation
    pub quantum_state: QuantumState,
    pub captured: bool,
    pub captured_by: Option<PieceId>,
    pub move_count: u32,
    pub positions: Vec<Occupancy>,
    pub superposition: Option<SuperpositionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations_made: Option<u32>, // Observers only
}

impl Piece {
    pub fn new(id: impl Into<PieceId>, kind: PieceType, color: Color, square: Square) -> Self {
        Piece {
            id: id.into(),
            kind,
            color,
            quantum_ability: kind.is_quantum_capable(),
            quantum_state: QuantumState::Classical,
            captured: false,
            captured_by: None,
            move_count: 0,
            positions: vec![Occupancy::real(square)],
            superposition: None,
            observations_made: if kind == PieceType::Observer { Some(0) } else { None },
        }
    }

    /// The definite square, if the piece has one. Superposed pieces have none.
    pub fn real_square(&self) -> Option<Square> {
        if self.captured { return None; }
        self.positions.iter().find(|o| !o.is_ghost).map(|o| o.square)
    }

    pub fn squares(&self) -> Vec<Square> {
        self.positions.iter().map(|o| o.square).collect()
    }

    pub fn is_superposed(&self) -> bool {
        !self.captured && self.positions.len() == 2
    }

    pub fn occupies(&self, square: Square) -> bool {
        self.positions.iter().any(|o| o.square == square)
    }
}

impl From<String> for PieceId {
    fn from(s: String) -> Self { PieceId(s) }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self.kind.symbol();
        let symbol = match self.color {
            Color::White => symbol.to_ascii_uppercase(),
            Color::Black => symbol,
        };
        write!(f, "{}", symbol)
    }
}
