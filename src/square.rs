//! Board coordinates: algebraic notation, geometry and precomputed neighbour tables.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Directions for sliding pieces
pub const DIRECTIONS: &[(i8, i8, bool)] = &[ // (dr, df, is_diagonal)
    ( 1,  0, false), (-1,  0, false), ( 0,  1, false), ( 0, -1, false), // Orthogonal
    ( 1,  1, true),  ( 1, -1, true),  (-1,  1, true),  (-1, -1, true),  // Diagonal
];

pub const KNIGHT_DELTAS: &[(i8, i8)] = &[ // (df, dr)
    ( 1,  2), ( 2,  1), ( 2, -1), ( 1, -2),
    (-1, -2), (-2, -1), (-2,  1), (-1,  2),
];

pub const KING_DELTAS: &[(i8, i8)] = &[ // (df, dr)
    (-1, -1), (-1,  0), (-1,  1),
    ( 0, -1),           ( 0,  1),
    ( 1, -1), ( 1,  0), ( 1,  1),
];

// --- Precomputed Tables ---

lazy_static! {
    static ref SQUARE_PATTERN: Regex = Regex::new(r"^[a-h][1-8]$").expect("square pattern is valid");
    static ref KNIGHT_TARGETS: Vec<Vec<Square>> = compute_targets(KNIGHT_DELTAS);
    static ref KING_TARGETS: Vec<Vec<Square>> = compute_targets(KING_DELTAS);
}

fn compute_targets(deltas: &[(i8, i8)]) -> Vec<Vec<Square>> {
    Square::all()
        .map(|sq| deltas.iter().filter_map(|&(df, dr)| sq.offset(df, dr)).collect())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid square '{0}': expected a file a-h followed by a rank 1-8")]
pub struct ParseSquareError(pub String);

/// A square on the 8x8 board. `file` and `rank` are zero-based (a1 = 0,0).
/// Ordering is file-major, so sorted squares read a1, a2, ... b1, b2, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Returns `None` when either coordinate is off the board.
    pub fn new(file: u8, rank: u8) -> Option<Square> {
        if file < 8 && rank < 8 { Some(Square { file, rank }) } else { None }
    }

    pub fn file(&self) -> u8 { self.file }
    pub fn rank(&self) -> u8 { self.rank }

    /// Index 0-63, rank-major (a1 = 0, h1 = 7, a2 = 8).
    pub fn index(&self) -> usize {
        (self.rank as usize) * 8 + self.file as usize
    }

    pub fn offset(&self, df: i8, dr: i8) -> Option<Square> {
        let file = self.file as i8 + df;
        let rank = self.rank as i8 + dr;
        if (0..8).contains(&file) && (0..8).contains(&rank) {
            Some(Square { file: file as u8, rank: rank as u8 })
        } else {
            None
        }
    }

    /// Signed (file, rank) deltas from `self` to `other`.
    pub fn deltas(&self, other: Square) -> (i8, i8) {
        (other.file as i8 - self.file as i8, other.rank as i8 - self.rank as i8)
    }

    pub fn manhattan(&self, other: Square) -> u32 {
        let (df, dr) = self.deltas(other);
        (df.unsigned_abs() + dr.unsigned_abs()) as u32
    }

    pub fn chebyshev(&self, other: Square) -> u32 {
        let (df, dr) = self.deltas(other);
        df.unsigned_abs().max(dr.unsigned_abs()) as u32
    }

    /// Same rank, same file or same diagonal, and not the same square.
    pub fn is_aligned_with(&self, other: Square) -> bool {
        let (df, dr) = self.deltas(other);
        (df, dr) != (0, 0) && (df == 0 || dr == 0 || df.abs() == dr.abs())
    }

    /// Squares strictly between `self` and `other` along a rank, file or diagonal.
    /// Empty when the two squares are not aligned or are adjacent.
    pub fn between(&self, other: Square) -> Vec<Square> {
        if !self.is_aligned_with(other) {
            return Vec::new();
        }
        let (df, dr) = self.deltas(other);
        let (step_f, step_r) = (df.signum(), dr.signum());
        let mut squares = Vec::new();
        let mut current = self.offset(step_f, step_r);
        while let Some(sq) = current {
            if sq == other { break; }
            squares.push(sq);
            current = sq.offset(step_f, step_r);
        }
        squares
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..64u8).map(|i| Square { file: i % 8, rank: i / 8 })
    }

    pub fn knight_targets(&self) -> &'static [Square] {
        &KNIGHT_TARGETS[self.index()]
    }

    pub fn king_targets(&self) -> &'static [Square] {
        &KING_TARGETS[self.index()]
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file_char = (b'a' + self.file) as char;
        let rank_char = (b'1' + self.rank) as char;
        write!(f, "{}{}", file_char, rank_char)
    }
}

impl FromStr for Square {
    type Err = ParseSquareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !SQUARE_PATTERN.is_match(s) {
            return Err(ParseSquareError(s.to_string()));
        }
        let bytes = s.as_bytes();
        Ok(Square { file: bytes[0] - b'a', rank: bytes[1] - b'1' })
    }
}

impl TryFrom<String> for Square {
    type Error = ParseSquareError;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl From<Square> for String {
    fn from(sq: Square) -> String { sq.to_string() }
}
