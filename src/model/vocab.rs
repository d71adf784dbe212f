//! Piece/id registry.
//!
//! Owns the piece table of a loaded model and maps between piece strings
//! and dense ids. Reserved pieces (control, unknown) live in their own map
//! so user text can never produce them; exactly one unknown piece must
//! exist. All queries are `&self` and the registry is immutable after
//! construction.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Piece classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceType {
    /// Ordinary vocabulary piece
    Normal,
    /// The unknown fallback piece
    Unknown,
    /// Invisible control piece such as `<s>`
    Control,
    /// Symbol that always segments as one piece
    UserDefined,
    /// Disabled by a vocabulary restriction
    Unused,
}

/// One vocabulary entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    /// Piece surface, non-empty UTF-8
    pub piece: String,
    /// Log probability or merge rank
    pub score: f32,
    #[serde(rename = "type")]
    pub kind: PieceType,
}

impl Piece {
    pub fn new(piece: impl Into<String>, score: f32, kind: PieceType) -> Self {
        Piece {
            piece: piece.into(),
            score,
            kind,
        }
    }

    /// Normal piece shorthand
    pub fn normal(piece: impl Into<String>, score: f32) -> Self {
        Piece::new(piece, score, PieceType::Normal)
    }
}

/// Immutable piece/id registry
#[derive(Debug)]
pub struct Vocabulary {
    pieces: Vec<Piece>,
    piece_to_id: HashMap<String, u32>,
    reserved: HashMap<String, u32>,
    unk_id: u32,
    user_defined: BTreeSet<String>,
}

impl Vocabulary {
    /// Builds the registry, rejecting empty pieces, duplicates, and piece
    /// tables without exactly one unknown entry.
    pub fn new(pieces: Vec<Piece>) -> Result<Self> {
        let mut piece_to_id = HashMap::new();
        let mut reserved = HashMap::new();
        let mut unk_id: Option<u32> = None;
        let mut user_defined = BTreeSet::new();

        for (i, piece) in pieces.iter().enumerate() {
            let id = i as u32;
            if piece.piece.is_empty() {
                return Err(Error::internal("piece must not be empty"));
            }
            if piece_to_id.contains_key(&piece.piece) || reserved.contains_key(&piece.piece) {
                return Err(Error::internal(format!(
                    "{} is already defined",
                    piece.piece
                )));
            }
            match piece.kind {
                PieceType::Control | PieceType::Unknown => {
                    reserved.insert(piece.piece.clone(), id);
                }
                PieceType::Normal | PieceType::UserDefined | PieceType::Unused => {
                    piece_to_id.insert(piece.piece.clone(), id);
                }
            }
            if piece.kind == PieceType::UserDefined {
                user_defined.insert(piece.piece.clone());
            }
            if piece.kind == PieceType::Unknown {
                if unk_id.is_some() {
                    return Err(Error::internal("unk is already defined"));
                }
                unk_id = Some(id);
            }
        }

        let unk_id = unk_id.ok_or_else(|| Error::internal("unk is not defined"))?;
        Ok(Vocabulary {
            pieces,
            piece_to_id,
            reserved,
            unk_id,
            user_defined,
        })
    }

    /// Number of pieces
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Full piece table in id order
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Id of `piece`, falling back to the unknown id
    pub fn piece_to_id(&self, piece: &str) -> u32 {
        self.try_piece_to_id(piece).unwrap_or(self.unk_id)
    }

    /// Id of `piece` if it is in the vocabulary
    pub fn try_piece_to_id(&self, piece: &str) -> Option<u32> {
        self.reserved
            .get(piece)
            .or_else(|| self.piece_to_id.get(piece))
            .copied()
    }

    /// Surface of `id`
    pub fn id_to_piece(&self, id: u32) -> Result<&str> {
        self.piece(id).map(|p| p.piece.as_str())
    }

    /// Score of `id`
    pub fn get_score(&self, id: u32) -> Result<f32> {
        self.piece(id).map(|p| p.score)
    }

    /// Full entry of `id`
    pub fn piece(&self, id: u32) -> Result<&Piece> {
        self.pieces.get(id as usize).ok_or_else(|| {
            Error::OutOfRange(format!(
                "id {} is out of range (vocab size {})",
                id,
                self.pieces.len()
            ))
        })
    }

    /// Id of the unknown piece
    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn is_unknown(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Unknown)
    }

    pub fn is_control(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Control)
    }

    pub fn is_unused(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Unused)
    }

    pub fn is_user_defined(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::UserDefined)
    }

    /// Symbols of user-defined pieces, sorted
    pub fn user_defined_symbols(&self) -> &BTreeSet<String> {
        &self.user_defined
    }

    fn kind_is(&self, id: u32, kind: PieceType) -> bool {
        self.pieces
            .get(id as usize)
            .map(|p| p.kind == kind)
            .unwrap_or(false)
    }
}
