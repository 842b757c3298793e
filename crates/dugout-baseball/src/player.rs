// Player records and the request shapes that create or modify them.

use serde::{Deserialize, Serialize};

use crate::error::{DugoutError, Result};
use crate::position::{Bats, Position, Throws};

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl PlayerStatus {
    /// Active and inactive players hold on to their jersey number.
    pub fn holds_number(&self) -> bool {
        !matches!(self, PlayerStatus::Archived)
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(PlayerStatus::Active),
            "inactive" => Some(PlayerStatus::Inactive),
            "archived" => Some(PlayerStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub number: Option<u8>,
    pub primary_position: Position,
    #[serde(default)]
    pub secondary_positions: Vec<Position>,
    pub bats: Bats,
    pub throws: Throws,
    #[serde(default)]
    pub status: PlayerStatus,
    #[serde(default)]
    pub notes: String,
}

impl Player {
    /// "#9 Alex Rivera", or just the name when no number is assigned.
    pub fn label(&self) -> String {
        match self.number {
            Some(n) => format!("#{} {}", n, self.name),
            None => self.name.clone(),
        }
    }
}

/// Body of a create request. Numbers arrive as plain integers so range
/// problems surface as validation errors instead of decode failures.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlayer {
    pub name: String,
    #[serde(default)]
    pub number: Option<i64>,
    pub primary_position: Position,
    #[serde(default)]
    pub secondary_positions: Vec<Position>,
    pub bats: Bats,
    pub throws: Throws,
    #[serde(default)]
    pub notes: String,
}

/// Partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerUpdate {
    pub name: Option<String>,
    pub number: Option<i64>,
    pub primary_position: Option<Position>,
    pub secondary_positions: Option<Vec<Position>>,
    pub bats: Option<Bats>,
    pub throws: Option<Throws>,
    pub status: Option<PlayerStatus>,
    pub notes: Option<String>,
}

impl PlayerUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.number.is_none()
            && self.primary_position.is_none()
            && self.secondary_positions.is_none()
            && self.bats.is_none()
            && self.throws.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

pub fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    let chars = name.chars().count();
    if chars == 0 {
        return Err(DugoutError::validation(
            "name",
            "Name cannot be empty or just whitespace",
        ));
    }
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&chars) {
        return Err(DugoutError::validation(
            "name",
            format!("Name must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

pub fn validate_number(number: i64) -> Result<u8> {
    if !(1..=99).contains(&number) {
        return Err(DugoutError::validation(
            "number",
            format!("Jersey number must be between 1 and 99 (got {number})"),
        ));
    }
    Ok(number as u8)
}

/// Drop duplicates and the primary position, keeping the listed order.
pub fn normalize_secondaries(primary: Position, secondaries: &[Position]) -> Vec<Position> {
    let mut out: Vec<Position> = Vec::with_capacity(secondaries.len());
    for pos in secondaries {
        if *pos != primary && !out.contains(pos) {
            out.push(*pos);
        }
    }
    out
}
