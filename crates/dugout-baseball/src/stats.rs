// Per-game stat lines and season aggregation.

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::error::{DugoutError, Result};
use crate::position::Position;

// ---------------------------------------------------------------------------
// Innings pitched
// ---------------------------------------------------------------------------

/// Innings in scorebook notation, held as total outs.
///
/// `5.2` means five innings and two outs (17 outs), not 5.2 innings. All
/// arithmetic happens on the out count; the notation only exists at the
/// serialization boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct InningsPitched {
    outs: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid innings value {value}: {reason}")]
pub struct InvalidInnings {
    pub value: f64,
    pub reason: &'static str,
}

impl InningsPitched {
    pub const fn from_outs(outs: u32) -> Self {
        Self { outs }
    }

    pub fn outs(&self) -> u32 {
        self.outs
    }

    /// Parse scorebook notation: whole innings plus a tenths digit of 0-2.
    pub fn from_notation(value: f64) -> std::result::Result<Self, InvalidInnings> {
        let invalid = |reason| InvalidInnings { value, reason };
        if !value.is_finite() || value < 0.0 {
            return Err(invalid("must be a non-negative number"));
        }
        let scaled = value * 10.0;
        let tenths = scaled.round();
        if (scaled - tenths).abs() > 1e-6 {
            return Err(invalid("at most one decimal place is allowed"));
        }
        if tenths > f64::from(u32::MAX / 4) {
            return Err(invalid("too large"));
        }
        let tenths = tenths as u32;
        let (whole, partial) = (tenths / 10, tenths % 10);
        if partial > 2 {
            return Err(invalid("the decimal digit counts outs and must be 0, 1 or 2"));
        }
        Ok(Self {
            outs: whole * 3 + partial,
        })
    }

    pub fn to_notation(&self) -> f64 {
        let tenths = (self.outs / 3) * 10 + self.outs % 3;
        f64::from(tenths) / 10.0
    }

    /// Real innings (17 outs = 5.667), for rate stats.
    pub fn as_innings(&self) -> f64 {
        f64::from(self.outs) / 3.0
    }
}

impl TryFrom<f64> for InningsPitched {
    type Error = InvalidInnings;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        Self::from_notation(value)
    }
}

impl From<InningsPitched> for f64 {
    fn from(ip: InningsPitched) -> f64 {
        ip.to_notation()
    }
}

impl Add for InningsPitched {
    type Output = InningsPitched;

    fn add(self, rhs: InningsPitched) -> InningsPitched {
        InningsPitched::from_outs(self.outs.saturating_add(rhs.outs))
    }
}

impl Sum for InningsPitched {
    fn sum<I: Iterator<Item = InningsPitched>>(iter: I) -> Self {
        iter.fold(InningsPitched::default(), Add::add)
    }
}

impl fmt::Display for InningsPitched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.outs / 3, self.outs % 3)
    }
}

// ---------------------------------------------------------------------------
// Stat lines
// ---------------------------------------------------------------------------

/// Largest value any single counting stat may take in one game line.
pub const MAX_GAME_COUNT: u32 = 9_999;

/// Missing and `null` both read as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counting stats for one player in one game. Every field defaults to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatCounts {
    // Hitting
    #[serde(deserialize_with = "null_as_default")]
    pub ab: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub r: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub h: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub doubles: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub triples: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub hr: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub rbi: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub bb: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub so: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub sb: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub cs: u32,

    // Pitching
    #[serde(deserialize_with = "null_as_default")]
    pub ip: InningsPitched,
    #[serde(deserialize_with = "null_as_default")]
    pub h_allowed: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub r_allowed: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub er: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub bb_allowed: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub k: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub pitches: u32,

    // Fielding
    #[serde(deserialize_with = "null_as_default")]
    pub po: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub a: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub e: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub position_played: Vec<Position>,
    #[serde(deserialize_with = "null_as_default")]
    pub innings_played: InningsPitched,
}

impl StatCounts {
    /// True when every counting stat is zero.
    pub fn is_blank(&self) -> bool {
        let counts = [
            self.ab,
            self.r,
            self.h,
            self.doubles,
            self.triples,
            self.hr,
            self.rbi,
            self.bb,
            self.so,
            self.sb,
            self.cs,
            self.ip.outs(),
            self.h_allowed,
            self.r_allowed,
            self.er,
            self.bb_allowed,
            self.k,
            self.pitches,
            self.po,
            self.a,
            self.e,
        ];
        counts.iter().all(|c| *c == 0)
    }

    fn named_counts(&self) -> [(&'static str, u32); 20] {
        [
            ("ab", self.ab),
            ("r", self.r),
            ("h", self.h),
            ("doubles", self.doubles),
            ("triples", self.triples),
            ("hr", self.hr),
            ("rbi", self.rbi),
            ("bb", self.bb),
            ("so", self.so),
            ("sb", self.sb),
            ("cs", self.cs),
            ("h_allowed", self.h_allowed),
            ("r_allowed", self.r_allowed),
            ("er", self.er),
            ("bb_allowed", self.bb_allowed),
            ("k", self.k),
            ("pitches", self.pitches),
            ("po", self.po),
            ("a", self.a),
            ("e", self.e),
        ]
    }

    /// Range and cross-field consistency checks.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in self.named_counts() {
            if value > MAX_GAME_COUNT {
                return Err(DugoutError::validation(
                    field,
                    format!("{field} must be at most {MAX_GAME_COUNT} for one game (got {value})"),
                ));
            }
        }
        for (field, innings) in [("ip", self.ip), ("innings_played", self.innings_played)] {
            if innings.outs() > MAX_GAME_COUNT * 3 {
                return Err(DugoutError::validation(
                    field,
                    format!("{field} must be at most {MAX_GAME_COUNT} innings (got {innings})"),
                ));
            }
        }

        let extra_base =
            u64::from(self.doubles) + u64::from(self.triples) + u64::from(self.hr);
        if extra_base > u64::from(self.h) {
            return Err(DugoutError::validation(
                "h",
                format!(
                    "Doubles, triples and home runs ({extra_base}) cannot exceed hits ({})",
                    self.h
                ),
            ));
        }
        if self.er > self.r_allowed {
            return Err(DugoutError::validation(
                "er",
                format!(
                    "Earned runs ({}) cannot exceed runs allowed ({})",
                    self.er, self.r_allowed
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStatLine {
    pub game_id: String,
    pub player_id: String,
    #[serde(flatten)]
    pub counts: StatCounts,
}

/// One player's line inside a bulk upsert for a game.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatLineInput {
    pub player_id: String,
    #[serde(flatten)]
    pub counts: StatCounts,
}

// ---------------------------------------------------------------------------
// Season aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HittingTotals {
    pub ab: u64,
    pub r: u64,
    pub h: u64,
    pub doubles: u64,
    pub triples: u64,
    pub hr: u64,
    pub rbi: u64,
    pub bb: u64,
    pub so: u64,
    pub sb: u64,
    pub cs: u64,
    pub avg: f64,
    pub obp: f64,
    pub slg: f64,
    pub ops: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PitchingTotals {
    pub ip: InningsPitched,
    pub h: u64,
    pub r: u64,
    pub er: u64,
    pub bb: u64,
    pub k: u64,
    pub pitches: u64,
    pub era: f64,
    pub whip: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldingTotals {
    pub po: u64,
    pub a: u64,
    pub e: u64,
    pub fpct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeasonStats {
    pub player_id: String,
    pub games_played: u32,
    pub hitting: HittingTotals,
    pub pitching: PitchingTotals,
    pub fielding: FieldingTotals,
}

/// Fold one player's stat lines into season totals and rates.
///
/// Pure: the same lines always give the same result. Rates are 0 whenever
/// their denominator is 0.
pub fn aggregate(player_id: &str, lines: &[GameStatLine]) -> SeasonStats {
    let games_played = lines
        .iter()
        .filter(|l| !l.counts.is_blank())
        .map(|l| l.game_id.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u32;

    // Season totals are summed wide so no number of lines can overflow them.
    let sum = |f: fn(&StatCounts) -> u32| {
        lines
            .iter()
            .map(|l| u64::from(f(&l.counts)))
            .sum::<u64>()
    };

    let mut hitting = HittingTotals {
        ab: sum(|c| c.ab),
        r: sum(|c| c.r),
        h: sum(|c| c.h),
        doubles: sum(|c| c.doubles),
        triples: sum(|c| c.triples),
        hr: sum(|c| c.hr),
        rbi: sum(|c| c.rbi),
        bb: sum(|c| c.bb),
        so: sum(|c| c.so),
        sb: sum(|c| c.sb),
        cs: sum(|c| c.cs),
        ..Default::default()
    };
    let singles = hitting
        .h
        .saturating_sub(hitting.doubles + hitting.triples + hitting.hr);
    let total_bases = singles + 2 * hitting.doubles + 3 * hitting.triples + 4 * hitting.hr;
    let avg = ratio(hitting.h as f64, hitting.ab as f64);
    let obp = ratio(
        (hitting.h + hitting.bb) as f64,
        (hitting.ab + hitting.bb) as f64,
    );
    let slg = ratio(total_bases as f64, hitting.ab as f64);
    hitting.avg = round_to(avg, 3);
    hitting.obp = round_to(obp, 3);
    hitting.slg = round_to(slg, 3);
    hitting.ops = round_to(obp + slg, 3);

    let ip: InningsPitched = lines.iter().map(|l| l.counts.ip).sum();
    let mut pitching = PitchingTotals {
        ip,
        h: sum(|c| c.h_allowed),
        r: sum(|c| c.r_allowed),
        er: sum(|c| c.er),
        bb: sum(|c| c.bb_allowed),
        k: sum(|c| c.k),
        pitches: sum(|c| c.pitches),
        ..Default::default()
    };
    let innings = ip.as_innings();
    pitching.era = round_to(ratio(9.0 * pitching.er as f64, innings), 2);
    pitching.whip = round_to(ratio((pitching.bb + pitching.h) as f64, innings), 2);

    let mut fielding = FieldingTotals {
        po: sum(|c| c.po),
        a: sum(|c| c.a),
        e: sum(|c| c.e),
        ..Default::default()
    };
    fielding.fpct = round_to(
        ratio(
            (fielding.po + fielding.a) as f64,
            (fielding.po + fielding.a + fielding.e) as f64,
        ),
        3,
    );

    SeasonStats {
        player_id: player_id.to_string(),
        games_played,
        hitting,
        pitching,
        fielding,
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
