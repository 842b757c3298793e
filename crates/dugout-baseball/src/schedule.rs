// Game schedule and the per-game stat book.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dugout_core::store::{load_collection, save_collection, Collection, DocumentStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DugoutError, Result};
use crate::roster::Roster;
use crate::stats::{GameStatLine, StatLineInput};

pub const OPPONENT_MAX_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeAway {
    #[default]
    Home,
    Away,
}

/// Whether a game came from the published schedule or was added by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameSource {
    #[default]
    Schedule,
    Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Scheduled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "L")]
    Loss,
    #[serde(rename = "T")]
    Tie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub date: NaiveDate,
    pub opponent: String,
    #[serde(default)]
    pub home_away: HomeAway,
    #[serde(default)]
    pub source: GameSource,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub result: Option<GameResult>,
    #[serde(default)]
    pub score_us: Option<u32>,
    #[serde(default)]
    pub score_them: Option<u32>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGame {
    pub date: String,
    pub opponent: String,
    #[serde(default)]
    pub home_away: HomeAway,
    #[serde(default)]
    pub source: GameSource,
    #[serde(default)]
    pub status: Option<GameStatus>,
    #[serde(default)]
    pub result: Option<GameResult>,
    #[serde(default)]
    pub score_us: Option<i64>,
    #[serde(default)]
    pub score_them: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameUpdate {
    pub date: Option<String>,
    pub opponent: Option<String>,
    pub home_away: Option<HomeAway>,
    pub source: Option<GameSource>,
    pub status: Option<GameStatus>,
    pub result: Option<GameResult>,
    pub score_us: Option<i64>,
    pub score_them: Option<i64>,
    pub notes: Option<String>,
}

impl GameUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.opponent.is_none()
            && self.home_away.is_none()
            && self.source.is_none()
            && self.status.is_none()
            && self.result.is_none()
            && self.score_us.is_none()
            && self.score_them.is_none()
            && self.notes.is_none()
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        DugoutError::validation("date", format!("Invalid date '{raw}'; expected YYYY-MM-DD"))
    })
}

fn validate_opponent(raw: &str) -> Result<String> {
    let opponent = raw.trim();
    let chars = opponent.chars().count();
    if chars == 0 {
        return Err(DugoutError::validation(
            "opponent",
            "Opponent name cannot be empty or just whitespace",
        ));
    }
    if chars > OPPONENT_MAX_CHARS {
        return Err(DugoutError::validation(
            "opponent",
            format!("Opponent name must be at most {OPPONENT_MAX_CHARS} characters"),
        ));
    }
    Ok(opponent.to_string())
}

fn validate_score(field: &str, score: i64) -> Result<u32> {
    u32::try_from(score)
        .map_err(|_| DugoutError::validation(field, format!("{field} must be a non-negative number")))
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

pub struct Schedule {
    store: Arc<dyn DocumentStore>,
    games: Vec<Game>,
}

impl Schedule {
    pub fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let games = load_collection(store.as_ref(), Collection::Games)?.unwrap_or_default();
        Ok(Self { store, games })
    }

    /// Most recent game first.
    pub fn list(&self) -> Vec<&Game> {
        let mut games: Vec<&Game> = self.games.iter().collect();
        games.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        games
    }

    pub fn get(&self, id: &str) -> Option<&Game> {
        self.games.iter().find(|g| g.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Game> {
        self.get(id).ok_or_else(|| DugoutError::not_found("Game", id))
    }

    pub fn add(&mut self, new: NewGame) -> Result<Game> {
        let date = parse_date(&new.date)?;
        let opponent = validate_opponent(&new.opponent)?;
        let score_us = new.score_us.map(|s| validate_score("score_us", s)).transpose()?;
        let score_them = new
            .score_them
            .map(|s| validate_score("score_them", s))
            .transpose()?;
        let status = new.status.unwrap_or(if new.result.is_some() {
            GameStatus::Completed
        } else {
            GameStatus::Scheduled
        });

        let game = Game {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            opponent,
            home_away: new.home_away,
            source: new.source,
            status,
            result: new.result,
            score_us,
            score_them,
            notes: new.notes,
            created_at: Some(Utc::now()),
        };

        let previous = self.games.clone();
        self.games.push(game.clone());
        self.persist(previous)?;

        info!(game_id = %game.id, opponent = %game.opponent, date = %game.date, "game added");
        Ok(game)
    }

    pub fn update(&mut self, id: &str, update: GameUpdate) -> Result<Game> {
        if update.is_empty() {
            return Err(DugoutError::validation("body", "No fields provided to update"));
        }
        let mut game = self.require(id)?.clone();

        if let Some(date) = &update.date {
            game.date = parse_date(date)?;
        }
        if let Some(opponent) = &update.opponent {
            game.opponent = validate_opponent(opponent)?;
        }
        if let Some(home_away) = update.home_away {
            game.home_away = home_away;
        }
        if let Some(source) = update.source {
            game.source = source;
        }
        if let Some(score) = update.score_us {
            game.score_us = Some(validate_score("score_us", score)?);
        }
        if let Some(score) = update.score_them {
            game.score_them = Some(validate_score("score_them", score)?);
        }
        if let Some(notes) = update.notes {
            game.notes = notes;
        }
        if let Some(result) = update.result {
            game.result = Some(result);
            game.status = GameStatus::Completed;
        }
        if let Some(status) = update.status {
            game.status = status;
        }

        let previous = self.games.clone();
        if let Some(slot) = self.games.iter_mut().find(|g| g.id == game.id) {
            *slot = game.clone();
        }
        self.persist(previous)?;
        Ok(game)
    }

    pub fn remove(&mut self, id: &str) -> Result<Game> {
        let index = self
            .games
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| DugoutError::not_found("Game", id))?;

        let previous = self.games.clone();
        let removed = self.games.remove(index);
        self.persist(previous)?;

        info!(game_id = %removed.id, "game removed");
        Ok(removed)
    }

    fn persist(&mut self, previous: Vec<Game>) -> Result<()> {
        if let Err(e) = save_collection(self.store.as_ref(), Collection::Games, &self.games) {
            warn!("failed to save games, rolling back: {e}");
            self.games = previous;
            return Err(e.into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stat book
// ---------------------------------------------------------------------------

/// Every stat line, at most one per (game, player).
pub struct StatBook {
    store: Arc<dyn DocumentStore>,
    lines: Vec<GameStatLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkStatLines {
    /// Optional echo of the game in the path; must match when present.
    #[serde(default)]
    pub game_id: Option<String>,
    pub stats: Vec<StatLineInput>,
}

impl StatBook {
    pub fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let lines = load_collection(store.as_ref(), Collection::GameStats)?.unwrap_or_default();
        Ok(Self { store, lines })
    }

    pub fn by_game(&self, game_id: &str) -> Vec<&GameStatLine> {
        self.lines.iter().filter(|l| l.game_id == game_id).collect()
    }

    /// A player's lines, most recent game first.
    pub fn by_player(&self, player_id: &str, schedule: &Schedule) -> Vec<&GameStatLine> {
        let mut lines: Vec<&GameStatLine> = self
            .lines
            .iter()
            .filter(|l| l.player_id == player_id)
            .collect();
        lines.sort_by(|a, b| {
            let date_a = schedule.get(&a.game_id).map(|g| g.date);
            let date_b = schedule.get(&b.game_id).map(|g| g.date);
            date_b.cmp(&date_a)
        });
        lines
    }

    /// Insert or replace lines for one game. Within one request the last line
    /// for a player wins. Returns every line now stored for the game.
    pub fn upsert_bulk(
        &mut self,
        game: &Game,
        inputs: Vec<StatLineInput>,
        roster: &Roster,
    ) -> Result<Vec<GameStatLine>> {
        let mut incoming: Vec<GameStatLine> = Vec::with_capacity(inputs.len());
        for input in inputs {
            roster.require(&input.player_id)?;
            input.counts.validate()?;
            let line = GameStatLine {
                game_id: game.id.clone(),
                player_id: input.player_id,
                counts: input.counts,
            };
            match incoming.iter_mut().find(|l| l.player_id == line.player_id) {
                Some(existing) => *existing = line,
                None => incoming.push(line),
            }
        }

        let previous = self.lines.clone();
        for line in incoming {
            match self
                .lines
                .iter_mut()
                .find(|l| l.game_id == line.game_id && l.player_id == line.player_id)
            {
                Some(existing) => *existing = line,
                None => self.lines.push(line),
            }
        }
        self.persist(previous)?;

        Ok(self.by_game(&game.id).into_iter().cloned().collect())
    }

    /// Drop every line for a game. Returns how many were removed.
    pub fn remove_game(&mut self, game_id: &str) -> Result<usize> {
        self.remove_where(|l| l.game_id == game_id)
    }

    /// Drop every line for a player. Returns how many were removed.
    pub fn remove_player(&mut self, player_id: &str) -> Result<usize> {
        self.remove_where(|l| l.player_id == player_id)
    }

    fn remove_where(&mut self, matches: impl Fn(&GameStatLine) -> bool) -> Result<usize> {
        let before = self.lines.len();
        let previous = self.lines.clone();
        self.lines.retain(|l| !matches(l));
        let removed = before - self.lines.len();
        if removed > 0 {
            self.persist(previous)?;
        }
        Ok(removed)
    }

    fn persist(&mut self, previous: Vec<GameStatLine>) -> Result<()> {
        if let Err(e) = save_collection(self.store.as_ref(), Collection::GameStats, &self.lines) {
            warn!("failed to save game stats, rolling back: {e}");
            self.lines = previous;
            return Err(e.into());
        }
        Ok(())
    }
}
