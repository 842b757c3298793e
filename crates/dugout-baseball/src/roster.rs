// Roster store: the team's players, persisted as the `players` document.

use std::sync::Arc;

use dugout_core::store::{load_collection, save_collection, Collection, DocumentStore};
use tracing::{info, warn};

use crate::error::{DugoutError, Result};
use crate::player::{
    normalize_secondaries, validate_name, validate_number, NewPlayer, Player, PlayerStatus,
    PlayerUpdate,
};

pub struct Roster {
    store: Arc<dyn DocumentStore>,
    players: Vec<Player>,
}

impl Roster {
    /// Load the roster from the store. A missing document is an empty roster.
    pub fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let players: Vec<Player> =
            load_collection(store.as_ref(), Collection::Players)?.unwrap_or_default();
        Ok(Self { store, players })
    }

    pub fn all(&self) -> &[Player] {
        &self.players
    }

    /// Players in insertion order, optionally filtered by status.
    pub fn list(&self, status: Option<PlayerStatus>) -> Vec<&Player> {
        self.players
            .iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Player> {
        self.get(id).ok_or_else(|| DugoutError::not_found("Player", id))
    }

    pub fn add(&mut self, new: NewPlayer) -> Result<Player> {
        let name = validate_name(&new.name)?;
        let number = new.number.map(validate_number).transpose()?;
        let player = Player {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            number,
            primary_position: new.primary_position,
            secondary_positions: normalize_secondaries(
                new.primary_position,
                &new.secondary_positions,
            ),
            bats: new.bats,
            throws: new.throws,
            status: PlayerStatus::Active,
            notes: new.notes,
        };
        self.check_number_free(&player)?;

        let previous = self.players.clone();
        self.players.push(player.clone());
        self.persist(previous)?;

        info!(player_id = %player.id, name = %player.name, "player added");
        Ok(player)
    }

    pub fn update(&mut self, id: &str, update: PlayerUpdate) -> Result<Player> {
        if update.is_empty() {
            return Err(DugoutError::validation("body", "No fields provided to update"));
        }
        let mut player = self.require(id)?.clone();

        if let Some(name) = &update.name {
            player.name = validate_name(name)?;
        }
        if let Some(number) = update.number {
            player.number = Some(validate_number(number)?);
        }
        if let Some(primary) = update.primary_position {
            player.primary_position = primary;
        }
        if let Some(secondaries) = &update.secondary_positions {
            player.secondary_positions = secondaries.clone();
        }
        player.secondary_positions =
            normalize_secondaries(player.primary_position, &player.secondary_positions);
        if let Some(bats) = update.bats {
            player.bats = bats;
        }
        if let Some(throws) = update.throws {
            player.throws = throws;
        }
        if let Some(status) = update.status {
            player.status = status;
        }
        if let Some(notes) = update.notes {
            player.notes = notes;
        }
        self.check_number_free(&player)?;

        self.replace(player)
    }

    pub fn set_status(&mut self, id: &str, status: PlayerStatus) -> Result<Player> {
        let mut player = self.require(id)?.clone();
        player.status = status;
        self.check_number_free(&player)?;
        self.replace(player)
    }

    /// Hard-delete a player. Returns the removed record.
    pub fn remove(&mut self, id: &str) -> Result<Player> {
        let index = self
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DugoutError::not_found("Player", id))?;

        let previous = self.players.clone();
        let removed = self.players.remove(index);
        self.persist(previous)?;

        info!(player_id = %removed.id, "player removed");
        Ok(removed)
    }

    // ----- internals -----

    fn replace(&mut self, player: Player) -> Result<Player> {
        let previous = self.players.clone();
        if let Some(slot) = self.players.iter_mut().find(|p| p.id == player.id) {
            *slot = player.clone();
        }
        self.persist(previous)?;
        Ok(player)
    }

    /// Jersey numbers are unique among players that hold one.
    fn check_number_free(&self, candidate: &Player) -> Result<()> {
        let Some(number) = candidate.number else {
            return Ok(());
        };
        if !candidate.status.holds_number() {
            return Ok(());
        }
        let taken = self.players.iter().any(|p| {
            p.id != candidate.id && p.status.holds_number() && p.number == Some(number)
        });
        if taken {
            return Err(DugoutError::validation(
                "number",
                format!("Jersey number {number} is already in use"),
            ));
        }
        Ok(())
    }

    fn persist(&mut self, previous: Vec<Player>) -> Result<()> {
        if let Err(e) = save_collection(self.store.as_ref(), Collection::Players, &self.players) {
            warn!("failed to save players, rolling back: {e}");
            self.players = previous;
            return Err(e.into());
        }
        Ok(())
    }
}
