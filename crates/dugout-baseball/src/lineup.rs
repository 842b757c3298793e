// Lineup/field consistency engine.
//
// Owns the nine-slot batting order and the defensive assignment table and
// keeps them consistent: a player batting is placed on the field, a player
// removed from either table is removed from both, and no player id appears
// twice in one table. Every operation persists what it changed and rolls the
// in-memory state back when the write fails.

use std::collections::BTreeSet;
use std::sync::Arc;

use dugout_core::store::{load_collection, save_collection, Collection, DocumentStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DugoutError, Result};
use crate::player::Player;
use crate::position::{Position, DEFENSIVE_POSITIONS};
use crate::roster::Roster;

pub const LINEUP_SLOTS: u8 = 9;

// ---------------------------------------------------------------------------
// Table types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupSlot {
    pub slot_number: u8,
    #[serde(default)]
    pub player_id: Option<String>,
    /// Field position the batter was placed at when assigned to this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl LineupSlot {
    pub fn empty(slot_number: u8) -> Self {
        Self {
            slot_number,
            player_id: None,
            position: None,
        }
    }

    fn clear(&mut self) -> Option<String> {
        self.position = None;
        self.player_id.take()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAssignment {
    pub position: Position,
    #[serde(default)]
    pub player_id: Option<String>,
}

impl FieldAssignment {
    pub fn empty(position: Position) -> Self {
        Self {
            position,
            player_id: None,
        }
    }
}

pub fn empty_lineup() -> Vec<LineupSlot> {
    (1..=LINEUP_SLOTS).map(LineupSlot::empty).collect()
}

pub fn empty_field(use_dh: bool) -> Vec<FieldAssignment> {
    let mut field: Vec<FieldAssignment> = DEFENSIVE_POSITIONS
        .iter()
        .map(|p| FieldAssignment::empty(*p))
        .collect();
    if use_dh {
        field.push(FieldAssignment::empty(Position::DesignatedHitter));
    }
    field
}

// ---------------------------------------------------------------------------
// Position fit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionFit {
    Primary,
    Secondary,
    OutOfPosition,
}

/// Informational only. Never blocks an assignment.
pub fn position_fit(player: &Player, position: Position) -> PositionFit {
    if player.primary_position == position {
        PositionFit::Primary
    } else if player.secondary_positions.contains(&position) {
        PositionFit::Secondary
    } else {
        PositionFit::OutOfPosition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldFit {
    pub position: Position,
    pub player_id: String,
    pub fit: PositionFit,
}

// ---------------------------------------------------------------------------
// State, snapshots and commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineupState {
    pub lineup: Vec<LineupSlot>,
    pub field: Vec<FieldAssignment>,
    pub bench: BTreeSet<String>,
    pub use_dh: bool,
    /// Last player to leave the DH spot when it was switched off.
    #[serde(skip)]
    pub remembered_dh: Option<String>,
}

impl Default for LineupState {
    fn default() -> Self {
        Self {
            lineup: empty_lineup(),
            field: empty_field(false),
            bench: BTreeSet::new(),
            use_dh: false,
            remembered_dh: None,
        }
    }
}

/// The persisted part of the engine: what a saved configuration holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupSnapshot {
    pub lineup: Vec<LineupSlot>,
    pub field_positions: Vec<FieldAssignment>,
    #[serde(default)]
    pub use_dh: bool,
}

impl LineupSnapshot {
    /// Put the tables in canonical order and check their shape. A DH entry
    /// is added or dropped to agree with `use_dh`.
    pub fn normalized(mut self) -> Result<Self> {
        self.lineup = normalize_lineup(self.lineup)?;
        let has_dh = self
            .field_positions
            .iter()
            .any(|f| f.position == Position::DesignatedHitter);
        if self.use_dh && !has_dh {
            self.field_positions
                .push(FieldAssignment::empty(Position::DesignatedHitter));
        } else if !self.use_dh && has_dh {
            self.field_positions
                .retain(|f| f.position != Position::DesignatedHitter);
        }
        let (field, _) = normalize_field(self.field_positions)?;
        self.field_positions = field;
        Ok(self)
    }
}

/// One engine operation, as posted by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LineupCommand {
    AssignToLineup { player_id: String, slot: u8 },
    RemoveFromLineup { slot: u8 },
    ReorderLineup { from: u8, to: u8 },
    AssignToField { player_id: String, position: Position },
    RemoveFromField { position: Position },
    AddToBench { player_id: String },
    SetDh { enabled: bool },
    ClearLineup,
    ClearField,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct LineupEngine {
    store: Arc<dyn DocumentStore>,
    state: LineupState,
}

impl LineupEngine {
    /// Load both tables. Missing documents start empty with the DH off.
    pub fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let mut state = LineupState::default();

        if let Some(slots) =
            load_collection::<Vec<LineupSlot>>(store.as_ref(), Collection::Lineup)?
        {
            for slot in slots {
                if let Some(target) = slot_index(slot.slot_number)
                    .ok()
                    .and_then(|i| state.lineup.get_mut(i))
                {
                    *target = slot;
                }
            }
        }

        if let Some(entries) =
            load_collection::<Vec<FieldAssignment>>(store.as_ref(), Collection::Field)?
        {
            state.use_dh = entries
                .iter()
                .any(|f| f.position == Position::DesignatedHitter);
            state.field = empty_field(state.use_dh);
            for entry in entries {
                if let Some(target) = state.field.iter_mut().find(|f| f.position == entry.position)
                {
                    target.player_id = entry.player_id;
                }
            }
        }

        Ok(Self { store, state })
    }

    pub fn state(&self) -> &LineupState {
        &self.state
    }

    pub fn lineup(&self) -> &[LineupSlot] {
        &self.state.lineup
    }

    pub fn field(&self) -> &[FieldAssignment] {
        &self.state.field
    }

    pub fn use_dh(&self) -> bool {
        self.state.use_dh
    }

    pub fn snapshot(&self) -> LineupSnapshot {
        LineupSnapshot {
            lineup: self.state.lineup.clone(),
            field_positions: self.state.field.clone(),
            use_dh: self.state.use_dh,
        }
    }

    /// Position fit for every occupied field position. Players missing from
    /// the roster are skipped.
    pub fn field_fits(&self, roster: &Roster) -> Vec<FieldFit> {
        self.state
            .field
            .iter()
            .filter_map(|f| {
                let id = f.player_id.as_ref()?;
                let player = roster.get(id)?;
                Some(FieldFit {
                    position: f.position,
                    player_id: id.clone(),
                    fit: position_fit(player, f.position),
                })
            })
            .collect()
    }

    /// Run a command, resolving player ids against the roster.
    pub fn apply(&mut self, command: LineupCommand, roster: &Roster) -> Result<&LineupState> {
        debug!(?command, "applying lineup command");
        match command {
            LineupCommand::AssignToLineup { player_id, slot } => {
                self.assign_to_lineup(roster.require(&player_id)?, slot)?
            }
            LineupCommand::RemoveFromLineup { slot } => self.remove_from_lineup(slot)?,
            LineupCommand::ReorderLineup { from, to } => self.reorder_lineup(from, to)?,
            LineupCommand::AssignToField {
                player_id,
                position,
            } => self.assign_to_field(roster.require(&player_id)?, position)?,
            LineupCommand::RemoveFromField { position } => self.remove_from_field(position)?,
            LineupCommand::AddToBench { player_id } => {
                self.add_to_bench(roster.require(&player_id)?)?
            }
            LineupCommand::SetDh { enabled } => self.set_dh(enabled)?,
            LineupCommand::ClearLineup => self.clear_lineup()?,
            LineupCommand::ClearField => self.clear_field()?,
        }
        Ok(&self.state)
    }

    // ----- lineup operations -----

    /// Put a player in a batting slot, swapping with the slot's occupant when
    /// the player was already batting elsewhere. A player not on the field is
    /// auto-placed there.
    pub fn assign_to_lineup(&mut self, player: &Player, slot: u8) -> Result<()> {
        let target = slot_index(slot)?;
        let before = self.state.clone();
        let id = player.id.clone();
        let st = &mut self.state;

        match lineup_index_of(&st.lineup, &id) {
            Some(current) if current == target => {}
            Some(current) => swap_slots(&mut st.lineup, current, target),
            None => {
                let displaced = st.lineup[target].clear();
                st.lineup[target].player_id = Some(id.clone());
                if let Some(displaced) = displaced {
                    clear_field_for(&mut st.field, &displaced);
                }
            }
        }

        let placed = match field_index_of(&st.field, &id) {
            Some(i) => Some(st.field[i].position),
            None => auto_place(&st.field, player).map(|i| {
                st.field[i].player_id = Some(id.clone());
                st.field[i].position
            }),
        };
        st.lineup[target].position = placed;
        st.bench.remove(&id);

        self.commit(before)
    }

    pub fn remove_from_lineup(&mut self, slot: u8) -> Result<()> {
        let target = slot_index(slot)?;
        let before = self.state.clone();
        let st = &mut self.state;

        if let Some(id) = st.lineup[target].clear() {
            clear_field_for(&mut st.field, &id);
        }

        self.commit(before)
    }

    /// Swap the full contents of two slots. The field is untouched.
    pub fn reorder_lineup(&mut self, from: u8, to: u8) -> Result<()> {
        let a = slot_index(from)?;
        let b = slot_index(to)?;
        let before = self.state.clone();
        swap_slots(&mut self.state.lineup, a, b);
        self.commit(before)
    }

    /// Move a player out of the batting order onto the bench. Their field
    /// assignment stays.
    pub fn add_to_bench(&mut self, player: &Player) -> Result<()> {
        let before = self.state.clone();
        let st = &mut self.state;
        if let Some(i) = lineup_index_of(&st.lineup, &player.id) {
            st.lineup[i].clear();
        }
        st.bench.insert(player.id.clone());
        self.commit(before)
    }

    pub fn clear_lineup(&mut self) -> Result<()> {
        let before = self.state.clone();
        self.state.lineup = empty_lineup();
        self.state.bench.clear();
        self.commit(before)
    }

    // ----- field operations -----

    /// Put a player at a field position, swapping with the occupant when the
    /// player was already fielding elsewhere. A player not batting is placed
    /// in the first empty slot, untagged. Slot tags of players already batting
    /// follow their new field spot. Bench membership is not touched.
    pub fn assign_to_field(&mut self, player: &Player, position: Position) -> Result<()> {
        let target = field_index(&self.state, position)?;
        let before = self.state.clone();
        let id = player.id.clone();
        let st = &mut self.state;

        match field_index_of(&st.field, &id) {
            Some(current) if current == target => {}
            Some(current) => {
                let occupant = st.field[target].player_id.take();
                if let Some(occupant) = &occupant {
                    let moved_to = st.field[current].position;
                    retag_slot(&mut st.lineup, occupant, Some(moved_to));
                }
                st.field[current].player_id = occupant;
                st.field[target].player_id = Some(id.clone());
            }
            None => {
                // The displaced player keeps their place in the batting order.
                if let Some(displaced) = st.field[target].player_id.replace(id.clone()) {
                    retag_slot(&mut st.lineup, &displaced, None);
                }
            }
        }

        match lineup_index_of(&st.lineup, &id) {
            Some(i) => st.lineup[i].position = Some(position),
            None => {
                if let Some(slot) = st.lineup.iter_mut().find(|s| s.player_id.is_none()) {
                    slot.player_id = Some(id);
                    slot.position = None;
                }
            }
        }

        self.commit(before)
    }

    /// Clear a field position. Its player also leaves the batting order.
    pub fn remove_from_field(&mut self, position: Position) -> Result<()> {
        let target = field_index(&self.state, position)?;
        let before = self.state.clone();
        let st = &mut self.state;

        if let Some(id) = st.field[target].player_id.take() {
            if let Some(i) = lineup_index_of(&st.lineup, &id) {
                st.lineup[i].clear();
            }
        }

        self.commit(before)
    }

    pub fn clear_field(&mut self) -> Result<()> {
        let before = self.state.clone();
        self.state.field = empty_field(self.state.use_dh);
        self.commit(before)
    }

    // ----- designated hitter -----

    /// Switch the DH spot on or off.
    ///
    /// Off: the DH's batting slot goes to whoever is pitching (or is left
    /// empty when there is no pitcher or the pitcher already bats), and the
    /// DH is remembered. On: the remembered player returns to the DH spot
    /// unless they have since taken another position, and bats in the first
    /// empty slot if they are not already in the order.
    pub fn set_dh(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.state.use_dh {
            return Ok(());
        }
        let before = self.state.clone();
        let st = &mut self.state;

        if enabled {
            let mut dh = FieldAssignment::empty(Position::DesignatedHitter);
            if let Some(id) = st.remembered_dh.take() {
                if field_index_of(&st.field, &id).is_none() {
                    dh.player_id = Some(id.clone());
                    if lineup_index_of(&st.lineup, &id).is_none() {
                        if let Some(slot) = st.lineup.iter_mut().find(|s| s.player_id.is_none()) {
                            slot.player_id = Some(id.clone());
                            slot.position = Some(Position::DesignatedHitter);
                        }
                    }
                    st.bench.remove(&id);
                }
            }
            st.field.push(dh);
        } else {
            let departing = st
                .field
                .iter()
                .find(|f| f.position == Position::DesignatedHitter)
                .and_then(|f| f.player_id.clone());
            st.field.retain(|f| f.position != Position::DesignatedHitter);

            if let Some(dh_id) = &departing {
                if let Some(slot) = lineup_index_of(&st.lineup, dh_id) {
                    let pitcher = st
                        .field
                        .iter()
                        .find(|f| f.position == Position::Pitcher)
                        .and_then(|f| f.player_id.clone())
                        .filter(|p| lineup_index_of(&st.lineup, p).is_none());
                    st.lineup[slot].clear();
                    if let Some(pitcher) = pitcher {
                        st.lineup[slot].player_id = Some(pitcher);
                        st.lineup[slot].position = Some(Position::Pitcher);
                    }
                }
            }
            st.remembered_dh = departing;
        }
        st.use_dh = enabled;

        self.commit(before)
    }

    // ----- whole-document replacement -----

    /// Replace the batting order wholesale. Exactly nine slots numbered 1-9,
    /// no player twice.
    pub fn replace_lineup(&mut self, slots: Vec<LineupSlot>) -> Result<()> {
        let lineup = normalize_lineup(slots)?;
        let before = self.state.clone();
        for id in lineup.iter().filter_map(|s| s.player_id.as_ref()) {
            self.state.bench.remove(id);
        }
        self.state.lineup = lineup;
        self.commit(before)
    }

    /// Replace the field table wholesale. The presence of a DH entry sets
    /// the DH flag.
    pub fn replace_field(&mut self, entries: Vec<FieldAssignment>) -> Result<()> {
        let (field, use_dh) = normalize_field(entries)?;
        let before = self.state.clone();
        self.state.field = field;
        if use_dh != self.state.use_dh {
            self.state.remembered_dh = None;
        }
        self.state.use_dh = use_dh;
        self.commit(before)
    }

    /// Apply a saved configuration.
    pub fn load_snapshot(&mut self, snapshot: LineupSnapshot) -> Result<()> {
        let snapshot = snapshot.normalized()?;
        let before = self.state.clone();
        self.state = LineupState {
            lineup: snapshot.lineup,
            field: snapshot.field_positions,
            bench: BTreeSet::new(),
            use_dh: snapshot.use_dh,
            remembered_dh: None,
        };
        self.commit(before)
    }

    /// Remove every trace of a player (used when the player is deleted).
    pub fn purge_player(&mut self, player_id: &str) -> Result<()> {
        let before = self.state.clone();
        let st = &mut self.state;
        if let Some(i) = lineup_index_of(&st.lineup, player_id) {
            st.lineup[i].clear();
        }
        clear_field_for(&mut st.field, player_id);
        st.bench.remove(player_id);
        if st.remembered_dh.as_deref() == Some(player_id) {
            st.remembered_dh = None;
        }
        self.commit(before)
    }

    // ----- persistence -----

    /// Write whichever tables changed since `before`. On failure, restore
    /// `before` in memory and put back any table already written.
    fn commit(&mut self, before: LineupState) -> Result<()> {
        let lineup_changed = self.state.lineup != before.lineup;
        let field_changed = self.state.field != before.field;
        let store = self.store.as_ref();

        if lineup_changed {
            if let Err(e) = save_collection(store, Collection::Lineup, &self.state.lineup) {
                warn!("failed to save lineup, rolling back: {e}");
                self.state = before;
                return Err(e.into());
            }
        }

        if field_changed {
            if let Err(e) = save_collection(store, Collection::Field, &self.state.field) {
                warn!("failed to save field, rolling back: {e}");
                if lineup_changed {
                    if let Err(restore) =
                        save_collection(store, Collection::Lineup, &before.lineup)
                    {
                        warn!("failed to restore lineup document: {restore}");
                    }
                }
                self.state = before;
                return Err(e.into());
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Table helpers
// ---------------------------------------------------------------------------

fn slot_index(slot: u8) -> Result<usize> {
    if !(1..=LINEUP_SLOTS).contains(&slot) {
        return Err(DugoutError::validation(
            "slot",
            format!("Batting slot must be between 1 and {LINEUP_SLOTS} (got {slot})"),
        ));
    }
    Ok(usize::from(slot - 1))
}

fn field_index(state: &LineupState, position: Position) -> Result<usize> {
    state
        .field
        .iter()
        .position(|f| f.position == position)
        .ok_or_else(|| {
            DugoutError::validation(
                "position",
                format!("Position {position} is not in use; enable the DH first"),
            )
        })
}

fn lineup_index_of(lineup: &[LineupSlot], id: &str) -> Option<usize> {
    lineup
        .iter()
        .position(|s| s.player_id.as_deref() == Some(id))
}

fn field_index_of(field: &[FieldAssignment], id: &str) -> Option<usize> {
    field
        .iter()
        .position(|f| f.player_id.as_deref() == Some(id))
}

fn clear_field_for(field: &mut [FieldAssignment], id: &str) {
    if let Some(i) = field_index_of(field, id) {
        field[i].player_id = None;
    }
}

fn retag_slot(lineup: &mut [LineupSlot], id: &str, position: Option<Position>) {
    if let Some(i) = lineup_index_of(lineup, id) {
        lineup[i].position = position;
    }
}

fn swap_slots(lineup: &mut [LineupSlot], a: usize, b: usize) {
    if a == b {
        return;
    }
    let a_contents = (lineup[a].player_id.take(), lineup[a].position.take());
    lineup[a].player_id = lineup[b].player_id.take();
    lineup[a].position = lineup[b].position.take();
    lineup[b].player_id = a_contents.0;
    lineup[b].position = a_contents.1;
}

/// Where a newly batting player lands: primary position, then listed
/// secondaries, then any open defensive spot, then the DH.
fn auto_place(field: &[FieldAssignment], player: &Player) -> Option<usize> {
    let open = |pos: Position| {
        field
            .iter()
            .position(|f| f.position == pos && f.player_id.is_none())
    };

    open(player.primary_position)
        .or_else(|| player.secondary_positions.iter().find_map(|p| open(*p)))
        .or_else(|| {
            field
                .iter()
                .position(|f| f.position.is_defensive() && f.player_id.is_none())
        })
        .or_else(|| open(Position::DesignatedHitter))
}

fn normalize_lineup(mut slots: Vec<LineupSlot>) -> Result<Vec<LineupSlot>> {
    if slots.len() != usize::from(LINEUP_SLOTS) {
        return Err(DugoutError::validation(
            "lineup",
            format!(
                "Lineup must have exactly {LINEUP_SLOTS} slots (got {})",
                slots.len()
            ),
        ));
    }
    slots.sort_by_key(|s| s.slot_number);
    for (expected, slot) in (1..=LINEUP_SLOTS).zip(&slots) {
        if slot.slot_number != expected {
            return Err(DugoutError::validation(
                "lineup",
                "Lineup slots must be numbered 1 through 9 without duplicates",
            ));
        }
    }
    ensure_unique_players(slots.iter().map(|s| s.player_id.as_deref()), "lineup")?;
    Ok(slots)
}

/// Returns the table in canonical order and whether it carries a DH.
fn normalize_field(entries: Vec<FieldAssignment>) -> Result<(Vec<FieldAssignment>, bool)> {
    let use_dh = entries
        .iter()
        .any(|f| f.position == Position::DesignatedHitter);
    let mut field = empty_field(use_dh);

    if entries.len() != field.len() {
        return Err(DugoutError::validation(
            "field_positions",
            format!(
                "Field must list each of the {} positions exactly once (got {} entries)",
                field.len(),
                entries.len()
            ),
        ));
    }
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.position) {
            return Err(DugoutError::validation(
                "field_positions",
                format!("Position {} is listed more than once", entry.position),
            ));
        }
        if let Some(target) = field.iter_mut().find(|f| f.position == entry.position) {
            target.player_id = entry.player_id;
        }
    }
    ensure_unique_players(field.iter().map(|f| f.player_id.as_deref()), "field_positions")?;
    Ok((field, use_dh))
}

fn ensure_unique_players<'a>(
    ids: impl Iterator<Item = Option<&'a str>>,
    field: &str,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for id in ids.flatten() {
        if !seen.insert(id) {
            return Err(DugoutError::validation(
                field,
                format!("Player {id} appears more than once"),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerStatus;
    use crate::position::{Bats, Throws};
    use dugout_core::store::MemoryStore;

    fn player(id: &str, primary: Position, secondaries: &[Position]) -> Player {
        Player {
            id: id.to_string(),
            name: format!("Player {id}"),
            number: None,
            primary_position: primary,
            secondary_positions: secondaries.to_vec(),
            bats: Bats::Right,
            throws: Throws::Right,
            status: PlayerStatus::Active,
            notes: String::new(),
        }
    }

    fn engine() -> (Arc<MemoryStore>, LineupEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = LineupEngine::load(store.clone()).unwrap();
        (store, engine)
    }

    fn slot(engine: &LineupEngine, n: u8) -> Option<&str> {
        engine.lineup()[usize::from(n - 1)].player_id.as_deref()
    }

    fn at(engine: &LineupEngine, pos: Position) -> Option<&str> {
        engine
            .field()
            .iter()
            .find(|f| f.position == pos)
            .and_then(|f| f.player_id.as_deref())
    }

    fn assert_no_duplicates(engine: &LineupEngine) {
        let mut seen = BTreeSet::new();
        for id in engine.lineup().iter().filter_map(|s| s.player_id.as_ref()) {
            assert!(seen.insert(id), "{id} twice in lineup");
        }
        let mut seen = BTreeSet::new();
        for id in engine.field().iter().filter_map(|f| f.player_id.as_ref()) {
            assert!(seen.insert(id), "{id} twice on field");
        }
    }

    #[test]
    fn load_defaults_when_documents_missing() {
        let (_, engine) = engine();
        assert_eq!(engine.lineup().len(), 9);
        assert_eq!(engine.field().len(), 9);
        assert!(!engine.use_dh());
        assert!(engine.lineup().iter().all(|s| s.player_id.is_none()));
    }

    #[test]
    fn assign_auto_places_at_primary() {
        let (_, mut engine) = engine();
        let alex = player("alex", Position::ShortStop, &[]);
        engine.assign_to_lineup(&alex, 3).unwrap();

        assert_eq!(slot(&engine, 3), Some("alex"));
        assert_eq!(at(&engine, Position::ShortStop), Some("alex"));
        assert_eq!(engine.lineup()[2].position, Some(Position::ShortStop));
    }

    #[test]
    fn auto_place_priority_order() {
        let (_, mut engine) = engine();
        let a = player("a", Position::ShortStop, &[]);
        let b = player("b", Position::ShortStop, &[Position::CenterField, Position::SecondBase]);
        let c = player("c", Position::ShortStop, &[Position::CenterField]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&b, 2).unwrap();
        engine.assign_to_lineup(&c, 3).unwrap();

        assert_eq!(at(&engine, Position::ShortStop), Some("a"));
        assert_eq!(at(&engine, Position::CenterField), Some("b"));
        // Primary and secondaries taken: first open defensive spot.
        assert_eq!(at(&engine, Position::Pitcher), Some("c"));
    }

    #[test]
    fn auto_place_falls_back_to_dh_when_field_full() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        for (i, pos) in DEFENSIVE_POSITIONS.iter().enumerate() {
            let p = player(&format!("f{i}"), *pos, &[]);
            engine.assign_to_field(&p, *pos).unwrap();
        }
        // Fielders filled slots 1-9 on the way in; free one slot for the hitter.
        engine.add_to_bench(&player("f8", Position::RightField, &[])).unwrap();
        let hitter = player("h", Position::FirstBase, &[]);
        engine.assign_to_lineup(&hitter, 9).unwrap();

        assert_eq!(at(&engine, Position::DesignatedHitter), Some("h"));
        assert_eq!(engine.lineup()[8].position, Some(Position::DesignatedHitter));
    }

    #[test]
    fn assign_swaps_when_player_already_batting() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        let b = player("b", Position::FirstBase, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&b, 5).unwrap();

        engine.assign_to_lineup(&a, 5).unwrap();
        assert_eq!(slot(&engine, 5), Some("a"));
        assert_eq!(slot(&engine, 1), Some("b"));
        assert_eq!(engine.lineup()[0].position, Some(Position::FirstBase));

        engine.assign_to_lineup(&a, 7).unwrap();
        assert_eq!(slot(&engine, 7), Some("a"));
        assert_eq!(slot(&engine, 5), None);
        // Both keep their field spots.
        assert_eq!(at(&engine, Position::Catcher), Some("a"));
        assert_eq!(at(&engine, Position::FirstBase), Some("b"));
    }

    #[test]
    fn displaced_batter_with_nowhere_to_go_leaves_field() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        let b = player("b", Position::FirstBase, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&b, 1).unwrap();

        assert_eq!(slot(&engine, 1), Some("b"));
        assert_eq!(at(&engine, Position::Catcher), None);
        assert_eq!(at(&engine, Position::FirstBase), Some("b"));
    }

    #[test]
    fn assign_then_remove_restores_slot() {
        for n in 1..=9 {
            let (_, mut engine) = engine();
            let before = engine.lineup()[usize::from(n - 1)].clone();
            let p = player("p", Position::LeftField, &[]);
            engine.assign_to_lineup(&p, n).unwrap();
            engine.remove_from_lineup(n).unwrap();
            assert_eq!(engine.lineup()[usize::from(n - 1)], before);
            assert_eq!(at(&engine, Position::LeftField), None);
        }
    }

    #[test]
    fn out_of_range_slots_rejected() {
        let (_, mut engine) = engine();
        let p = player("p", Position::LeftField, &[]);
        assert!(matches!(
            engine.assign_to_lineup(&p, 0),
            Err(DugoutError::Validation { .. })
        ));
        assert!(engine.assign_to_lineup(&p, 10).is_err());
        assert!(engine.remove_from_lineup(10).is_err());
        assert!(engine.reorder_lineup(1, 12).is_err());
        assert!(engine.lineup().iter().all(|s| s.player_id.is_none()));
    }

    #[test]
    fn dh_position_rejected_while_dh_off() {
        let (_, mut engine) = engine();
        let p = player("p", Position::DesignatedHitter, &[]);
        let err = engine
            .assign_to_field(&p, Position::DesignatedHitter)
            .unwrap_err();
        assert!(matches!(err, DugoutError::Validation { .. }));
        assert!(engine.remove_from_field(Position::DesignatedHitter).is_err());
    }

    #[test]
    fn reorder_swaps_contents_not_field() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        engine.assign_to_lineup(&a, 2).unwrap();
        let field_before = engine.field().to_vec();

        engine.reorder_lineup(2, 8).unwrap();
        assert_eq!(slot(&engine, 8), Some("a"));
        assert_eq!(engine.lineup()[7].position, Some(Position::Catcher));
        assert_eq!(slot(&engine, 2), None);
        assert_eq!(engine.lineup()[1].position, None);
        assert_eq!(engine.field(), field_before.as_slice());
    }

    #[test]
    fn assign_to_field_fills_first_empty_slot() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        let b = player("b", Position::Pitcher, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_field(&b, Position::Pitcher).unwrap();

        assert_eq!(at(&engine, Position::Pitcher), Some("b"));
        assert_eq!(slot(&engine, 2), Some("b"));
        assert_eq!(engine.lineup()[1].position, None);
    }

    #[test]
    fn assign_to_field_swaps_and_keeps_displaced_batting() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        let b = player("b", Position::FirstBase, &[]);
        let c = player("c", Position::ThirdBase, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&b, 2).unwrap();
        engine.assign_to_lineup(&c, 3).unwrap();

        // a moves onto b's spot; b takes a's old spot.
        engine.assign_to_field(&a, Position::FirstBase).unwrap();
        assert_eq!(at(&engine, Position::FirstBase), Some("a"));
        assert_eq!(at(&engine, Position::Catcher), Some("b"));

        // c is not fielding after being displaced, but still bats.
        let d = player("d", Position::ThirdBase, &[]);
        engine.assign_to_field(&d, Position::ThirdBase).unwrap();
        assert_eq!(at(&engine, Position::ThirdBase), Some("d"));
        assert_eq!(slot(&engine, 3), Some("c"));
        assert_no_duplicates(&engine);
    }

    #[test]
    fn assign_to_field_retags_batting_slots() {
        let (_, mut engine) = engine();
        let a = player("a", Position::ShortStop, &[]);
        let b = player("b", Position::CenterField, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&b, 2).unwrap();
        assert_eq!(engine.lineup()[0].position, Some(Position::ShortStop));

        // Moving a batter follows them into their slot.
        engine.assign_to_field(&a, Position::LeftField).unwrap();
        assert_eq!(engine.lineup()[0].position, Some(Position::LeftField));

        // Swapping with an occupant retags both slots.
        engine.assign_to_field(&a, Position::CenterField).unwrap();
        assert_eq!(engine.lineup()[0].position, Some(Position::CenterField));
        assert_eq!(at(&engine, Position::LeftField), Some("b"));
        assert_eq!(engine.lineup()[1].position, Some(Position::LeftField));

        // A displaced batter stays in the order without a position.
        let c = player("c", Position::LeftField, &[]);
        engine.assign_to_field(&c, Position::LeftField).unwrap();
        assert_eq!(slot(&engine, 2), Some("b"));
        assert_eq!(engine.lineup()[1].position, None);
        assert_eq!(slot(&engine, 3), Some("c"));
    }

    #[test]
    fn assign_to_field_leaves_bench_alone() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        engine.add_to_bench(&a).unwrap();
        engine.assign_to_field(&a, Position::Catcher).unwrap();
        assert!(engine.state().bench.contains("a"));

        engine.assign_to_lineup(&a, 4).unwrap();
        assert!(!engine.state().bench.contains("a"));
    }

    #[test]
    fn remove_from_field_cascades_to_lineup() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        engine.assign_to_lineup(&a, 6).unwrap();
        engine.remove_from_field(Position::Catcher).unwrap();
        assert_eq!(slot(&engine, 6), None);
        assert_eq!(at(&engine, Position::Catcher), None);
    }

    #[test]
    fn bench_clears_slot_but_not_field() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.add_to_bench(&a).unwrap();

        assert_eq!(slot(&engine, 1), None);
        assert_eq!(at(&engine, Position::Catcher), Some("a"));
        assert!(engine.state().bench.contains("a"));
    }

    #[test]
    fn dh_off_gives_slot_to_pitcher_and_on_restores() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        assert_eq!(engine.field().len(), 10);

        let pitcher = player("pitch", Position::Pitcher, &[]);
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_field(&pitcher, Position::Pitcher).unwrap();
        engine.add_to_bench(&pitcher).unwrap(); // pitcher does not bat
        engine.assign_to_lineup(&dh, 4).unwrap();
        assert_eq!(at(&engine, Position::DesignatedHitter), Some("dh"));

        engine.set_dh(false).unwrap();
        assert_eq!(engine.field().len(), 9);
        assert_eq!(slot(&engine, 4), Some("pitch"));
        assert_eq!(engine.lineup()[3].position, Some(Position::Pitcher));
        assert_eq!(engine.state().remembered_dh.as_deref(), Some("dh"));

        engine.set_dh(true).unwrap();
        assert_eq!(at(&engine, Position::DesignatedHitter), Some("dh"));
        assert_eq!(slot(&engine, 1), Some("dh"));
        assert_no_duplicates(&engine);
    }

    #[test]
    fn dh_off_without_pitcher_leaves_slot_empty() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_lineup(&dh, 2).unwrap();

        engine.set_dh(false).unwrap();
        assert_eq!(slot(&engine, 2), None);
    }

    #[test]
    fn dh_off_when_pitcher_already_bats_clears_slot() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        let pitcher = player("pitch", Position::Pitcher, &[]);
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_lineup(&pitcher, 1).unwrap();
        engine.assign_to_lineup(&dh, 2).unwrap();

        engine.set_dh(false).unwrap();
        assert_eq!(slot(&engine, 1), Some("pitch"));
        assert_eq!(slot(&engine, 2), None);
        assert_no_duplicates(&engine);
    }

    #[test]
    fn dh_round_trip_without_edits_restores_dh_player() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_lineup(&dh, 5).unwrap();

        engine.set_dh(false).unwrap();
        engine.set_dh(true).unwrap();
        assert_eq!(at(&engine, Position::DesignatedHitter), Some("dh"));
        assert_eq!(slot(&engine, 1), Some("dh"));
    }

    #[test]
    fn clear_lineup_and_field() {
        let (_, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        let b = player("b", Position::FirstBase, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.add_to_bench(&b).unwrap();

        engine.clear_lineup().unwrap();
        assert!(engine.lineup().iter().all(|s| s.player_id.is_none()));
        assert!(engine.state().bench.is_empty());
        assert_eq!(at(&engine, Position::Catcher), Some("a"));

        engine.set_dh(true).unwrap();
        engine.clear_field().unwrap();
        assert_eq!(engine.field().len(), 10);
        assert!(engine.field().iter().all(|f| f.player_id.is_none()));
    }

    #[test]
    fn failed_write_rolls_back_memory() {
        let (store, mut engine) = engine();
        let a = player("a", Position::Catcher, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        let before = engine.state().clone();

        store.set_fail_writes(true);
        let b = player("b", Position::FirstBase, &[]);
        let err = engine.assign_to_lineup(&b, 2).unwrap_err();
        assert!(matches!(err, DugoutError::Persistence(_)));
        assert_eq!(engine.state(), &before);

        assert!(engine.set_dh(true).is_err());
        assert!(!engine.use_dh());
    }

    #[test]
    fn state_survives_reload() {
        let (store, mut engine) = engine();
        engine.set_dh(true).unwrap();
        let a = player("a", Position::Catcher, &[]);
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_lineup(&a, 1).unwrap();
        engine.assign_to_lineup(&dh, 2).unwrap();

        let reloaded = LineupEngine::load(store).unwrap();
        assert!(reloaded.use_dh());
        assert_eq!(reloaded.lineup(), engine.lineup());
        assert_eq!(reloaded.field(), engine.field());
    }

    #[test]
    fn replace_lineup_validates_shape() {
        let (_, mut engine) = engine();
        let mut slots = empty_lineup();
        slots.pop();
        assert!(engine.replace_lineup(slots).is_err());

        let mut slots = empty_lineup();
        slots[8].slot_number = 1;
        assert!(engine.replace_lineup(slots).is_err());

        let mut slots = empty_lineup();
        slots[0].player_id = Some("a".into());
        slots[4].player_id = Some("a".into());
        assert!(engine.replace_lineup(slots).is_err());

        let mut slots = empty_lineup();
        slots.reverse();
        slots[0].player_id = Some("z".into());
        engine.replace_lineup(slots).unwrap();
        assert_eq!(slot(&engine, 9), Some("z"));
    }

    #[test]
    fn replace_field_sets_dh_flag() {
        let (_, mut engine) = engine();
        let mut entries = empty_field(true);
        entries[9].player_id = Some("dh".into());
        engine.replace_field(entries).unwrap();
        assert!(engine.use_dh());
        assert_eq!(at(&engine, Position::DesignatedHitter), Some("dh"));

        let mut entries = empty_field(false);
        entries[0].position = Position::Catcher;
        assert!(engine.replace_field(entries).is_err());
        assert!(engine.replace_field(empty_field(false)[..8].to_vec()).is_err());
    }

    #[test]
    fn load_snapshot_reconciles_dh_flag() {
        let (_, mut engine) = engine();
        let mut lineup = empty_lineup();
        lineup[0].player_id = Some("a".into());
        let snapshot = LineupSnapshot {
            lineup,
            field_positions: empty_field(false),
            use_dh: true,
        };
        engine.load_snapshot(snapshot).unwrap();
        assert!(engine.use_dh());
        assert_eq!(engine.field().len(), 10);
        assert_eq!(slot(&engine, 1), Some("a"));
    }

    #[test]
    fn purge_player_clears_everything() {
        let (_, mut engine) = engine();
        engine.set_dh(true).unwrap();
        let dh = player("dh", Position::DesignatedHitter, &[]);
        engine.assign_to_lineup(&dh, 1).unwrap();
        engine.set_dh(false).unwrap();
        let a = player("a", Position::Catcher, &[]);
        engine.assign_to_lineup(&a, 2).unwrap();
        engine.add_to_bench(&a).unwrap();

        engine.purge_player("a").unwrap();
        engine.purge_player("dh").unwrap();
        assert!(!engine.state().bench.contains("a"));
        assert_eq!(at(&engine, Position::Catcher), None);
        assert!(engine.state().remembered_dh.is_none());
    }

    #[test]
    fn position_fit_classification() {
        let p = player("p", Position::ShortStop, &[Position::SecondBase]);
        assert_eq!(position_fit(&p, Position::ShortStop), PositionFit::Primary);
        assert_eq!(position_fit(&p, Position::SecondBase), PositionFit::Secondary);
        assert_eq!(position_fit(&p, Position::Catcher), PositionFit::OutOfPosition);
    }

    #[test]
    fn command_serde_shape() {
        let cmd: LineupCommand =
            serde_json::from_str(r#"{"op":"assign_to_field","player_id":"a","position":"CF"}"#)
                .unwrap();
        assert_eq!(
            cmd,
            LineupCommand::AssignToField {
                player_id: "a".into(),
                position: Position::CenterField
            }
        );
        let cmd: LineupCommand = serde_json::from_str(r#"{"op":"clear_lineup"}"#).unwrap();
        assert_eq!(cmd, LineupCommand::ClearLineup);
    }

    #[test]
    fn random_sequences_never_duplicate_players() {
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"];
        let players: Vec<Player> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let primary = DEFENSIVE_POSITIONS[i % DEFENSIVE_POSITIONS.len()];
                player(id, primary, &[DEFENSIVE_POSITIONS[(i + 3) % 9]])
            })
            .collect();

        let (_, mut engine) = engine();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = |m: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % m
        };

        for _ in 0..2000 {
            let p = &players[next(players.len() as u64) as usize];
            let s = next(9) as u8 + 1;
            let pos = if engine.use_dh() && next(10) == 0 {
                Position::DesignatedHitter
            } else {
                DEFENSIVE_POSITIONS[next(9) as usize]
            };
            match next(8) {
                0 => engine.assign_to_lineup(p, s).unwrap(),
                1 => engine.remove_from_lineup(s).unwrap(),
                2 => engine.reorder_lineup(s, next(9) as u8 + 1).unwrap(),
                3 => engine.assign_to_field(p, pos).unwrap(),
                4 => engine.remove_from_field(pos).unwrap(),
                5 => engine.add_to_bench(p).unwrap(),
                6 => engine.set_dh(!engine.use_dh()).unwrap(),
                _ => engine.assign_to_lineup(p, s).unwrap(),
            }
            assert_no_duplicates(&engine);
        }
    }
}
