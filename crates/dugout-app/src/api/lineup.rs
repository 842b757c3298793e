use std::collections::BTreeSet;

use dugout_baseball::lineup::{FieldAssignment, FieldFit, LineupCommand, LineupSlot};
use rocket::serde::json::Json;
use rocket::{get, post, put, State};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::state::{AppState, SharedState};

#[derive(Debug, Deserialize)]
pub struct LineupUpdate {
    pub lineup: Vec<LineupSlot>,
}

#[derive(Debug, Deserialize)]
pub struct FieldUpdate {
    pub field_positions: Vec<FieldAssignment>,
}

/// Both tables plus bench, DH flag and position fit for each fielder.
#[derive(Debug, Serialize)]
pub struct LineupStateView {
    pub lineup: Vec<LineupSlot>,
    pub field_positions: Vec<FieldAssignment>,
    pub bench: BTreeSet<String>,
    pub use_dh: bool,
    pub fits: Vec<FieldFit>,
}

impl LineupStateView {
    pub fn from_app(st: &AppState) -> Self {
        let engine = st.lineup.state();
        Self {
            lineup: engine.lineup.clone(),
            field_positions: engine.field.clone(),
            bench: engine.bench.clone(),
            use_dh: engine.use_dh,
            fits: st.lineup.field_fits(&st.roster),
        }
    }
}

fn require_players<'a>(
    st: &AppState,
    ids: impl Iterator<Item = &'a Option<String>>,
) -> ApiResult<()> {
    for id in ids.flatten() {
        st.roster.require(id)?;
    }
    Ok(())
}

#[get("/lineup")]
pub async fn get_lineup(state: &State<SharedState>) -> Json<Vec<LineupSlot>> {
    let st = state.lock().await;
    Json(st.lineup.lineup().to_vec())
}

#[put("/lineup", data = "<body>")]
pub async fn put_lineup(
    state: &State<SharedState>,
    body: Json<LineupUpdate>,
) -> ApiResult<Json<Vec<LineupSlot>>> {
    let mut st = state.lock().await;
    let body = body.into_inner();
    require_players(&st, body.lineup.iter().map(|s| &s.player_id))?;
    st.lineup.replace_lineup(body.lineup)?;
    Ok(Json(st.lineup.lineup().to_vec()))
}

#[get("/field")]
pub async fn get_field(state: &State<SharedState>) -> Json<Vec<FieldAssignment>> {
    let st = state.lock().await;
    Json(st.lineup.field().to_vec())
}

#[put("/field", data = "<body>")]
pub async fn put_field(
    state: &State<SharedState>,
    body: Json<FieldUpdate>,
) -> ApiResult<Json<Vec<FieldAssignment>>> {
    let mut st = state.lock().await;
    let body = body.into_inner();
    require_players(&st, body.field_positions.iter().map(|f| &f.player_id))?;
    st.lineup.replace_field(body.field_positions)?;
    Ok(Json(st.lineup.field().to_vec()))
}

#[get("/lineup/state")]
pub async fn lineup_state(state: &State<SharedState>) -> Json<LineupStateView> {
    let st = state.lock().await;
    Json(LineupStateView::from_app(&st))
}

/// Run one engine operation and return the resulting state.
#[post("/lineup/commands", data = "<command>")]
pub async fn lineup_command(
    state: &State<SharedState>,
    command: Json<LineupCommand>,
) -> ApiResult<Json<LineupStateView>> {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    st.lineup.apply(command.into_inner(), &st.roster)?;
    Ok(Json(LineupStateView::from_app(st)))
}
