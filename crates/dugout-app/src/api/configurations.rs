use dugout_baseball::configurations::{GameConfiguration, NewConfiguration};
use dugout_baseball::lineup::LineupSnapshot;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};

use crate::api::error::ApiResult;
use crate::api::lineup::LineupStateView;
use crate::state::SharedState;

#[get("/configurations")]
pub async fn list_configurations(state: &State<SharedState>) -> Json<Vec<GameConfiguration>> {
    let st = state.lock().await;
    Json(st.configurations.list().to_vec())
}

/// Save a named configuration. Tables missing from the body are taken from
/// the current lineup and field.
#[post("/configurations", data = "<body>")]
pub async fn create_configuration(
    state: &State<SharedState>,
    body: Json<NewConfiguration>,
) -> ApiResult<(Status, Json<GameConfiguration>)> {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let body = body.into_inner();

    let current = st.lineup.snapshot();
    let lineup = body.lineup.unwrap_or(current.lineup);
    let field_positions = body.field_positions.unwrap_or(current.field_positions);
    for id in lineup
        .iter()
        .filter_map(|s| s.player_id.as_deref())
        .chain(field_positions.iter().filter_map(|f| f.player_id.as_deref()))
    {
        st.roster.require(id)?;
    }
    let snapshot = LineupSnapshot {
        lineup,
        field_positions,
        use_dh: body.use_dh.unwrap_or(current.use_dh),
    };

    let saved = st.configurations.save(&body.name, body.notes, snapshot)?;
    Ok((Status::Created, Json(saved)))
}

#[get("/configurations/<id>")]
pub async fn get_configuration(
    state: &State<SharedState>,
    id: &str,
) -> ApiResult<Json<GameConfiguration>> {
    let st = state.lock().await;
    Ok(Json(st.configurations.require(id)?.clone()))
}

#[delete("/configurations/<id>")]
pub async fn delete_configuration(state: &State<SharedState>, id: &str) -> ApiResult<Status> {
    let mut st = state.lock().await;
    st.configurations.delete(id)?;
    Ok(Status::NoContent)
}

/// Apply a saved configuration to the lineup and field.
#[post("/configurations/<id>/load")]
pub async fn load_configuration(
    state: &State<SharedState>,
    id: &str,
) -> ApiResult<Json<LineupStateView>> {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let config = st.configurations.load_config(id)?;
    st.lineup.load_snapshot(config.snapshot())?;
    Ok(Json(LineupStateView::from_app(st)))
}
