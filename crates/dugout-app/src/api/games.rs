use dugout_baseball::schedule::{BulkStatLines, Game, GameUpdate, NewGame};
use dugout_baseball::stats::GameStatLine;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Most recent first.
#[get("/games")]
pub async fn list_games(state: &State<SharedState>) -> Json<Vec<Game>> {
    let st = state.lock().await;
    Json(st.schedule.list().into_iter().cloned().collect())
}

#[post("/games", data = "<body>")]
pub async fn create_game(
    state: &State<SharedState>,
    body: Json<NewGame>,
) -> ApiResult<(Status, Json<Game>)> {
    let mut st = state.lock().await;
    let game = st.schedule.add(body.into_inner())?;
    Ok((Status::Created, Json(game)))
}

#[get("/games/<id>")]
pub async fn get_game(state: &State<SharedState>, id: &str) -> ApiResult<Json<Game>> {
    let st = state.lock().await;
    Ok(Json(st.schedule.require(id)?.clone()))
}

#[put("/games/<id>", data = "<body>")]
pub async fn update_game(
    state: &State<SharedState>,
    id: &str,
    body: Json<GameUpdate>,
) -> ApiResult<Json<Game>> {
    let mut st = state.lock().await;
    Ok(Json(st.schedule.update(id, body.into_inner())?))
}

#[delete("/games/<id>")]
pub async fn delete_game(state: &State<SharedState>, id: &str) -> ApiResult<Status> {
    let mut st = state.lock().await;
    st.delete_game(id)?;
    Ok(Status::NoContent)
}

#[get("/games/<id>/stats")]
pub async fn game_stats(state: &State<SharedState>, id: &str) -> ApiResult<Json<Vec<GameStatLine>>> {
    let st = state.lock().await;
    st.schedule.require(id)?;
    Ok(Json(st.stats.by_game(id).into_iter().cloned().collect()))
}

/// Insert or replace stat lines for a game, returning every line now stored
/// for it.
#[post("/games/<id>/stats", data = "<body>")]
pub async fn upsert_game_stats(
    state: &State<SharedState>,
    id: &str,
    body: Json<BulkStatLines>,
) -> ApiResult<Json<Vec<GameStatLine>>> {
    let body = body.into_inner();
    if let Some(body_id) = body.game_id.as_deref() {
        if body_id != id {
            return Err(ApiError::BadRequest(format!(
                "Game ID in body ({body_id}) does not match the URL ({id})"
            )));
        }
    }

    let mut guard = state.lock().await;
    let st = &mut *guard;
    let game = st.schedule.require(id)?.clone();
    Ok(Json(st.stats.upsert_bulk(&game, body.stats, &st.roster)?))
}
