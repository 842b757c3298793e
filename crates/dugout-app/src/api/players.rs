use dugout_baseball::player::{NewPlayer, Player, PlayerStatus, PlayerUpdate};
use dugout_baseball::stats::{aggregate, GameStatLine, SeasonStats};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

#[get("/players?<status>")]
pub async fn list_players(
    state: &State<SharedState>,
    status: Option<&str>,
) -> ApiResult<Json<Vec<Player>>> {
    let filter = match status {
        Some(raw) => Some(PlayerStatus::from_str_status(raw).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown status '{raw}'; expected active, inactive or archived"
            ))
        })?),
        None => None,
    };
    let st = state.lock().await;
    Ok(Json(st.roster.list(filter).into_iter().cloned().collect()))
}

#[post("/players", data = "<body>")]
pub async fn create_player(
    state: &State<SharedState>,
    body: Json<NewPlayer>,
) -> ApiResult<(Status, Json<Player>)> {
    let mut st = state.lock().await;
    let player = st.roster.add(body.into_inner())?;
    Ok((Status::Created, Json(player)))
}

#[get("/players/<id>")]
pub async fn get_player(state: &State<SharedState>, id: &str) -> ApiResult<Json<Player>> {
    let st = state.lock().await;
    Ok(Json(st.roster.require(id)?.clone()))
}

#[put("/players/<id>", data = "<body>")]
pub async fn update_player(
    state: &State<SharedState>,
    id: &str,
    body: Json<PlayerUpdate>,
) -> ApiResult<Json<Player>> {
    let mut st = state.lock().await;
    Ok(Json(st.roster.update(id, body.into_inner())?))
}

#[delete("/players/<id>")]
pub async fn delete_player(state: &State<SharedState>, id: &str) -> ApiResult<Status> {
    let mut st = state.lock().await;
    st.delete_player(id)?;
    Ok(Status::NoContent)
}

/// Every stat line for a player, most recent game first.
#[get("/players/<id>/stats")]
pub async fn player_stats(
    state: &State<SharedState>,
    id: &str,
) -> ApiResult<Json<Vec<GameStatLine>>> {
    let st = state.lock().await;
    st.roster.require(id)?;
    Ok(Json(
        st.stats
            .by_player(id, &st.schedule)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

#[get("/players/<id>/stats/season")]
pub async fn season_stats(state: &State<SharedState>, id: &str) -> ApiResult<Json<SeasonStats>> {
    let st = state.lock().await;
    st.roster.require(id)?;
    let lines: Vec<GameStatLine> = st
        .stats
        .by_player(id, &st.schedule)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(aggregate(id, &lines)))
}
