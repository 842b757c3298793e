// HTTP API served to the lineup UI.

pub mod advisor;
pub mod configurations;
pub mod error;
pub mod games;
pub mod lineup;
pub mod players;
pub mod settings;

use dugout_core::config::{AiProvider, ServerConfig};
use rocket::fairing::AdHoc;
use rocket::serde::json::Json;
use rocket::{get, Build, Rocket, State};
use rocket_cors::{AllowedOrigins, CorsOptions};
use serde::Serialize;
use tracing::info;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct RootInfo {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub api: &'static str,
    pub provider: AiProvider,
    pub model: String,
    pub connected: bool,
    pub models: Vec<String>,
    pub model_available: bool,
}

#[get("/")]
pub async fn index() -> Json<RootInfo> {
    Json(RootInfo {
        status: "ok",
        message: "Dugout lineup manager API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// API status plus whether the advisory provider can be reached.
#[get("/health")]
pub async fn health(state: &State<SharedState>) -> Json<HealthReport> {
    let (advisor, provider, model) = {
        let st = state.lock().await;
        (
            st.advisor.clone(),
            st.ai_settings.provider,
            st.ai_settings.preferred_model.clone(),
        )
    };

    let connected = advisor.check_connection().await;
    let models = if connected {
        advisor.list_models().await
    } else {
        Vec::new()
    };
    // Cloud providers do not list models; a configured key is enough.
    let model_available = connected && (models.is_empty() || models.contains(&model));

    Json(HealthReport {
        api: "ok",
        provider,
        model,
        connected,
        models,
        model_available,
    })
}

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![
        index,
        health,
        players::list_players,
        players::create_player,
        players::get_player,
        players::update_player,
        players::delete_player,
        players::player_stats,
        players::season_stats,
        lineup::get_lineup,
        lineup::put_lineup,
        lineup::get_field,
        lineup::put_field,
        lineup::lineup_state,
        lineup::lineup_command,
        configurations::list_configurations,
        configurations::create_configuration,
        configurations::get_configuration,
        configurations::delete_configuration,
        configurations::load_configuration,
        games::list_games,
        games::create_game,
        games::get_game,
        games::update_game,
        games::delete_game,
        games::game_stats,
        games::upsert_game_stats,
        advisor::analyze,
        advisor::chat_stream,
        advisor::chat_cancel,
        advisor::chat_history,
        advisor::clear_chat_history,
        settings::get_ai_settings,
        settings::update_ai_settings,
    ]
}

/// Assemble the Rocket instance: routes, JSON catchers, CORS for the UI
/// origins and per-request logging.
pub fn build_rocket(state: SharedState, server: &ServerConfig) -> anyhow::Result<Rocket<Build>> {
    let figment = rocket::Config::figment()
        .merge(("address", server.address.clone()))
        .merge(("port", server.port))
        .merge(("log_level", "critical"));

    let cors = CorsOptions {
        allowed_origins: AllowedOrigins::some_exact(&server.cors_origins),
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()
    .map_err(|e| anyhow::anyhow!("invalid CORS configuration: {e}"))?;

    Ok(rocket::custom(figment)
        .manage(state)
        .attach(cors)
        .attach(AdHoc::on_response("Request logging", |req, res| {
            Box::pin(async move {
                info!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    status = res.status().code,
                    "request"
                );
            })
        }))
        .mount("/", routes())
        .register("/", error::catchers()))
}
