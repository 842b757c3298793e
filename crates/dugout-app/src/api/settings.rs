use dugout_llm::settings::{AiSettingsUpdate, AiSettingsView};
use rocket::serde::json::Json;
use rocket::{get, put, State};
use tracing::info;

use crate::api::error::ApiResult;
use crate::state::SharedState;

#[get("/settings/ai")]
pub async fn get_ai_settings(state: &State<SharedState>) -> Json<AiSettingsView> {
    let st = state.lock().await;
    Json(st.ai_settings.view())
}

/// Switch provider or change URL, model or keys. Keys left out are kept; an
/// empty string clears one.
#[put("/settings/ai", data = "<body>")]
pub async fn update_ai_settings(
    state: &State<SharedState>,
    body: Json<AiSettingsUpdate>,
) -> ApiResult<Json<AiSettingsView>> {
    let mut st = state.lock().await;
    let next = st.ai_settings.updated(body.into_inner())?;
    st.apply_ai_settings(next)?;
    info!(provider = %st.ai_settings.provider, "AI settings updated");
    Ok(Json(st.ai_settings.view()))
}
