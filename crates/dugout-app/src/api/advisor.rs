// Coaching advisor endpoints: one-shot analysis and the streaming chat.
//
// The state lock is only held to build a request or fold an event into the
// chat session, never while waiting on the provider.

use chrono::{DateTime, Utc};
use dugout_llm::event::{ChatMessage, ChatRequest};
use dugout_llm::prompt::{analysis_request, chat_system_prompt};
use dugout_llm::session::{ChatStatus, ChatUpdate};
use dugout_llm::{AdvisoryClient, AdvisoryError};
use rocket::http::Status;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Include the current lineup and field in the system prompt.
    #[serde(default = "default_true")]
    pub include_context: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryView {
    pub history: Vec<ChatMessage>,
    pub status: ChatStatus,
    pub streaming: bool,
    pub partial: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

fn require_active(advisor: &AdvisoryClient) -> ApiResult<()> {
    match advisor {
        AdvisoryClient::Active(_) => Ok(()),
        AdvisoryClient::Disabled(reason) => {
            Err(AdvisoryError::Unavailable(reason.clone()).into())
        }
    }
}

/// Ask for observations on the current lineup and field, optionally around a
/// specific question. The advisor offers perspective, never decisions.
#[post("/advisor/analyze", data = "<body>")]
pub async fn analyze(
    state: &State<SharedState>,
    body: Option<Json<AnalyzeRequest>>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let question = body.and_then(|b| b.into_inner().question);

    let (advisor, request) = {
        let st = state.lock().await;
        require_active(&st.advisor)?;
        let request = analysis_request(
            &st.lineup_context(),
            question.as_deref(),
            st.config.ai.max_tokens,
        );
        (st.advisor.clone(), request)
    };

    let analysis = advisor.complete(request).await?;
    Ok(Json(AnalyzeResponse {
        analysis,
        timestamp: Utc::now(),
    }))
}

/// Start a chat turn and stream the reply as server-sent events: `token`
/// for each chunk, then `done` with the full reply or `error`.
#[post("/advisor/chat/stream", data = "<body>")]
pub async fn chat_stream(
    state: &State<SharedState>,
    body: Json<ChatStreamRequest>,
) -> ApiResult<EventStream![]> {
    let body = body.into_inner();
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".into()));
    }

    let shared = state.inner().clone();
    let (tx, mut rx) = mpsc::channel(256);
    let generation = {
        let mut guard = shared.lock().await;
        let st = &mut *guard;
        require_active(&st.advisor)?;

        let system = if body.include_context {
            chat_system_prompt(Some(&st.lineup_context()))
        } else {
            chat_system_prompt(None)
        };
        let (generation, messages) = st.chat.begin(message);
        let request = ChatRequest {
            system,
            messages,
            model: body.model,
            max_tokens: st.config.ai.max_tokens,
        };
        let handle = st.advisor.spawn_stream(request, tx, generation);
        st.chat.attach_task(generation, handle);
        info!("Started chat turn (gen: {})", generation);
        generation
    };
    let turn = TurnGuard {
        shared: shared.clone(),
        generation,
    };

    Ok(EventStream! {
        let _turn = turn;
        while let Some(event) = rx.recv().await {
            let update = shared.lock().await.chat.apply(event);
            match update {
                ChatUpdate::Token(text) => yield Event::data(text).event("token"),
                ChatUpdate::Completed(full_text) => {
                    yield Event::data(full_text).event("done");
                    break;
                }
                ChatUpdate::Failed(message) => {
                    yield Event::data(message).event("error");
                    break;
                }
                ChatUpdate::Stale => break,
            }
        }
    })
}

/// Cancels its chat turn when the event stream is dropped. A turn that
/// already finished or was superseded is not affected.
struct TurnGuard {
    shared: SharedState,
    generation: u64,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = self.shared.clone();
        let generation = self.generation;
        runtime.spawn(async move {
            if shared.lock().await.chat.cancel_if(generation) {
                info!("Chat stream closed mid-turn (gen: {})", generation);
            }
        });
    }
}

#[post("/advisor/chat/cancel")]
pub async fn chat_cancel(state: &State<SharedState>) -> Json<CancelResponse> {
    let mut st = state.lock().await;
    Json(CancelResponse {
        cancelled: st.chat.cancel(),
    })
}

#[get("/advisor/chat/history")]
pub async fn chat_history(state: &State<SharedState>) -> Json<ChatHistoryView> {
    let st = state.lock().await;
    Json(ChatHistoryView {
        history: st.chat.history().to_vec(),
        status: st.chat.status(),
        streaming: st.chat.is_streaming(),
        partial: st.chat.partial().map(str::to_string),
        last_error: st.chat.last_error().map(str::to_string),
    })
}

#[delete("/advisor/chat/history")]
pub async fn clear_chat_history(state: &State<SharedState>) -> Status {
    let mut st = state.lock().await;
    st.chat.clear();
    Status::NoContent
}
