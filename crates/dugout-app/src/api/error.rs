use dugout_baseball::DugoutError;
use dugout_core::store::StoreError;
use dugout_llm::AdvisoryError;
use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{catch, Request, Response};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DugoutError),

    #[error(transparent)]
    Advisory(#[from] AdvisoryError),

    #[error("failed to save changes: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Domain(DugoutError::Validation { .. }) => Status::BadRequest,
            ApiError::Domain(DugoutError::NotFound { .. }) => Status::NotFound,
            ApiError::Domain(DugoutError::Persistence(_)) | ApiError::Store(_) => {
                Status::InternalServerError
            }
            ApiError::Advisory(AdvisoryError::InvalidSettings { .. }) => Status::BadRequest,
            ApiError::Advisory(_) => Status::ServiceUnavailable,
            ApiError::BadRequest(_) => Status::BadRequest,
        }
    }
}

fn detail_response<'o>(status: Status, detail: &str) -> rocket::response::Result<'o> {
    let rendered = serde_json::json!({ "detail": detail }).to_string();
    Response::build()
        .status(status)
        .header(ContentType::JSON)
        .sized_body(rendered.len(), std::io::Cursor::new(rendered))
        .ok()
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!(path = %req.uri().path(), "request failed: {self}");
        } else {
            debug!(path = %req.uri().path(), status = status.code, "request rejected: {self}");
        }
        detail_response(status, &self.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ----- catchers -----

/// JSON bodies for errors raised by Rocket itself (unknown routes, bodies
/// that fail to decode).
pub struct CatcherBody(Status, &'static str);

impl<'r, 'o: 'r> Responder<'r, 'o> for CatcherBody {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        detail_response(self.0, self.1)
    }
}

#[catch(400)]
pub fn bad_request() -> CatcherBody {
    CatcherBody(Status::BadRequest, "Bad request")
}

#[catch(404)]
pub fn not_found() -> CatcherBody {
    CatcherBody(Status::NotFound, "Not found")
}

#[catch(422)]
pub fn unprocessable() -> CatcherBody {
    CatcherBody(
        Status::UnprocessableEntity,
        "Request body is missing required fields or has invalid values",
    )
}

#[catch(500)]
pub fn internal_error() -> CatcherBody {
    CatcherBody(Status::InternalServerError, "Internal server error")
}

pub fn catchers() -> Vec<rocket::Catcher> {
    rocket::catchers![bad_request, not_found, unprocessable, internal_error]
}
