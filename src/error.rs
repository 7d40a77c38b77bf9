use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Parsing errors
    #[error("{0}")]
    ParsingError(String),
    // Lookups and state conflicts
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    // Email client errors
    #[error("Failed to send email: {0}")]
    SendEmailError(#[from] reqwest::Error),
    // Database errors
    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

pub type RestResult<T> = std::result::Result<T, RestError>;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Parse Error: {0}")]
    ParseError(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl From<Error> for RestError {
    fn from(e: Error) -> Self {
        match e {
            Error::ParsingError(msg) => Self::ParseError(msg),
            Error::NotFound(what) => Self::NotFound(what.into()),
            Error::Conflict(msg) => Self::Conflict(msg),
            Error::SendEmailError(e) => {
                tracing::error!(error.cause_chain = ?e, "Email provider request failed");
                Self::InternalError("Failed to send email".into())
            }
            Error::DatabaseError(e) => {
                tracing::error!(error.cause_chain = ?e, "Database request failed");
                Self::InternalError("Database error".into())
            }
        }
    }
}

impl ResponseError for RestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ParseError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
        }))
    }
}
