use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("No such room: {0}")]
    NoSuchRoom(String),

    #[error("No such file: {0}")]
    NoSuchFile(i64),

    #[error("No such user: {0}")]
    NoSuchUser(String),

    #[error("No such post: {0}")]
    NoSuchPost(i64),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied")]
    BadPermission,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Post rejected: {0}")]
    PostRejected(String),

    #[error("Post rejected: rate limited")]
    PostRateLimited,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// True for content/rate policy rejections; rate limiting is a kind of rejection.
    pub fn is_post_rejected(&self) -> bool {
        matches!(self, ModelError::PostRejected(_) | ModelError::PostRateLimited)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelError::NoSuchRoom(_)
                | ModelError::NoSuchFile(_)
                | ModelError::NoSuchUser(_)
                | ModelError::NoSuchPost(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ModelError::NoSuchRoom(_)
            | ModelError::NoSuchFile(_)
            | ModelError::NoSuchUser(_)
            | ModelError::NoSuchPost(_) => StatusCode::NOT_FOUND,
            ModelError::AlreadyExists(_) => StatusCode::CONFLICT,
            ModelError::BadPermission => StatusCode::FORBIDDEN,
            ModelError::InvalidData(_) => StatusCode::BAD_REQUEST,
            ModelError::PostRejected(_) => StatusCode::NOT_ACCEPTABLE,
            ModelError::PostRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ModelError::Database(_) | ModelError::Pool(_) | ModelError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ModelError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ModelError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            ModelError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            ModelError::Io(e) => {
                tracing::error!("I/O error: {}", e);
                "Internal server error".to_string()
            }
            // Lookup misses carry ids; don't echo them back
            e if e.is_not_found() => "Not found".to_string(),
            other => other.to_string(),
        };

        (status, message).into_response()
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
