use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

/// Gateway-wide error taxonomy. Every handler returns `Result<_, ApiError>`
/// and the mapping below is the single place errors become HTTP statuses.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("cluster not ready: {0}")]
    NotReady(String),
    #[error("cluster integrity error: cie#{code} - {detail}")]
    ClusterIntegrity { code: u32, detail: String },
    #[error("node not found: cannot {action} {id}: self {self_id}, smap v{smap_version}")]
    NodeNotFound {
        action: String,
        id: String,
        self_id: String,
        smap_version: i64,
    },
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("upstream replied {0}: {1}")]
    Upstream(u16, String),
    #[error("upstream request failed")]
    UpstreamReq(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::NodeNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ClusterIntegrity { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(code, _) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::UpstreamReq(_) | ApiError::Io(_) | ApiError::Any(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_passthrough() {
        assert_eq!(ApiError::Upstream(410, "offline".into()).status(), StatusCode::GONE);
        assert_eq!(ApiError::Upstream(999, "?".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn cie_message_carries_code() {
        let err = ApiError::ClusterIntegrity { code: 50, detail: "uuid mismatch".into() };
        assert!(err.to_string().contains("cie#50"));
    }
}
