use rocket::{
    http::{Header, Status},
    response::{self, Responder},
    serde::json::Json,
    Request, Response,
};
use serde::Serialize;
use thiserror::Error;

use crate::ballot::{CastError, Rejection};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Self::MalformedRequest(_) => Status::BadRequest,
            Self::Cast(CastError::Rejected(rejection)) => match rejection {
                Rejection::ElectionNotFound | Rejection::StudentNotFound => Status::NotFound,
                Rejection::InvalidCandidate => Status::BadRequest,
                Rejection::AlreadyVoted => Status::Conflict,
            },
            Self::Cast(err) if err.is_transient() => Status::ServiceUnavailable,
            Self::Cast(_) => Status::InternalServerError,
            // A conflict outside the engine means a plain read raced a
            // transaction; that is still worth retrying.
            Self::Store(StoreError::Conflict) => Status::ServiceUnavailable,
            Self::Store(StoreError::Unavailable(_)) => Status::InternalServerError,
            Self::NotFound(_) => Status::NotFound,
        }
    }

    /// Machine-readable error name for the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::Cast(CastError::Rejected(rejection)) => rejection.kind(),
            Self::Cast(CastError::Contention { .. }) | Self::Store(StoreError::Conflict) => {
                "contention"
            }
            Self::Cast(CastError::DeadlineExceeded(_)) => "deadline_exceeded",
            Self::Cast(CastError::StoreUnavailable(_)) | Self::Store(StoreError::Unavailable(_)) => {
                "store_unavailable"
            }
            Self::NotFound(_) => "not_found",
        }
    }
}

/// JSON body sent with every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            debug!("{self}");
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        let mut response = Response::build_from(Json(body).respond_to(req)?);
        response.status(status);
        if status == Status::ServiceUnavailable {
            response.header(Header::new("Retry-After", "1"));
        }
        Ok(response.finalize())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejections_are_client_errors() {
        let cases = [
            (Rejection::ElectionNotFound, Status::NotFound),
            (Rejection::StudentNotFound, Status::NotFound),
            (Rejection::InvalidCandidate, Status::BadRequest),
            (Rejection::AlreadyVoted, Status::Conflict),
        ];
        for (rejection, status) in cases {
            let err = Error::from(CastError::from(rejection));
            assert_eq!(err.status(), status);
            assert_eq!(err.kind(), rejection.kind());
        }
    }

    #[test]
    fn transient_failures_are_retryable() {
        let err = Error::from(CastError::Contention { attempts: 5 });
        assert_eq!(err.status(), Status::ServiceUnavailable);
        assert_eq!(err.kind(), "contention");

        let err = Error::from(CastError::DeadlineExceeded(Duration::from_secs(2)));
        assert_eq!(err.status(), Status::ServiceUnavailable);
        assert_eq!(err.kind(), "deadline_exceeded");
    }

    #[test]
    fn store_faults_are_server_errors() {
        let err = Error::from(CastError::StoreUnavailable("down".to_string()));
        assert_eq!(err.status(), Status::InternalServerError);

        let err = Error::from(StoreError::Unavailable("down".to_string()));
        assert_eq!(err.status(), Status::InternalServerError);
        assert_eq!(err.kind(), "store_unavailable");
    }
}
