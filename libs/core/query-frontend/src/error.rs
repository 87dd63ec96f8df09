use thiserror::Error;

pub type FrontendResult<T> = Result<T, FrontendError>;

/// Errors surfaced by the dispatcher and the result sink
#[derive(Error, Debug)]
pub enum FrontendError {
    /// The call carried no tenant identifier
    #[error("no tenant on the request")]
    MissingTenant,

    /// No scheduler worker could accept the request within one rotation
    #[error("no schedulers available to enqueue the request")]
    NoSchedulers,

    /// The scheduler rejected the request, or every retry found a draining
    /// scheduler
    #[error("failed to enqueue request")]
    EnqueueFailed,

    /// The caller cancelled the request
    #[error("request cancelled by the caller")]
    Cancelled,

    /// The caller's deadline passed before the result arrived
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// A result was delivered under a different tenant than the one that
    /// submitted the query
    #[error("result for query {query_id} delivered by tenant '{delivered}' which did not submit it")]
    TenantMismatch { query_id: u64, delivered: String },

    /// The frontend is shutting down
    #[error("frontend is shutting down")]
    ShuttingDown,
}

impl From<FrontendError> for tonic::Status {
    fn from(err: FrontendError) -> Self {
        match err {
            FrontendError::MissingTenant => tonic::Status::invalid_argument(err.to_string()),
            FrontendError::NoSchedulers | FrontendError::ShuttingDown => {
                tonic::Status::unavailable(err.to_string())
            }
            FrontendError::EnqueueFailed => tonic::Status::internal(err.to_string()),
            FrontendError::Cancelled => tonic::Status::cancelled(err.to_string()),
            FrontendError::DeadlineExceeded => tonic::Status::deadline_exceeded(err.to_string()),
            FrontendError::TenantMismatch { .. } => {
                tonic::Status::permission_denied(err.to_string())
            }
        }
    }
}
