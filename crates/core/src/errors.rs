use thiserror::Error;

use crate::quota::QuotaError;

/// Failures that abort a turn. Conversational refusals (missing data,
/// pending confirmation, permission denial, resolution failure) are
/// `ActionResult` values, never errors — only genuine inability to
/// serve the turn lands here.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("inference provider unavailable: {0}")]
    LlmUnavailable(String),
    #[error("turn deadline exceeded")]
    DeadlineExceeded,
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Stable, user-safe rendering. Quota refusals are budget messages,
    /// not system errors.
    pub fn user_message(&self) -> String {
        match self {
            Self::Quota(QuotaError::Exceeded { used, limit, remaining, .. }) => format!(
                "Token quota exceeded. Used: {used}/{limit}. Remaining: {remaining}. \
                 Please try again after your quota resets."
            ),
            Self::Quota(QuotaError::Store(_)) | Self::Persistence(_) => {
                "The service is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::LlmUnavailable(_) => {
                "The assistant is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::DeadlineExceeded => {
                "This request took too long and was stopped. Please try again.".to_owned()
            }
            Self::Internal(_) => "An unexpected internal error occurred.".to_owned(),
        }
    }

    /// Quota refusals are an expected admission-control outcome; the
    /// rest indicate degraded infrastructure.
    pub fn is_quota_refusal(&self) -> bool {
        matches!(self, Self::Quota(QuotaError::Exceeded { .. }))
    }
}
