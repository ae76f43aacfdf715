use reqwest::StatusCode;
use thiserror::Error;

/// Errors from the Confluence REST surface.
///
/// `Api` preserves the raw response body verbatim: when a mandatory step
/// fails, that text is what the operator sees on the request record.
#[derive(Debug, Error)]
pub enum ConfluenceError {
    #[error("Confluence transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Confluence API error: HTTP {status}: {body}")]
    Api { status: StatusCode, body: String },
}

impl ConfluenceError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConfluenceError::Api {
                status: StatusCode::NOT_FOUND,
                ..
            }
        )
    }

    /// Creation calls report an existing user/group either as 409 or as a
    /// 400 whose body mentions it. Both count as "already exists", which
    /// reconciliation treats as success.
    pub fn is_already_exists(&self) -> bool {
        match self {
            ConfluenceError::Api { status, body } => {
                *status == StatusCode::CONFLICT
                    || body.to_lowercase().contains("already exists")
            }
            ConfluenceError::Transport(_) => false,
        }
    }
}
