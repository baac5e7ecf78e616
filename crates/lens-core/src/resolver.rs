use crate::error::Result;
use crate::types::{QueryFilter, QueryTrace};
use async_trait::async_trait;

/// Outcome of resolving a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The question matched an intent and the figures were computed.
    Answered { text: String, trace: QueryTrace },
    /// No intent matched; `clarification` asks the user to rephrase.
    Unresolved { clarification: String },
}

/// Turns a question plus the session's filter context into an answer.
///
/// `DataUnavailable` errors are recovered by the session; any other error is a hard
/// failure of the request.
#[async_trait]
pub trait QueryResolver: Send + Sync {
    async fn resolve(&self, question: &str, context: &QueryFilter) -> Result<Resolution>;
}
