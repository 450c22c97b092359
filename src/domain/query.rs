//! Query / Session record (spec.md §3 "Query / Session").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a request-scoped pipeline run, shared by the query
/// record and the research plan it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// The inbound query plus the session envelope around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySession {
    pub request_id: Uuid,
    pub session_id: String,
    /// Populated read-only from the external auth collaborator; the core
    /// never validates it (spec.md §6).
    pub user_identity: Option<String>,
    pub query_text: String,
    /// ISO 639-1 code, default `de` per spec.md §3.
    pub query_language: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl QuerySession {
    pub fn new(session_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_identity: None,
            query_text: query_text.into(),
            query_language: "de".to_string(),
            created_at: Utc::now(),
            status: RunStatus::Pending,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.query_language = language.into();
        self
    }

    pub fn with_user_identity(mut self, identity: impl Into<String>) -> Self {
        self.user_identity = Some(identity.into());
        self
    }

    pub fn is_empty_query(&self) -> bool {
        self.query_text.trim().is_empty()
    }
}
