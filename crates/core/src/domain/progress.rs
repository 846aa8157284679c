use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::account::UserId;

/// Correlates every progress line and the resulting order to one agent run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressEntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: ProgressEntryId,
    pub run_id: RunId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(run_id: RunId, user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: ProgressEntryId(Uuid::new_v4().to_string()),
            run_id,
            user_id,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
