use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::warn;

use orderly_core::domain::account::UserId;
use orderly_core::domain::progress::{ProgressEntry, RunId};
use orderly_db::repositories::ProgressRepository;

#[derive(Default)]
struct Pending {
    writes: JoinSet<()>,
    last_stamp: Option<DateTime<Utc>>,
}

/// Fire-and-forget status lines for one run.
///
/// Writes are spawned so the loop never waits on them; `flush` collects them
/// before the run returns. Timestamps are kept strictly increasing so ordering
/// by `created_at` matches report order.
pub struct ProgressReporter {
    repository: Arc<dyn ProgressRepository>,
    pending: Mutex<Pending>,
}

impl ProgressReporter {
    pub fn new(repository: Arc<dyn ProgressRepository>) -> Self {
        Self { repository, pending: Mutex::new(Pending::default()) }
    }

    pub fn report(&self, run_id: &RunId, user_id: &UserId, content: impl Into<String>) {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut entry = ProgressEntry::new(run_id.clone(), user_id.clone(), content);
        if let Some(last) = pending.last_stamp {
            if entry.created_at <= last {
                entry.created_at = last + Duration::microseconds(1);
            }
        }
        pending.last_stamp = Some(entry.created_at);

        let repository = self.repository.clone();
        pending.writes.spawn(async move {
            if let Err(error) = repository.append(entry.clone()).await {
                warn!(
                    event_name = "agent.progress.write_failed",
                    correlation_id = %entry.run_id,
                    user_id = %entry.user_id,
                    error = %error,
                    "progress entry could not be stored"
                );
            }
        });
    }

    /// Waits for every write reported so far.
    pub async fn flush(&self) {
        let mut writes = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut pending.writes)
        };

        while let Some(joined) = writes.join_next().await {
            if let Err(error) = joined {
                warn!(
                    event_name = "agent.progress.task_failed",
                    error = %error,
                    "progress write task did not complete"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use orderly_core::domain::account::UserId;
    use orderly_core::domain::progress::{ProgressEntry, RunId};
    use orderly_db::repositories::{InMemoryProgressRepository, ProgressRepository, RepositoryError};

    use super::ProgressReporter;

    struct FailingProgressRepository;

    #[async_trait]
    impl ProgressRepository for FailingProgressRepository {
        async fn append(&self, _entry: ProgressEntry) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("disk full".to_string()))
        }

        async fn latest_for_run(
            &self,
            _run_id: &RunId,
        ) -> Result<Option<ProgressEntry>, RepositoryError> {
            Ok(None)
        }

        async fn list_for_run(
            &self,
            _run_id: &RunId,
        ) -> Result<Vec<ProgressEntry>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn latest_for_user_since(
            &self,
            _user_id: &UserId,
            _since: DateTime<Utc>,
        ) -> Result<Option<ProgressEntry>, RepositoryError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn flush_waits_for_reported_entries_in_order() {
        let repository = Arc::new(InMemoryProgressRepository::default());
        let reporter = ProgressReporter::new(repository.clone());
        let run = RunId("run-1".to_string());
        let user = UserId("user-1".to_string());

        reporter.report(&run, &user, "Resolving the customer");
        reporter.report(&run, &user, "Resolving the products");
        reporter.report(&run, &user, "Creating the order");
        reporter.flush().await;

        let entries = repository.list_for_run(&run).await.expect("list");
        let contents: Vec<&str> = entries.iter().map(|entry| entry.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Resolving the customer", "Resolving the products", "Creating the order"]
        );
        assert!(entries.windows(2).all(|pair| pair[0].created_at < pair[1].created_at));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let reporter = ProgressReporter::new(Arc::new(FailingProgressRepository));

        reporter.report(&RunId("run-1".to_string()), &UserId("user-1".to_string()), "Finished");
        reporter.flush().await;
    }
}
