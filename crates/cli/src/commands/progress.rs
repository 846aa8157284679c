use crate::commands::{command_runtime, CommandResult};
use orderly_core::config::{AppConfig, LoadOptions};
use orderly_core::domain::progress::RunId;
use orderly_db::connect_with_config;
use orderly_db::repositories::{ProgressRepository, SqlProgressRepository};
use serde_json::json;

/// Lists every progress line of a run, oldest first.
pub fn run(run_id: &str) -> CommandResult {
    let run_id = run_id.trim();
    if run_id.is_empty() {
        return CommandResult::failure("progress", "invalid_argument", "run id must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "progress",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match command_runtime("progress") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let run = RunId(run_id.to_string());
    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let entries = SqlProgressRepository::new(pool.clone())
            .list_for_run(&run)
            .await
            .map_err(|error| ("progress_query", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(entries)
    });

    match result {
        Ok(entries) if entries.is_empty() => {
            CommandResult::success("progress", format!("no progress recorded for run `{run_id}`"))
        }
        Ok(entries) => {
            let lines = entries
                .iter()
                .map(|entry| json!({ "created_at": entry.created_at.to_rfc3339(), "content": entry.content }))
                .collect::<Vec<_>>();
            CommandResult::success_with_details(
                "progress",
                format!("{} progress entries for run `{run_id}`", entries.len()),
                Some(json!(lines)),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("progress", error_class, message, exit_code)
        }
    }
}
