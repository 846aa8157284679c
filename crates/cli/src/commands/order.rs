use std::sync::Arc;

use crate::commands::{command_runtime, CommandResult};
use orderly_agent::{AgentRuntime, DecisionStep, OpenAiDecisionStep, RunRequest};
use orderly_core::config::{AppConfig, LoadOptions};
use orderly_core::domain::progress::RunId;
use orderly_db::{connect_with_config, migrations};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct OrderArgs {
    pub account_id: String,
    pub caller_token: String,
    pub run_id: Option<String>,
    pub prompt: String,
}

/// Runs one instruction against the configured model endpoint.
pub fn run(args: OrderArgs) -> CommandResult {
    execute(args, None)
}

/// Same as `run`, with the decision step supplied by the caller.
pub fn run_with_decision(args: OrderArgs, decision: Arc<dyn DecisionStep>) -> CommandResult {
    execute(args, Some(decision))
}

fn execute(args: OrderArgs, decision: Option<Arc<dyn DecisionStep>>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "order",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let decision = match decision {
        Some(decision) => decision,
        None => match OpenAiDecisionStep::from_config(&config.llm) {
            Ok(step) => Arc::new(step),
            Err(error) => {
                return CommandResult::failure("order", error.error_class(), error.to_string(), 2);
            }
        },
    };

    let runtime = match command_runtime("order") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let agent = AgentRuntime::with_decision(&config, pool.clone(), decision);
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let response = agent
            .run(
                RunRequest {
                    prompt: args.prompt,
                    account_id: args.account_id,
                    caller_token: args.caller_token,
                    run_id: args.run_id.map(RunId),
                },
                cancel,
            )
            .await;

        watcher.abort();
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(response)
    });

    match result {
        Ok(response) => {
            let details = serde_json::to_value(&response).ok();
            if response.success {
                CommandResult::success_with_details("order", response.message.clone(), details)
            } else {
                CommandResult::failure_with_details(
                    "order",
                    response.error_class.as_deref().unwrap_or("run_failed"),
                    response.message.clone(),
                    6,
                    details,
                )
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("order", error_class, message, exit_code)
        }
    }
}
