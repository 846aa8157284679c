use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orderly_core::config::{AgentConfig, AppConfig, RankerKind};
use orderly_core::domain::account::AccountId;
use orderly_core::domain::company::CompanyId;
use orderly_core::domain::order::{OrderId, OrderNumber};
use orderly_core::domain::progress::RunId;
use orderly_core::resolution::{FirstMatchRanker, Ranker, TieredRanker};
use orderly_db::repositories::{
    ProgressRepository, SqlCompanyRepository, SqlOrderRepository, SqlProductRepository,
    SqlProgressRepository,
};
use orderly_db::DbPool;

use crate::auth::{CallerVerifier, StaticTokenVerifier};
use crate::errors::AgentError;
use crate::llm::{DecisionStep, OpenAiDecisionStep};
use crate::message::{Message, RunState};
use crate::progress::ProgressReporter;
use crate::prompt::render_system_prompt;
use crate::resolver::EntityResolver;
use crate::tools::{ActionDispatcher, ActionName};
use crate::writer::OrderWriter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentRuntimeOptions {
    pub max_iterations: u32,
    pub run_timeout: Duration,
}

impl Default for AgentRuntimeOptions {
    fn default() -> Self {
        Self { max_iterations: 8, run_timeout: Duration::from_secs(120) }
    }
}

impl From<&AgentConfig> for AgentRuntimeOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    pub account_id: String,
    pub caller_token: String,
    #[serde(default)]
    pub run_id: Option<RunId>,
}

/// Outcome of one run. `success` is false exactly when `error` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: RunId,
    pub success: bool,
    pub order_id: Option<OrderId>,
    pub order_number: Option<OrderNumber>,
    pub company_id: Option<CompanyId>,
    pub message: String,
    pub error: Option<String>,
    pub error_class: Option<String>,
}

impl RunResponse {
    fn finished(state: &RunState, message: String) -> Self {
        Self {
            run_id: state.run_id.clone(),
            success: true,
            order_id: state.created_order_id().cloned(),
            order_number: state.created_order_number().cloned(),
            company_id: state.resolved_company_id().cloned(),
            message,
            error: None,
            error_class: None,
        }
    }

    fn failed(run_id: RunId, state: Option<&RunState>, error: &AgentError) -> Self {
        Self {
            run_id,
            success: false,
            order_id: state.and_then(|state| state.created_order_id().cloned()),
            order_number: state.and_then(|state| state.created_order_number().cloned()),
            company_id: state.and_then(|state| state.resolved_company_id().cloned()),
            message: error.to_string(),
            error: Some(error.to_string()),
            error_class: Some(error.error_class().to_string()),
        }
    }
}

/// A failed run: the response handed back to the caller and the error behind it.
#[derive(Debug)]
pub struct RunFailure {
    pub response: RunResponse,
    pub error: AgentError,
}

impl RunFailure {
    fn new(run_id: RunId, state: Option<&RunState>, error: AgentError) -> Self {
        Self { response: RunResponse::failed(run_id, state, &error), error }
    }
}

/// Decide/act loop for one operator instruction.
///
/// The loop alternates between asking the decision step for the next message
/// and dispatching whatever actions that message requests. A message without
/// action requests ends the run.
pub struct AgentRuntime {
    decision: Arc<dyn DecisionStep>,
    dispatcher: ActionDispatcher,
    verifier: Arc<dyn CallerVerifier>,
    progress: Arc<dyn ProgressRepository>,
    options: AgentRuntimeOptions,
}

impl AgentRuntime {
    pub fn new(
        decision: Arc<dyn DecisionStep>,
        dispatcher: ActionDispatcher,
        verifier: Arc<dyn CallerVerifier>,
        progress: Arc<dyn ProgressRepository>,
        options: AgentRuntimeOptions,
    ) -> Self {
        Self { decision, dispatcher, verifier, progress, options }
    }

    /// SQLite-backed runtime talking to the configured model endpoint.
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, AgentError> {
        let decision = Arc::new(OpenAiDecisionStep::from_config(&config.llm)?);
        Ok(Self::with_decision(config, pool, decision))
    }

    /// SQLite-backed runtime with a caller-supplied decision step.
    pub fn with_decision(config: &AppConfig, pool: DbPool, decision: Arc<dyn DecisionStep>) -> Self {
        let ranker: Arc<dyn Ranker> = match config.agent.ranker {
            RankerKind::Tiered => Arc::new(TieredRanker),
            RankerKind::FirstMatch => Arc::new(FirstMatchRanker),
        };
        let resolver = EntityResolver::new(
            Arc::new(SqlCompanyRepository::new(pool.clone())),
            Arc::new(SqlProductRepository::new(pool.clone())),
            ranker,
        );
        let writer = OrderWriter::new(Arc::new(SqlOrderRepository::new(pool.clone())));

        Self::new(
            decision,
            ActionDispatcher::new(resolver, writer),
            Arc::new(StaticTokenVerifier::from_config(&config.auth)),
            Arc::new(SqlProgressRepository::new(pool)),
            AgentRuntimeOptions::from(&config.agent),
        )
    }

    /// Every failure is folded into the response.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunResponse {
        match self.execute(request, cancel).await {
            Ok(response) => response,
            Err(failure) => failure.response,
        }
    }

    /// Like [`AgentRuntime::run`], but keeps the error of a failed run for callers
    /// that map it onto their own taxonomy.
    pub async fn execute(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunResponse, RunFailure> {
        let run_id = request.run_id.clone().unwrap_or_else(RunId::generate);
        let started = Instant::now();

        let user_id = match self.verifier.verify(&request.caller_token).await {
            Ok(user_id) => user_id,
            Err(error) => {
                warn!(
                    event_name = "agent.run.unauthorized",
                    correlation_id = %run_id,
                    error = %error,
                    "caller verification failed"
                );
                return Err(RunFailure::new(run_id, None, error));
            }
        };

        let account_id = match AccountId::parse(&request.account_id) {
            Ok(account_id) => account_id,
            Err(error) => {
                let error = AgentError::Precondition(error.to_string());
                let reporter = ProgressReporter::new(self.progress.clone());
                reporter.report(&run_id, &user_id, format!("Failed: {error}"));
                reporter.flush().await;
                return Err(RunFailure::new(run_id, None, error));
            }
        };

        info!(
            event_name = "agent.run.start",
            correlation_id = %run_id,
            account_id = %account_id,
            user_id = %user_id,
            decision_step = self.decision.name(),
            max_iterations = self.options.max_iterations,
            "agent run started"
        );

        let mut state = RunState::new(run_id.clone(), account_id, user_id);
        let reporter = ProgressReporter::new(self.progress.clone());
        let outcome = self.drive(&mut state, &request.prompt, &reporter, &cancel, started).await;

        let outcome = match outcome {
            Ok(message) => {
                let line = match state.created_order_number() {
                    Some(number) => format!("Order {number} created"),
                    None => "Finished".to_string(),
                };
                reporter.report(&state.run_id, &state.user_id, line);
                Ok(RunResponse::finished(&state, message))
            }
            Err(error) => {
                reporter.report(&state.run_id, &state.user_id, format!("Failed: {error}"));
                Err(RunFailure::new(run_id, Some(&state), error))
            }
        };
        reporter.flush().await;

        let elapsed_ms = started.elapsed().as_millis();
        match &outcome {
            Ok(response) => info!(
                event_name = "agent.run.completed",
                correlation_id = %state.run_id,
                account_id = %state.account_id,
                order_id = response.order_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
                elapsed_ms,
                "agent run completed"
            ),
            Err(failure) => warn!(
                event_name = "agent.run.failed",
                correlation_id = %state.run_id,
                account_id = %state.account_id,
                error_class = failure.error.error_class(),
                error = %failure.error,
                elapsed_ms,
                "agent run failed"
            ),
        }
        outcome
    }

    async fn drive(
        &self,
        state: &mut RunState,
        prompt: &str,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<String, AgentError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AgentError::Precondition("instruction must not be empty".to_string()));
        }

        let deadline = started + self.options.run_timeout;
        let deadline_exceeded =
            || AgentError::DeadlineExceeded { timeout_ms: self.options.run_timeout.as_millis() };

        state.messages.push(Message::system(render_system_prompt(&state.account_id)?));
        state.messages.push(Message::user(prompt));

        let mut iterations = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(deadline_exceeded());
            }
            if iterations >= self.options.max_iterations {
                return Err(AgentError::LoopExceeded { max_iterations: self.options.max_iterations });
            }
            iterations += 1;

            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = sleep_until(deadline) => return Err(deadline_exceeded()),
                decided = self.decision.decide(&state.messages) => decided?,
            };
            state.messages.push(message.clone());

            if !message.has_actions() {
                return Ok(message.content);
            }

            // Unknown names get no phrase here; dispatch rejects them below.
            if let Ok(first) = message.requested_actions[0].name.parse::<ActionName>() {
                reporter.report(&state.run_id, &state.user_id, first.progress_phrase());
            }
            for request in &message.requested_actions {
                self.dispatcher.dispatch(request, state).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use orderly_core::domain::account::UserId;
    use orderly_core::domain::progress::RunId;
    use orderly_db::repositories::{
        InMemoryOrderRepository, InMemoryProgressRepository, OrderRepository, ProgressRepository,
    };

    use super::{AgentRuntime, AgentRuntimeOptions, RunRequest};
    use crate::auth::StaticTokenVerifier;
    use crate::errors::AgentError;
    use crate::llm::ScriptedDecisionStep;
    use crate::message::{ActionRequest, Message};
    use crate::testing::{demo_account, demo_dispatcher};

    const TOKEN: &str = "token-ops-1";

    struct Harness {
        runtime: AgentRuntime,
        decision: Arc<ScriptedDecisionStep>,
        orders: Arc<InMemoryOrderRepository>,
        progress: Arc<InMemoryProgressRepository>,
    }

    async fn harness(decision: ScriptedDecisionStep, options: AgentRuntimeOptions) -> Harness {
        let (dispatcher, orders) = demo_dispatcher().await;
        let decision = Arc::new(decision);
        let progress = Arc::new(InMemoryProgressRepository::default());
        let verifier =
            StaticTokenVerifier::new([(TOKEN.to_string(), UserId("user-ops".to_string()))]);
        let runtime = AgentRuntime::new(
            decision.clone(),
            dispatcher,
            Arc::new(verifier),
            progress.clone(),
            options,
        );
        Harness { runtime, decision, orders, progress }
    }

    fn request(prompt: &str, run_id: &str) -> RunRequest {
        RunRequest {
            prompt: prompt.to_string(),
            account_id: "acct-demo".to_string(),
            caller_token: TOKEN.to_string(),
            run_id: Some(RunId(run_id.to_string())),
        }
    }

    fn act(id: &str, name: &str, arguments: serde_json::Value) -> Message {
        Message::assistant_with_actions(
            "",
            vec![ActionRequest { id: id.to_string(), name: name.to_string(), arguments }],
        )
    }

    fn clean_order_script() -> ScriptedDecisionStep {
        ScriptedDecisionStep::new([
            act("call-1", "resolve_company", json!({"companyName": "Luxe Beauty Gallery"})),
            act("call-2", "resolve_products", json!({"requests": [{"name": "SK001", "quantity": 300}]})),
            act(
                "call-3",
                "create_order",
                json!({"companyId": "co-luxe-001", "items": [{"productId": "prod-sk001", "quantity": 300}]}),
            ),
            Message::assistant("Order ORD-00001 was created for Luxe Beauty Gallery."),
        ])
    }

    #[tokio::test]
    async fn clean_instruction_creates_exactly_one_order() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;

        let response = h
            .runtime
            .run(
                request("Order 300 units of SK001 for Luxe Beauty Gallery", "run-clean"),
                CancellationToken::new(),
            )
            .await;

        assert!(response.success, "unexpected failure: {:?}", response.error);
        assert_eq!(response.company_id.as_ref().map(|id| id.0.as_str()), Some("co-luxe-001"));
        assert_eq!(response.order_number.as_ref().map(|n| n.0.as_str()), Some("ORD-00001"));
        let order_id = response.order_id.expect("order id");
        let order = h
            .orders
            .find_by_id(&demo_account(), &order_id)
            .await
            .expect("find")
            .expect("stored order");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 300);
        assert_eq!(h.orders.count_for_account(&demo_account()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn repeated_create_order_leaves_a_single_order() {
        let create = |id: &str, quantity: u32| {
            act(
                id,
                "create_order",
                json!({"companyId": "co-luxe-001", "items": [{"productId": "prod-sk001", "quantity": quantity}]}),
            )
        };
        let script = ScriptedDecisionStep::new([
            create("call-1", 300),
            create("call-2", 10),
            Message::assistant("Both orders were created."),
        ]);
        let h = harness(script, AgentRuntimeOptions::default()).await;

        let response = h
            .runtime
            .run(request("Order 300 SK001 for Luxe, then 10 more", "run-twice"), CancellationToken::new())
            .await;

        assert!(!response.success);
        assert_eq!(response.error_class.as_deref(), Some("write_once_violation"));
        assert_eq!(response.order_number.as_ref().map(|n| n.0.as_str()), Some("ORD-00001"));
        assert_eq!(h.orders.count_for_account(&demo_account()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn execute_keeps_the_error_of_a_failed_run() {
        let h = harness(ScriptedDecisionStep::new([]), AgentRuntimeOptions::default()).await;

        let failure = h
            .runtime
            .execute(request("   ", "run-blank-execute"), CancellationToken::new())
            .await
            .expect_err("blank instruction");

        assert!(matches!(failure.error, AgentError::Precondition(_)));
        assert_eq!(failure.response.error_class.as_deref(), Some("precondition"));
        assert!(h.decision.calls().is_empty());
    }

    #[tokio::test]
    async fn decision_step_sees_results_of_earlier_actions() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;

        h.runtime.run(request("Order 300 units of SK001", "run-history"), CancellationToken::new()).await;

        let calls = h.decision.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0][0].content.contains("acct-demo"));
        let last_history = calls[3].last().expect("history");
        assert!(last_history.content.contains("ORDER_CREATED"));
        assert_eq!(last_history.request_id.as_deref(), Some("call-3"));
    }

    #[tokio::test]
    async fn unknown_company_finishes_without_an_order() {
        let script = ScriptedDecisionStep::new([
            act("call-1", "resolve_company", json!({"companyName": "Globex Industries"})),
            Message::assistant("No company matching \"Globex Industries\" was found."),
        ]);
        let h = harness(script, AgentRuntimeOptions::default()).await;

        let response = h
            .runtime
            .run(request("Order 5 Serum for Globex Industries", "run-missing"), CancellationToken::new())
            .await;

        assert!(response.success);
        assert!(response.order_id.is_none());
        assert!(response.message.contains("No company matching"));
        assert_eq!(h.orders.count_for_account(&demo_account()).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn endless_action_requests_stop_at_the_cap() {
        let script = ScriptedDecisionStep::repeating(act(
            "call-loop",
            "resolve_company",
            json!({"companyName": "Acme"}),
        ));
        let options = AgentRuntimeOptions { max_iterations: 3, ..AgentRuntimeOptions::default() };
        let h = harness(script, options).await;

        let response =
            h.runtime.run(request("keep going", "run-loop"), CancellationToken::new()).await;

        assert!(!response.success);
        assert_eq!(response.error_class.as_deref(), Some("loop_exceeded"));
        assert_eq!(h.decision.calls().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_decision() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = h.runtime.run(request("Order 300 units of SK001", "run-cancel"), cancel).await;

        assert_eq!(response.error_class.as_deref(), Some("cancelled"));
        assert!(h.decision.calls().is_empty());
    }

    #[tokio::test]
    async fn slow_decision_is_cut_off_by_the_deadline() {
        let script = ScriptedDecisionStep::new([Message::assistant("too late")])
            .with_latency(Duration::from_secs(5));
        let options =
            AgentRuntimeOptions { run_timeout: Duration::from_millis(50), ..AgentRuntimeOptions::default() };
        let h = harness(script, options).await;

        let response =
            h.runtime.run(request("anything", "run-deadline"), CancellationToken::new()).await;

        assert!(!response.success);
        assert_eq!(response.error_class.as_deref(), Some("deadline_exceeded"));
    }

    #[tokio::test]
    async fn unknown_callers_never_reach_the_loop() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;
        let mut unauthorized = request("Order 300 units of SK001", "run-denied");
        unauthorized.caller_token = "stolen-token".to_string();

        let response = h.runtime.run(unauthorized, CancellationToken::new()).await;

        assert_eq!(response.error_class.as_deref(), Some("unauthorized"));
        assert!(h.decision.calls().is_empty());
        assert!(h.progress.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn blank_account_is_a_precondition_failure() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;
        let mut blank = request("Order 300 units of SK001", "run-blank");
        blank.account_id = "  ".to_string();

        let response = h.runtime.run(blank, CancellationToken::new()).await;

        assert_eq!(response.error_class.as_deref(), Some("precondition"));
        assert!(h.decision.calls().is_empty());
    }

    #[tokio::test]
    async fn decision_failures_are_fatal() {
        let h = harness(ScriptedDecisionStep::new([]), AgentRuntimeOptions::default()).await;

        let response = h.runtime.run(request("hello", "run-dry"), CancellationToken::new()).await;

        assert_eq!(response.error_class.as_deref(), Some("decision"));
    }

    #[tokio::test]
    async fn progress_lines_follow_the_run_and_do_not_bleed_across_runs() {
        let h = harness(clean_order_script(), AgentRuntimeOptions::default()).await;
        let run = RunId("run-progress".to_string());

        h.runtime.run(request("Order 300 units of SK001", "run-progress"), CancellationToken::new()).await;

        let entries = h.progress.list_for_run(&run).await.expect("list");
        let lines: Vec<&str> = entries.iter().map(|entry| entry.content.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "Resolving the customer",
                "Resolving the products",
                "Creating the order",
                "Order ORD-00001 created"
            ]
        );
        let other = h
            .progress
            .latest_for_run(&RunId("run-other".to_string()))
            .await
            .expect("latest");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn failed_runs_report_a_final_failure_line() {
        let script = ScriptedDecisionStep::new([act(
            "call-1",
            "create_order",
            json!({"companyId": "co-luxe-001", "items": []}),
        )]);
        let h = harness(script, AgentRuntimeOptions::default()).await;

        let response =
            h.runtime.run(request("Order nothing", "run-failed"), CancellationToken::new()).await;

        assert_eq!(response.error_class.as_deref(), Some("precondition"));
        let latest = h
            .progress
            .latest_for_run(&RunId("run-failed".to_string()))
            .await
            .expect("latest")
            .expect("an entry");
        assert!(latest.content.starts_with("Failed:"));
        assert_eq!(h.orders.count_for_account(&demo_account()).await.expect("count"), 0);
    }
}
