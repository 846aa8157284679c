use serde::{Deserialize, Serialize};
use serde_json::Value;

use orderly_core::domain::account::{AccountId, UserId};
use orderly_core::domain::company::CompanyId;
use orderly_core::domain::order::{OrderId, OrderNumber};
use orderly_core::domain::progress::RunId;
use orderly_core::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ActionResult,
}

/// A call the model asked for. `name` is kept raw so an unknown action can be
/// reported as such instead of failing at decode time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_actions: Vec<ActionRequest>,
    /// Set on action-result messages: the request they answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_actions(
        content: impl Into<String>,
        requested_actions: Vec<ActionRequest>,
    ) -> Self {
        Self { requested_actions, ..Self::plain(Role::Assistant, content) }
    }

    pub fn action_result(result: &ActionResult) -> Self {
        Self {
            request_id: Some(result.request_id.clone()),
            ..Self::plain(Role::ActionResult, result.content.clone())
        }
    }

    pub fn has_actions(&self) -> bool {
        !self.requested_actions.is_empty()
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), requested_actions: Vec::new(), request_id: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum StructuredUpdate {
    ResolvedCompany(CompanyId),
    CreatedOrder { order_id: OrderId, order_number: OrderNumber },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: String,
    pub content: String,
    pub structured_update: Option<StructuredUpdate>,
}

/// Everything one invocation threads through the loop.
#[derive(Clone, Debug)]
pub struct RunState {
    pub run_id: RunId,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub messages: Vec<Message>,
    resolved_company_id: Option<CompanyId>,
    created_order_id: Option<OrderId>,
    created_order_number: Option<OrderNumber>,
}

impl RunState {
    pub fn new(run_id: RunId, account_id: AccountId, user_id: UserId) -> Self {
        Self {
            run_id,
            account_id,
            user_id,
            messages: Vec::new(),
            resolved_company_id: None,
            created_order_id: None,
            created_order_number: None,
        }
    }

    pub fn resolved_company_id(&self) -> Option<&CompanyId> {
        self.resolved_company_id.as_ref()
    }

    pub fn created_order_id(&self) -> Option<&OrderId> {
        self.created_order_id.as_ref()
    }

    pub fn created_order_number(&self) -> Option<&OrderNumber> {
        self.created_order_number.as_ref()
    }

    pub fn apply(&mut self, update: StructuredUpdate) -> Result<(), DomainError> {
        match update {
            StructuredUpdate::ResolvedCompany(company_id) => {
                write_once(&mut self.resolved_company_id, "resolved_company_id", company_id, |id| {
                    id.0.clone()
                })
            }
            StructuredUpdate::CreatedOrder { order_id, order_number } => {
                write_once(&mut self.created_order_id, "created_order_id", order_id, |id| {
                    id.0.clone()
                })?;
                self.created_order_number = Some(order_number);
                Ok(())
            }
        }
    }
}

/// Sets `slot` once. Re-writing the same value is a no-op; a different value is refused.
fn write_once<T: PartialEq>(
    slot: &mut Option<T>,
    field: &'static str,
    value: T,
    describe: impl Fn(&T) -> String,
) -> Result<(), DomainError> {
    match slot {
        Some(existing) if *existing == value => Ok(()),
        Some(existing) => Err(DomainError::WriteOnceViolation {
            field,
            existing: describe(existing),
            attempted: describe(&value),
        }),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}
