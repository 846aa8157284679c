use std::sync::Arc;

use tracing::info;

use orderly_core::domain::company::CompanyId;
use orderly_core::domain::order::{NewOrder, NewOrderItem, OrderReceipt};
use orderly_core::errors::DomainError;
use orderly_db::repositories::OrderRepository;

use crate::errors::AgentError;
use crate::message::RunState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateOrderCommand {
    pub company_id: CompanyId,
    /// Account named by the model, if any. Must match the run's account.
    pub requested_account: Option<String>,
    pub items: Vec<NewOrderItem>,
}

pub struct OrderWriter {
    orders: Arc<dyn OrderRepository>,
}

impl OrderWriter {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    pub async fn create_order(
        &self,
        state: &RunState,
        command: CreateOrderCommand,
    ) -> Result<OrderReceipt, AgentError> {
        // One order per run; refuse before the store sees a second header.
        if let Some(existing) = state.created_order_id() {
            return Err(AgentError::WriteOnceViolation(DomainError::WriteOnceViolation {
                field: "created_order_id",
                existing: existing.0.clone(),
                attempted: format!("new order for company {}", command.company_id.0),
            }));
        }
        if command.items.is_empty() {
            return Err(AgentError::Precondition(
                "create_order requires at least one item".to_string(),
            ));
        }
        if let Some(requested) = &command.requested_account {
            let requested = requested.trim();
            if requested.is_empty() {
                return Err(AgentError::Precondition("create_order requires an account".to_string()));
            }
            if requested != state.account_id.as_str() {
                return Err(AgentError::Precondition(format!(
                    "account {requested} does not match the run's account {}",
                    state.account_id
                )));
            }
        }
        if command.company_id.0.trim().is_empty() {
            return Err(AgentError::Precondition("create_order requires a company id".to_string()));
        }
        if let Some(item) = command.items.iter().find(|item| item.quantity == 0) {
            return Err(AgentError::Precondition(format!(
                "quantity for product {} must be at least 1",
                item.product_id.0
            )));
        }

        let receipt = self
            .orders
            .create(NewOrder {
                account_id: state.account_id.clone(),
                company_id: command.company_id,
                created_by: state.user_id.clone(),
                run_id: Some(state.run_id.clone()),
                items: command.items,
            })
            .await?;

        info!(
            event_name = "agent.order.created",
            correlation_id = %state.run_id,
            account_id = %state.account_id,
            order_id = %receipt.order_id.0,
            order_number = %receipt.order_number,
            item_count = receipt.item_count,
            "order created"
        );
        Ok(receipt)
    }
}
