//! The closed set of actions the model may request, their argument schemas and
//! the dispatcher that executes them against the resolver and the writer.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use orderly_core::domain::company::CompanyId;
use orderly_core::domain::order::NewOrderItem;
use orderly_core::domain::product::ProductId;

use crate::errors::AgentError;
use crate::message::{ActionRequest, ActionResult, Message, RunState, StructuredUpdate};
use crate::resolver::{EntityResolver, ProductRequest};
use crate::writer::{CreateOrderCommand, OrderWriter};

/// Marker placed in the `create_order` result so the next model turn wraps up.
pub const ORDER_CREATED_SENTINEL: &str = "ORDER_CREATED";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    ResolveCompany,
    ResolveProducts,
    CreateOrder,
}

impl ActionName {
    pub const ALL: [ActionName; 3] =
        [ActionName::ResolveCompany, ActionName::ResolveProducts, ActionName::CreateOrder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveCompany => "resolve_company",
            Self::ResolveProducts => "resolve_products",
            Self::CreateOrder => "create_order",
        }
    }

    /// Status line reported while this action is the next thing the run does.
    pub fn progress_phrase(&self) -> &'static str {
        match self {
            Self::ResolveCompany => "Resolving the customer",
            Self::ResolveProducts => "Resolving the products",
            Self::CreateOrder => "Creating the order",
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionName {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| AgentError::UnknownAction(value.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The fixed manifest handed to the model on every decision.
pub fn manifest() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ActionName::ResolveCompany.as_str().to_string(),
            description: "Find the customer company the operator named. Returns its id or \
                          says that no company matched."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "companyName": {
                        "type": "string",
                        "description": "Company name as written by the operator"
                    }
                },
                "required": ["companyName"]
            }),
        },
        ToolDefinition {
            name: ActionName::ResolveProducts.as_str().to_string(),
            description: "Map product names (or SKUs) with quantities to catalog product ids. \
                          Unmatched names are listed separately."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "requests": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "quantity": { "type": "integer", "minimum": 0 }
                            },
                            "required": ["name"]
                        }
                    }
                },
                "required": ["requests"]
            }),
        },
        ToolDefinition {
            name: ActionName::CreateOrder.as_str().to_string(),
            description: format!(
                "Create a pending order for a resolved company with resolved products. \
                 On success the result contains {ORDER_CREATED_SENTINEL}."
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "companyId": { "type": "string" },
                    "accountId": { "type": "string" },
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "productId": { "type": "string" },
                                "quantity": { "type": "integer", "minimum": 1 }
                            },
                            "required": ["productId", "quantity"]
                        }
                    }
                },
                "required": ["companyId", "items"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResolveCompanyArgs {
    company_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolveProductsArgs {
    requests: Vec<ProductRequestArg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProductRequestArg {
    name: String,
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateOrderArgs {
    company_id: String,
    account_id: Option<String>,
    items: Vec<OrderLineArg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OrderLineArg {
    product_id: String,
    quantity: u32,
}

fn parse_arguments<T: DeserializeOwned>(name: ActionName, arguments: &Value) -> Result<T, AgentError> {
    serde_json::from_value(arguments.clone()).map_err(|error| AgentError::MalformedArguments {
        action: name.as_str().to_string(),
        message: error.to_string(),
    })
}

pub struct ActionDispatcher {
    resolver: EntityResolver,
    writer: OrderWriter,
}

impl ActionDispatcher {
    pub fn new(resolver: EntityResolver, writer: OrderWriter) -> Self {
        Self { resolver, writer }
    }

    /// Runs one request, folds its structured update into `state` and appends
    /// the action-result message to the history.
    pub async fn dispatch(
        &self,
        request: &ActionRequest,
        state: &mut RunState,
    ) -> Result<ActionResult, AgentError> {
        let name: ActionName = request.name.parse()?;
        debug!(
            event_name = "agent.action.dispatch",
            correlation_id = %state.run_id,
            account_id = %state.account_id,
            action = %name,
            request_id = %request.id,
            "dispatching action"
        );

        let (content, structured_update) = match name {
            ActionName::ResolveCompany => {
                let args: ResolveCompanyArgs = parse_arguments(name, &request.arguments)?;
                self.resolve_company(state, &args.company_name).await?
            }
            ActionName::ResolveProducts => {
                let args: ResolveProductsArgs = parse_arguments(name, &request.arguments)?;
                (self.resolve_products(state, args).await?, None)
            }
            ActionName::CreateOrder => {
                let args: CreateOrderArgs = parse_arguments(name, &request.arguments)?;
                self.create_order(state, args).await?
            }
        };

        let result = ActionResult { request_id: request.id.clone(), content, structured_update };
        if let Some(update) = result.structured_update.clone() {
            state.apply(update).map_err(AgentError::WriteOnceViolation)?;
        }
        state.messages.push(Message::action_result(&result));

        info!(
            event_name = "agent.action.completed",
            correlation_id = %state.run_id,
            account_id = %state.account_id,
            action = %name,
            request_id = %request.id,
            "action completed"
        );
        Ok(result)
    }

    async fn resolve_company(
        &self,
        state: &RunState,
        company_name: &str,
    ) -> Result<(String, Option<StructuredUpdate>), AgentError> {
        match self.resolver.resolve_company(&state.account_id, company_name).await? {
            Some(resolved) => {
                let content = json!({
                    "status": "resolved",
                    "companyId": resolved.company.id.0,
                    "companyName": resolved.company.name,
                    "match": resolved.tier.as_str(),
                })
                .to_string();
                Ok((content, Some(StructuredUpdate::ResolvedCompany(resolved.company.id))))
            }
            None => {
                let content = json!({
                    "status": "not_found",
                    "message": format!("No company matching \"{}\" was found.", company_name.trim()),
                })
                .to_string();
                Ok((content, None))
            }
        }
    }

    async fn resolve_products(
        &self,
        state: &RunState,
        args: ResolveProductsArgs,
    ) -> Result<String, AgentError> {
        let requests: Vec<ProductRequest> = args
            .requests
            .into_iter()
            .map(|request| ProductRequest { name: request.name, quantity: request.quantity })
            .collect();
        let resolution = self.resolver.resolve_products(&state.account_id, &requests).await?;

        Ok(json!({
            "resolved": resolution
                .resolved
                .iter()
                .map(|item| json!({
                    "productId": item.product_id.0,
                    "productName": item.product_name,
                    "quantity": item.quantity,
                }))
                .collect::<Vec<_>>(),
            "unresolved": resolution
                .unresolved
                .iter()
                .map(|item| json!({ "name": item.name, "reason": item.reason }))
                .collect::<Vec<_>>(),
        })
        .to_string())
    }

    async fn create_order(
        &self,
        state: &RunState,
        args: CreateOrderArgs,
    ) -> Result<(String, Option<StructuredUpdate>), AgentError> {
        let command = CreateOrderCommand {
            company_id: CompanyId(args.company_id),
            requested_account: args.account_id,
            items: args
                .items
                .into_iter()
                .map(|item| NewOrderItem {
                    product_id: ProductId(item.product_id),
                    quantity: item.quantity,
                })
                .collect(),
        };
        let receipt = self.writer.create_order(state, command).await?;

        let content = json!({
            "status": ORDER_CREATED_SENTINEL,
            "orderId": receipt.order_id.0,
            "orderNumber": receipt.order_number.0,
            "itemCount": receipt.item_count,
            "totalAmount": receipt.total_amount.to_string(),
        })
        .to_string();
        let update = StructuredUpdate::CreatedOrder {
            order_id: receipt.order_id,
            order_number: receipt.order_number,
        };
        Ok((content, Some(update)))
    }
}
