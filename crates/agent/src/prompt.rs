use serde::Serialize;
use tera::{Context, Tera};

use orderly_core::domain::account::AccountId;

use crate::errors::AgentError;
use crate::tools::{ActionName, ORDER_CREATED_SENTINEL};

const SYSTEM_PROMPT: &str = r#"You turn an operator's instruction into an order for account {{ account_id }}.

Available actions:
{% for action in actions %}- {{ action.name }}: {{ action.phrase }}
{% endfor %}
Work in this order: resolve the company, resolve the products, then create the order
using only ids returned by the earlier actions. Never invent ids or prices.
If the company or a product cannot be found, say so plainly and stop without creating an order.
When an action result contains {{ sentinel }}, reply with a short confirmation that
includes the order number and request no further actions."#;

#[derive(Serialize)]
struct ActionLine {
    name: &'static str,
    phrase: &'static str,
}

pub fn render_system_prompt(account_id: &AccountId) -> Result<String, AgentError> {
    let actions: Vec<ActionLine> = ActionName::ALL
        .into_iter()
        .map(|name| ActionLine { name: name.as_str(), phrase: name.progress_phrase() })
        .collect();

    let mut context = Context::new();
    context.insert("account_id", account_id.as_str());
    context.insert("sentinel", ORDER_CREATED_SENTINEL);
    context.insert("actions", &actions);

    Tera::one_off(SYSTEM_PROMPT, &context, false).map_err(|error| AgentError::Prompt(error.to_string()))
}

#[cfg(test)]
mod tests {
    use orderly_core::domain::account::AccountId;

    use super::render_system_prompt;

    #[test]
    fn prompt_names_account_sentinel_and_actions() {
        let prompt = render_system_prompt(&AccountId("acct-demo".to_string())).expect("render");

        assert!(prompt.contains("account acct-demo"));
        assert!(prompt.contains("ORDER_CREATED"));
        assert!(prompt.contains("- resolve_company: Resolving the customer"));
        assert!(prompt.contains("- create_order: Creating the order"));
    }
}
