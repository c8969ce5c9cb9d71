use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use gestflow_core::config::BusinessConfig;
use gestflow_core::domain::budget::{Budget, BudgetStatus};
use gestflow_core::domain::catalog::ItemRef;
use gestflow_core::domain::customer::Customer;
use gestflow_core::domain::session::{ConversationState, SessionState};
use gestflow_core::domain::tenancy::{CompanyId, User};
use gestflow_core::errors::{ApplicationError, DomainError};
use gestflow_db::{
    CatalogRegistry, Gateway, QuoteEngine, SaleLedger, SessionStore, TenantRegistry,
};

use crate::command::{parse_command, Command, ItemLine};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};

const MENU: &str = "GestFlow menu:\n\
    - budget: start a new budget\n\
    - stock CODE: current stock of a product\n\
    - cancel: leave the current step\n\
    While building a budget send one `CODE QTY` per line, then `done`.";

const EMPTY_PROMPT: &str = "Send `menu` to see what I can do.";

/// Turns inbound chat text into ledger operations, one stateless request at a time.
pub struct ConversationRuntime {
    sessions: Arc<dyn SessionStore>,
    tenants: TenantRegistry,
    catalog: CatalogRegistry,
    quotes: QuoteEngine,
    sales: SaleLedger,
    guardrails: GuardrailPolicy,
}

impl ConversationRuntime {
    pub fn new(gateway: Gateway, business: BusinessConfig, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            tenants: TenantRegistry::new(gateway.clone()),
            catalog: CatalogRegistry::new(gateway.clone()),
            quotes: QuoteEngine::new(gateway.clone(), business.clone()),
            sales: SaleLedger::new(gateway, business.clone()),
            guardrails: GuardrailPolicy::from_business(&business),
        }
    }

    /// Always produces a reply; failures become user-facing messages tagged with a correlation id
    /// in the logs.
    pub async fn handle_message(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        text: &str,
    ) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        let reply = match self.dispatch(company_id, chat_identity, text).await {
            Ok(reply) => reply,
            Err(error) => {
                let interface = error.into_interface(correlation_id.clone());
                warn!(
                    event_name = "conversation.failed",
                    company_id = company_id.0,
                    correlation_id = %correlation_id,
                    error = %interface,
                    "conversation step failed"
                );
                interface.user_message().to_string()
            }
        };

        info!(
            event_name = "conversation.replied",
            company_id = company_id.0,
            correlation_id = %correlation_id,
            reply_chars = reply.chars().count(),
            "reply produced"
        );
        self.guardrails.fit_reply(reply)
    }

    async fn dispatch(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        text: &str,
    ) -> Result<String, ApplicationError> {
        let sender = self.tenants.find_user_by_chat_identity(company_id, chat_identity).await?;
        let user = match (self.guardrails.evaluate(sender.as_ref()), sender) {
            (GuardrailDecision::Allow, Some(user)) => user,
            (GuardrailDecision::Deny { reason_code, user_message }, _) => {
                info!(event_name = "conversation.denied", company_id = company_id.0, reason_code);
                return Ok(user_message);
            }
            (GuardrailDecision::Allow, None) => {
                return Err(DomainError::not_found("user", chat_identity).into())
            }
        };

        let session = self.sessions.load(company_id, chat_identity).await?;
        match (parse_command(text), session.state) {
            (Command::Empty, _) => Ok(EMPTY_PROMPT.to_string()),
            (Command::Menu, _) => Ok(MENU.to_string()),
            (Command::Cancel, state) => self.cancel(company_id, chat_identity, state).await,
            (Command::Stock { code }, _) => self.stock_reply(company_id, &code).await,

            (Command::StartBudget, ConversationState::Idle | ConversationState::ChoosingCustomer) => {
                self.start_budget(company_id, chat_identity).await
            }
            (Command::StartBudget, ConversationState::BuildingBudget { budget_code, .. }) => {
                Ok(format!("Budget {budget_code} is still open. Send `done` or `cancel` first."))
            }

            (Command::Text(_) | Command::Items(_), ConversationState::ChoosingCustomer) => {
                self.choose_customer(company_id, chat_identity, &user, text.trim()).await
            }
            (Command::Items(lines), ConversationState::BuildingBudget { budget_id, .. }) => {
                let mut budget = self.quotes.get(company_id, budget_id).await?;
                for line in lines {
                    budget = self.add_line(company_id, &budget, line).await?;
                }
                Ok(format!("{}\nSend more lines or `done`.", describe_budget(&budget)))
            }
            (Command::Done, ConversationState::BuildingBudget { budget_id, .. }) => {
                let budget =
                    self.quotes.transition(company_id, budget_id, BudgetStatus::Confirmed).await?;
                self.sessions.reset(company_id, chat_identity).await?;
                info!(
                    event_name = "conversation.budget_confirmed",
                    company_id = company_id.0,
                    budget_code = %budget.code,
                    "budget confirmed from chat"
                );
                Ok(format!(
                    "Budget {} confirmed.\n{}\nValid until {}.",
                    budget.code,
                    describe_budget(&budget),
                    self.quotes.valid_until(&budget).format("%d/%m/%Y")
                ))
            }
            (Command::Done, ConversationState::ChoosingCustomer) => {
                Ok("Choose a customer first: reply with the number or the name.".to_string())
            }
            (Command::Items(_) | Command::Done, ConversationState::Idle) => {
                Ok("No budget is open. Send `budget` to start one.".to_string())
            }
            (Command::Text(_), ConversationState::BuildingBudget { .. }) => {
                Ok("Send one `CODE QTY` per line, `done` to confirm or `cancel` to stop.".to_string())
            }
            (Command::Text(_), ConversationState::Idle) => {
                Ok(format!("I did not understand that.\n{EMPTY_PROMPT}"))
            }
        }
    }

    async fn cancel(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        state: ConversationState,
    ) -> Result<String, ApplicationError> {
        self.sessions.reset(company_id, chat_identity).await?;
        Ok(match state {
            ConversationState::Idle => "Nothing to cancel.".to_string(),
            ConversationState::ChoosingCustomer => "Budget start cancelled.".to_string(),
            ConversationState::BuildingBudget { budget_code, .. } => {
                format!("Stopped. Budget {budget_code} stays saved as a draft.")
            }
        })
    }

    async fn start_budget(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
    ) -> Result<String, ApplicationError> {
        let customers = self.catalog.list_customers(company_id, false).await?;
        if customers.is_empty() {
            return Ok("No active customers are registered yet.".to_string());
        }
        self.save_state(company_id, chat_identity, ConversationState::ChoosingCustomer).await?;

        let listing = customers
            .iter()
            .enumerate()
            .map(|(index, customer)| format!("{}. {}", index + 1, customer.name))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Who is the budget for? Reply with the number or the name.\n{listing}"))
    }

    async fn choose_customer(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        user: &User,
        choice: &str,
    ) -> Result<String, ApplicationError> {
        let customers = self.catalog.list_customers(company_id, false).await?;
        let Some(customer) = pick_customer(&customers, choice) else {
            return Ok(format!(
                "No single customer matches \"{choice}\". Reply with the number from the list."
            ));
        };

        let budget = self.quotes.create_draft(company_id, customer.id, Some(user.id)).await?;
        self.save_state(
            company_id,
            chat_identity,
            ConversationState::BuildingBudget { budget_id: budget.id, budget_code: budget.code.clone() },
        )
        .await?;
        Ok(format!(
            "Budget {} opened for {}.\nSend one `CODE QTY` per line, then `done`.",
            budget.code, customer.name
        ))
    }

    async fn add_line(
        &self,
        company_id: CompanyId,
        budget: &Budget,
        line: ItemLine,
    ) -> Result<Budget, ApplicationError> {
        let item = self
            .catalog
            .find_by_code(company_id, &line.code)
            .await?
            .ok_or_else(|| DomainError::not_found("catalog item", &line.code))?;
        self.quotes.add_item(company_id, budget.id, item.item, line.qty).await
    }

    async fn stock_reply(&self, company_id: CompanyId, code: &str) -> Result<String, ApplicationError> {
        let item = self
            .catalog
            .find_by_code(company_id, code)
            .await?
            .ok_or_else(|| DomainError::not_found("catalog item", code))?;
        match item.item {
            ItemRef::Product(product_id) => {
                let level = self.sales.current_stock(company_id, product_id).await?;
                Ok(format!("Stock of {} {}: {}", item.code, item.name, level.normalize()))
            }
            ItemRef::Service(_) => Ok(format!("{} is a service and carries no stock.", item.code)),
        }
    }

    async fn save_state(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        state: ConversationState,
    ) -> Result<SessionState, ApplicationError> {
        self.sessions
            .save(company_id, chat_identity, SessionState { state, updated_at: Some(Utc::now()) })
            .await
    }
}

/// A list number, an exact name, or a name fragment that matches exactly one customer.
fn pick_customer<'a>(customers: &'a [Customer], choice: &str) -> Option<&'a Customer> {
    let choice = choice.trim();
    if let Ok(number) = choice.parse::<usize>() {
        return number.checked_sub(1).and_then(|index| customers.get(index));
    }

    let wanted = choice.to_lowercase();
    if let Some(exact) = customers.iter().find(|customer| customer.name.to_lowercase() == wanted) {
        return Some(exact);
    }
    let mut partial =
        customers.iter().filter(|customer| customer.name.to_lowercase().contains(&wanted));
    match (partial.next(), partial.next()) {
        (Some(customer), None) => Some(customer),
        _ => None,
    }
}

fn describe_budget(budget: &Budget) -> String {
    let mut lines = vec![format!("Budget {}:", budget.code)];
    lines.extend(budget.items.iter().map(|line| {
        format!(
            "- {} x{} @ {:.2} = {:.2}",
            line.description_snapshot,
            line.qty.normalize(),
            line.unit_price,
            line.subtotal
        )
    }));
    lines.push(format!("Total: {:.2}", budget.total));
    lines.join("\n")
}
