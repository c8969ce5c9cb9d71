use gestflow_core::config::BusinessConfig;
use gestflow_core::domain::tenancy::User;

const TRUNCATION_MARKER: &str = "...";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_message_length: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_message_length: 1500 }
    }
}

impl GuardrailPolicy {
    pub fn from_business(business: &BusinessConfig) -> Self {
        Self { max_message_length: business.max_message_length }
    }

    /// Senders must be registered users of the company the message was addressed to.
    pub fn evaluate(&self, sender: Option<&User>) -> GuardrailDecision {
        match sender {
            Some(_) => GuardrailDecision::Allow,
            None => GuardrailDecision::Deny {
                reason_code: "unknown_chat_identity",
                user_message:
                    "This number is not registered for this company. Ask the owner to add you."
                        .to_string(),
            },
        }
    }

    /// Cuts a reply to `max_message_length` characters, marking the cut.
    pub fn fit_reply(&self, reply: String) -> String {
        if reply.chars().count() <= self.max_message_length {
            return reply;
        }
        let keep = self.max_message_length.saturating_sub(TRUNCATION_MARKER.len());
        let mut fitted: String = reply.chars().take(keep).collect();
        fitted.push_str(TRUNCATION_MARKER);
        fitted
    }
}
