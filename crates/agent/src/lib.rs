//! Conversation runtime for the chat channel.
//!
//! Each inbound message is handled statelessly:
//! 1. **Access** (`guardrails`) - only chat identities registered for the company are served
//! 2. **Parsing** (`command`) - free text becomes a structured `Command`
//! 3. **Dispatch** (`runtime`) - the stored session state decides what the command means and
//!    which ledger service runs it
//! 4. **Reply** - errors are rendered through `InterfaceError::user_message` and every reply is
//!    cut to the configured message length
//!
//! The runtime never computes prices or totals itself. Those come from the ledger services in
//! `gestflow-db`.

pub mod command;
pub mod guardrails;
pub mod runtime;

pub use command::{parse_command, Command, ItemLine};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use runtime::ConversationRuntime;
