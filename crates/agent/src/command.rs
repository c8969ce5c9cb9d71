use std::str::FromStr;

use rust_decimal::Decimal;

/// One `CODE QTY` line of a budget being built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemLine {
    pub code: String,
    pub qty: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Empty,
    Menu,
    Cancel,
    StartBudget,
    Done,
    Stock { code: String },
    Items(Vec<ItemLine>),
    /// Anything else; its meaning depends on the session state (e.g. a customer choice).
    Text(String),
}

pub fn parse_command(text: &str) -> Command {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let tokens = tokenize(trimmed);
    match tokens.as_slice() {
        [keyword] if is_one_of(keyword, &["menu", "help", "oi", "hi"]) => return Command::Menu,
        [keyword] if is_one_of(keyword, &["cancel", "cancelar", "sair"]) => return Command::Cancel,
        [keyword] if is_one_of(keyword, &["budget", "orcamento", "orçamento"]) => {
            return Command::StartBudget
        }
        [keyword] if is_one_of(keyword, &["done", "ok", "fim", "finalizar"]) => {
            return Command::Done
        }
        [keyword, code] if is_one_of(keyword, &["stock", "estoque"]) => {
            return Command::Stock { code: code.to_ascii_uppercase() }
        }
        _ => {}
    }

    match parse_item_lines(trimmed) {
        Some(lines) => Command::Items(lines),
        None => Command::Text(trimmed.to_string()),
    }
}

/// Every non-blank line must read `CODE QTY`; otherwise the message is not an item list.
fn parse_item_lines(text: &str) -> Option<Vec<ItemLine>> {
    let mut lines = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let tokens = tokenize(line);
        let [code, qty] = tokens.as_slice() else {
            return None;
        };
        if !code.chars().any(|character| character.is_ascii_alphabetic()) {
            return None;
        }
        lines.push(ItemLine { code: code.to_ascii_uppercase(), qty: parse_quantity(qty)? });
    }
    (!lines.is_empty()).then_some(lines)
}

/// Accepts `3`, `2.5` and the comma decimal separator `2,5`.
fn parse_quantity(token: &str) -> Option<Decimal> {
    let normalized = token.trim_start_matches(['x', 'X']).replace(',', ".");
    Decimal::from_str(&normalized).ok()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

fn is_one_of(token: &str, keywords: &[&str]) -> bool {
    let normalized = token.to_lowercase();
    keywords.contains(&normalized.as_str())
}
