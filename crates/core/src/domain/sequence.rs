use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Document families numbered per (company, kind, year).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Budget,
    Sale,
}

impl DocumentKind {
    /// Scope key stored in `sequences.key`.
    pub fn sequence_key(&self) -> &'static str {
        match self {
            Self::Budget => "BUDGET",
            Self::Sale => "SALE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentPrefixes {
    pub budget: String,
    pub sale: String,
}

impl Default for DocumentPrefixes {
    fn default() -> Self {
        Self { budget: "ORC".to_string(), sale: "VEN".to_string() }
    }
}

impl DocumentPrefixes {
    pub fn for_kind(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Budget => &self.budget,
            DocumentKind::Sale => &self.sale,
        }
    }

    pub fn format(&self, kind: DocumentKind, year: i32, number: i64) -> String {
        format_document_code(self.for_kind(kind), year, number)
    }
}

/// `{PREFIX}-{YEAR}-{NUMBER}` with the number zero-padded to four digits so codes sort within a year.
pub fn format_document_code(prefix: &str, year: i32, number: i64) -> String {
    format!("{prefix}-{year}-{number:04}")
}

/// Calendar year as seen by the business, which matters on New Year's Eve in UTC-3.
pub fn business_year(now: DateTime<Utc>, offset: FixedOffset) -> i32 {
    now.with_timezone(&offset).year()
}
