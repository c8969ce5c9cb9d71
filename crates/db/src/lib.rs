pub mod connection;
pub mod fixtures;
pub mod gateway;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedResult, TenantSeed};
pub use gateway::{Gateway, TxHandle};
pub use repositories::{
    CatalogRegistry, FinancialLedger, InMemorySessionStore, QuoteEngine, RepositoryError,
    SaleLedger, SessionStore, SqlSessionStore, TenantRegistry,
};
