pub mod config;
pub mod domain;
pub mod errors;

pub use chrono;
pub use rust_decimal;

pub use domain::budget::{Budget, BudgetId, BudgetStatus};
pub use domain::catalog::{CatalogItem, ItemRef, ItemType, ProductId, ServiceId};
pub use domain::customer::{Customer, CustomerId};
pub use domain::finance::{
    CancelPolicy, Payable, PayableId, Payment, PaymentId, PaymentMethod, PaymentOrigin,
    PaymentRequest, Receivable, ReceivableId, SettlementStatus,
};
pub use domain::sale::{Sale, SaleId, SaleStatus};
pub use domain::tenancy::{CompanyId, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
