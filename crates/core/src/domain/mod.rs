pub mod budget;
pub mod catalog;
pub mod customer;
pub mod finance;
pub mod line;
pub mod sale;
pub mod sequence;
pub mod session;
pub mod stock;
pub mod tenancy;
