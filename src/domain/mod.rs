//! Domain model: transactions, tenant policies, daily aggregates, the rule
//! set and the orchestration step log, plus the ports the application layer
//! talks to.

pub mod account;
pub mod orchestration;
pub mod policy;
pub mod ports;
pub mod rules;
pub mod transaction;
pub mod velocity;
pub mod violation;
