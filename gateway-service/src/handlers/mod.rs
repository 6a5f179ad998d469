pub mod actions;
pub mod authz;
pub mod health;
pub mod metrics;
