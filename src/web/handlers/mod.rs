pub mod health;
pub mod join_to_create;
pub mod metrics;
