pub mod health;
pub mod subscriptions;
