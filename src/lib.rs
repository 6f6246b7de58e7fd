pub mod cache;
pub mod exchange;
pub mod indicator;
pub mod logging;
pub mod observability;
pub mod resilience;
pub mod strategy;
pub mod timeutil;
pub mod types;
