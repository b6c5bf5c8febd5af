//! Orchestration layer: composes domain types with concrete I/O ports.
//! Nothing here owns business rules on its own — it wires the domain's
//! traits and data types into runnable services.

pub mod backtest_engine;
pub mod candle_availability;
pub mod exchange_cache;
pub mod executor;
pub mod job_service;
pub mod scheduler;
pub mod strategies;
