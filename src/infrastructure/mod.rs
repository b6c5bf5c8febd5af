//! Concrete adapters for the domain's repository and port traits.

pub mod repositories;

pub use repositories::{InMemoryBacktestRepository, InMemoryCandleRepository};
