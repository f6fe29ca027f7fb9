//! Batched, cached, fault-tolerant lookups for a loan-collection dashboard.
//!
//! Dashboard tables ask for per-application values (payment status, PTP
//! date, collection status) for hundreds of rows at once. [`BatchLoader`]
//! serves those lookups from a TTL cache, coalesces identical in-flight
//! requests, splits id lists into bounded chunks and degrades to partial or
//! empty results behind a circuit breaker. [`LookupView`] adds debouncing
//! with last-call-wins semantics and a loading flag for the UI.

pub mod breaker;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod debounce;
pub mod kinds;
pub mod loader;
pub mod source;
pub mod view;

pub use breaker::CircuitBreaker;
pub use cache::{CacheKey, Invalidation};
pub use config::Config;
pub use debounce::{CallToken, Debouncer, Outcome, Phase, RetryPolicy};
pub use kinds::LookupKind;
pub use loader::{BatchLoader, BatchMap, BatchResult, LookupPolicy};
pub use source::{ChunkQuery, DataSource, EntityId, ResultRecord, Scope};
pub use view::LookupView;
