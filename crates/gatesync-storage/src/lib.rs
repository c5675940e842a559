//! # gatesync-storage
//!
//! Backing-store abstraction for the gatesync engine.
//!
//! The engine reads API keys and subscriptions through the
//! [`ApiKeyRepository`] and [`SubscriptionRepository`] traits. Real adapters
//! (relational or document stores) live outside this workspace; the
//! [`InMemoryRepository`] backs fixtures and tests.
//!
//! ## Example
//!
//! ```ignore
//! use gatesync_storage::{ApiKeyCriteria, ApiKeyRepository, StorageError};
//!
//! async fn live_keys(
//!     repo: &dyn ApiKeyRepository,
//!     plan: &str,
//! ) -> Result<usize, StorageError> {
//!     let keys = repo.find_by_criteria(&ApiKeyCriteria::full([plan])).await?;
//!     Ok(keys.len())
//! }
//! ```

mod error;
pub mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::{InMemoryRepository, StoreFixture};
pub use traits::{ApiKeyCriteria, ApiKeyRepository, SubscriptionCriteria, SubscriptionRepository};
