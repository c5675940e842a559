//! API lifecycle events.
//!
//! The gateway reactor publishes a [`LifecycleEvent`] every time an API is
//! deployed, undeployed or updated on the node. The key cache service
//! subscribes once its scheduler has started.
//!
//! ```text
//!   reactor ──send_deploy()──► EventBroadcaster ──► key cache service
//!                                     │
//!                                     └──────────► other listeners
//! ```

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{LifecycleEvent, LifecycleEventKind};
