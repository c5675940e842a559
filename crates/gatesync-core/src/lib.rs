pub mod error;
pub mod events;
pub mod model;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{EventBroadcaster, LifecycleEvent, LifecycleEventKind};
pub use model::{Api, ApiKey, Plan, PlanSecurityType, Subscription, SubscriptionStatus};
pub use time::{RefreshWindow, Watermark, now_utc, parse_instant};
