pub mod bus;
pub mod types;

pub use bus::{BusEvent, Envelope, EventBus, EventMetadata, Middleware, SubscriptionId};
pub use types::{CacheScope, InternalEvent, MonitoringScope, PublicEvent, SyncDelta};
