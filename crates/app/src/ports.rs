//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod capability_io;
pub mod clock;
pub mod key_value_store;

pub use capability_io::{CapabilityIo, Subscription, SubscriptionId, ValueStream};
pub use clock::{Clock, SystemClock};
pub use key_value_store::KeyValueStore;
