//! Live notification channel: transport, connection manager, fallback
//! poller, and the lifecycle binding that drives them.

pub mod binding;
pub mod events;
pub mod manager;
pub mod poller;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{BindingPhase, NotificationBinding};
pub use events::{ReadyState, TransportEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use manager::{ConnectionManager, MessageCallback, Subscription};
pub use poller::{FallbackPoller, PollerLease, RefreshFn};
pub use transport::{Channel, ChannelCloser, Connector, TungsteniteConnector};
