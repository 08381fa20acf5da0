//! Top-up Realtime - live order and payment status for a top-up store.
//!
//! A `RealtimeOrderChannel` keeps one authenticated connection to the
//! realtime server, tracks the orders the client follows and fans inbound
//! events out to listeners. `OrderWatch` narrows that to a single order,
//! and the `api` module creates the orders in the first place.
//!
//! ```no_run
//! use topup_realtime::{OrderWatch, RealtimeConfig, RealtimeOrderChannel};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RealtimeConfig::from_env()?;
//! let channel = RealtimeOrderChannel::from_config(&config);
//! channel.connect("user-42").await?;
//!
//! let mut watch = OrderWatch::start(&channel, "ORD-1");
//! let settled = watch.wait_terminal().await?;
//! println!("{} -> {:?}", settled.order_id, settled.status);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod transport;
pub mod watch;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{
    AccessToken, CreateOrderRequest, HttpOrderApi, OrderApi, OrderReceipt, RefreshCoordinator,
    TokenRefresher, TokenStore,
};
pub use channel::{AuthState, Connection, ConnectionState, Listener, RealtimeOrderChannel};
pub use config::{OrderFilter, RealtimeConfig};
pub use error::{ApiError, ChannelError, ConfigError, TransportError};
pub use transport::{ReconnectPolicy, Transport, TransportEvent, WebSocketTransport};
pub use watch::{place_and_watch, OrderWatch};

pub use topup_protocol::{EventKind, OrderId, OrderStatus, OrderUpdate};
