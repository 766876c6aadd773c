//! Transport layer: websocket client and network-profile selection.

pub mod connectivity;
pub mod websocket;

pub use connectivity::{ConnectivityManager, ConnectivityOptions};
pub use websocket::{
    classify_error, reconnect_delay, ConnectionFailedReason, ConnectionOptions, TransportEvent,
    WebSocketTransport,
};
