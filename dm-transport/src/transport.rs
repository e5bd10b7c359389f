//! The transport seam consumed by the device-management client

use std::sync::Arc;
use std::thread::ThreadId;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::message::{Message, QoS};

/// Callback invoked on the transport's delivery thread for each inbound message
///
/// Handlers must return quickly; anything that may block belongs on another
/// thread.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Receives connection state changes from a transport
pub trait ConnectionListener: Send + Sync {
    /// The connection dropped without `disconnect` being called
    fn connection_lost(&self, cause: &TransportError);

    /// A `connect` after a loss succeeded
    fn reconnected(&self);
}

/// Topic-addressed, at-least-once publish/subscribe channel
///
/// Implementations own the raw connection, TLS and credentials. Publishes
/// accepted while the connection is down (QoS >= 1) are kept until
/// acknowledged and can be collected with [`Transport::take_pending`].
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<()>;

    /// Close the connection deliberately; listeners are not notified
    fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;

    /// Register `handler` for topics matching `filter`
    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Result<()>;

    fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Remove and return publishes accepted but not yet acknowledged, oldest first
    fn take_pending(&self) -> Vec<Message>;

    fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>);

    /// Thread that runs subscription handlers, when the transport knows it up front
    fn delivery_thread(&self) -> Option<ThreadId> {
        None
    }
}
