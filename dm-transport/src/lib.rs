//! Transport seam for the device-management client
//!
//! The client talks to the server through the [`Transport`] trait: a
//! topic-addressed, at-least-once publish/subscribe channel whose concrete
//! implementation (MQTT client, TLS, credentials) lives outside this
//! workspace. This crate also provides:
//!
//! - [`topic_matches`]: MQTT-style `+`/`#` filter matching
//! - [`ReconnectPolicy`] / [`Reconnector`]: four-band reconnect backoff
//! - [`LoopbackTransport`]: an in-memory broker for tests and simulation
//!
//! # Example
//!
//! ```rust,ignore
//! use dm_transport::{LoopbackTransport, QoS, Transport};
//!
//! let transport = LoopbackTransport::new();
//! transport.connect()?;
//! transport.subscribe("iotdm-1/#", QoS::AtLeastOnce, Arc::new(|m| println!("{}", m.topic)))?;
//! transport.server().inject("iotdm-1/observe", r#"{"reqId":"1"}"#);
//! ```

pub mod error;
pub mod loopback;
pub mod message;
pub mod reconnect;
pub mod transport;

pub use error::{Result, TransportError};
pub use loopback::{LoopbackTransport, Responder, ServerEndpoint};
pub use message::{is_valid_filter, topic_matches, Message, QoS};
pub use reconnect::{BackoffBand, Connector, ReconnectPolicy, Reconnector};
pub use transport::{ConnectionListener, MessageHandler, Transport};
