//! Observable device-state tree
//!
//! Device state is modeled as a tree of named [`Resource`] nodes. Each node
//! holds a typed [`ResourceValue`], ordered children with unique names, and
//! two observer lists. Mutations can notify observers synchronously; events
//! bubble from the changed node to the root.
//!
//! # Quick Start
//!
//! ```rust
//! use resource_tree::{ChangeKind, Resource};
//!
//! let root = Resource::root();
//! let location = root.add_child("location", ()).unwrap();
//! let latitude = location.add_child("latitude", 0.0).unwrap();
//!
//! root.add_external_observer(|event| {
//!     assert_eq!(event.source, "location.latitude");
//!     assert_eq!(event.kind, ChangeKind::Updated);
//! });
//!
//! latitude.update(52.37, true).unwrap();
//! assert_eq!(root.to_wire()["location"]["latitude"], 52.37);
//! ```

pub mod error;
pub mod event;
pub mod resource;
pub mod value;

pub use error::{ResourceError, Result};
pub use event::{ChangeEvent, ChangeKind, Observer, ObserverId};
pub use resource::{Resource, PATH_SEPARATOR};
pub use value::ResourceValue;
