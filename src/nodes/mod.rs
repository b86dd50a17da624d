//! Connected nodes
//!
//! Nodes are edge devices holding one long-lived connection each. The
//! registry maps node ids to live sessions and records connects and
//! disconnects in the directory.

pub mod names;
pub mod registry;
pub mod session;
pub mod types;

pub use registry::ConnectionRegistry;
pub use session::{Session, SessionEnd, SessionHandle};
pub use types::{CloudRequest, CloudResponse, JsonMap, NodeIdentity, NodeRequest, NodeResponse};
