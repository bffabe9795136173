//! A polling client for the chatrelay server.
//!
//! The [SyncEngine] owns a single [Session]: the desired and effective
//! nickname, the local message view, the resumption cursor, the user list
//! and the topic. It negotiates a unique nickname on join, polls the
//! relay log on a timer, keeps the presence lease alive with heartbeats,
//! and reconciles locally echoed messages with the relay's copies so each
//! message shows exactly once.

#![deny(missing_docs)]

mod config;
pub use config::*;

mod session_id;
pub use session_id::*;

mod transport;
pub use transport::*;

mod negotiate;
pub use negotiate::*;

mod session;
pub use session::*;

mod engine;
pub use engine::*;
