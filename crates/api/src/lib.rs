#![deny(missing_docs)]
//! Chatrelay API contains the wire types exchanged between the chatrelay
//! server and its polling clients, and the record identity generator
//! both sides agree on.
//!
//! All types encode to JSON as served by the relay's HTTP surface.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

mod error;
pub use error::*;

mod timestamp;
pub use timestamp::*;

pub mod id;
pub use id::{IdGenerator, RecordId};

mod record;
pub use record::*;

mod presence;
pub use presence::*;

mod topic;
pub use topic::*;
