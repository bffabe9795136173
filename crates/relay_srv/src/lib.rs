#![deny(missing_docs)]
//! chatrelay_srv is a polling chat relay: an HTTP JSON server holding a
//! short-lived append log of chat records, a table of presence leases and
//! a single channel topic.
//!
//! Clients keep no connection open. They poll the log with a cursor,
//! renew their presence lease with heartbeats, and post records. Every
//! request opportunistically runs maintenance: leases not renewed in time
//! are evicted with a "left (timeout)" record, and records older than the
//! relay window are pruned.
//!
//! For additional details, please see the [protocol].

/// This is a documentation module containing the relay protocol.
///
/// #### 1. Types
///
/// - `RecordId` - string containing an exact decimal: epoch seconds, a
///                dot, and ten fractional digits. Ids are unique and
///                strictly increasing in append order. Clients compare them
///                only through the `since` cursor.
/// - `Rfc3339` - string containing an RFC 3339 UTC timestamp.
///
/// ```text
/// Record = {
///   "id": RecordId,
///   "type": "chat" | "system",
///   "text": string,
///   "user": string,        // absent on system records
///   "timestamp": Rfc3339
/// }
/// Topic = { "topic": string, "author": string, "modified": string }
/// PresenceEntry = {
///   "nickname": string,
///   "id": string,          // session id, optional
///   "lat": number,         // optional
///   "lon": number,         // optional
///   "lastSeen": number     // epoch seconds
/// }
/// ```
///
/// #### 2. REST API
///
/// ##### 2.1. In Brief
///
/// The relay answers at `/`, `/chat` and `/chat.php`. The `action` query
/// parameter selects what to do. It defaults to `messages`, and
/// `chat.php` is accepted as an alias for `messages`.
///
/// ```text
/// ErrResponse = { "error": string }
/// StatusResponse = { "status": "ok" }
/// ```
///
/// - `GET ?action=messages&since=<RecordId>`
///   - Response Body: `[ Record, .. ]`
/// - `POST ?action=messages`
///   - Request Body: `{ "text": string, "type"?: string, "user"?: string }`
///   - Response Body: `Record` with status 201
/// - `GET ?action=topic`
///   - Response Body: `Topic`
/// - `POST ?action=topic`
///   - Request Body: `{ "topic": string, "user"?: string }`
///   - Response Body: `Topic`
/// - `POST ?action=presence`
///   - Request Body: `{ "nickname": string, "id"?: string, "lat"?, "lon"? }`
///   - Response Body: `StatusResponse`
/// - `GET ?action=presence`
///   - Response Body: `[ PresenceEntry, .. ]`
/// - `POST ?action=leave`
///   - Request Body: `{ "nickname": string }`
///   - Response Body: `StatusResponse`
/// - `?action=users`, any method
///   - Response Body: `[ string, .. ]`
/// - `GET /health`
///   - Response Body: `{}`
///
/// Any other action, or a known action with a malformed body, yields
/// status 404 with `{ "error": "Action <action> Not Found" }`. Internal
/// failures yield status 500 with an `ErrResponse`.
///
/// Every response carries permissive CORS headers. `OPTIONS` on the relay
/// paths is answered with 204 and no body.
///
/// ##### 2.2. Messages
///
/// - The server MUST assign `id` and `timestamp` to a posted record,
///   ignoring any client supplied values.
/// - A posted record without `type` is a `chat` record.
/// - A posted record with a `user` renews that user's presence lease
///   without announcing a join.
/// - `since` returns only records whose id is strictly greater. If it is
///   absent, unparsable, or zero, the whole log is returned.
///
/// ##### 2.3. Presence
///
/// - A heartbeat for a nickname without a lease creates the lease and
///   appends `*** <nickname> has joined the channel`. A heartbeat for a
///   nickname with a lease only renews it.
/// - `leave` drops the lease and always appends
///   `*** <nickname> has left (disconnected)`.
///
/// ##### 2.4. Topic
///
/// - Setting the topic appends `*** <user> changed the topic to: <topic>`.
///   Without a `user` the author is the configured default author.
/// - Reading the topic does not run maintenance.
///
/// #### 3. Maintenance
///
/// Before every request except topic reads, health checks and preflight,
/// the server attempts a sweep. If another sweep is in progress the
/// attempt is skipped.
///
/// - A lease whose last renewal is more than the presence timeout
///   (default 45 seconds) in the past is evicted and
///   `*** <nickname> has left (timeout)` is appended.
/// - Records whose id is at least the relay window (default 30 seconds)
///   old are pruned.
///
/// The server additionally sweeps on an interval so leases expire on an
/// idle relay.
///
/// #### 4. Storage
///
/// With a data directory configured, the log, presence table and topic are
/// each written through to `chat-log.json`, `chat-users.json` and
/// `chat-topic.json` by atomic rename. A missing or unreadable file is
/// loaded as empty.
#[cfg(doc)]
pub mod protocol {}

mod config;
pub use config::*;

mod store;

mod log;

mod presence;

mod topic;

mod sweep;
pub use sweep::SweepReport;

mod relay;
pub use relay::*;

mod parse;
use parse::*;

mod http;
use http::*;

mod server;
pub use server::*;
