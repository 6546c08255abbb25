//! Agent Client Protocol (ACP) client.
//!
//! JSON-RPC 2.0 over newline-delimited JSON on the agent's stdio. The
//! bridge is the *client* side: it drives sessions and serves the agent's
//! permission and terminal requests.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: JSON-RPC envelope classification and serialization.
//! - `schema`: typed method payloads.
//! - `pending`: outstanding outbound requests and their deadlines.
//! - `terminal`: subprocesses run on the agent's behalf.
//! - `router` / `events`: per-session event delivery.
//! - `reader` / `writer`: the two stream tasks.
//! - `client`: the public connection handle.
//! - `spawner`: launching an agent process.

pub mod client;
pub mod codec;
pub mod events;
pub mod message;
pub mod pending;
pub(crate) mod reader;
pub mod router;
pub mod schema;
pub mod spawner;
pub mod terminal;
pub mod writer;
