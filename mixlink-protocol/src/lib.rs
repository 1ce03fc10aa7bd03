//! Wire-level packet, line-grammar and JSON-RPC primitives shared by the
//! ATEM, vMix and obs-websocket switcher backends.
//!
//! Everything here is pure data-in/data-out: no sockets, no async, no
//! logging side effects. The `mixlink` crate builds the actual network
//! clients on top of these types.
pub mod atem;
pub mod error;
pub mod obs;
pub mod tally;
pub mod vmix;

pub use error::{Error, Result};
pub use tally::{effective_camera_limit, tally_get, tally_set, tally_unpack, TallyValue, MAX_CHANNELS};
