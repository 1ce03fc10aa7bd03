//! Async client for Blackmagic ATEM, vMix and OBS Studio video switchers,
//! unified behind one [`facade::Switcher`] handle.
//!
//! Each backend lives in its own module (`atem`, `vmix`, `obs`) with a
//! `state` type mirroring the switcher's live state and a `client` type
//! owning the socket and background pump task. [`facade::Switcher`]
//! dispatches a single vocabulary of operations across whichever backend
//! it was constructed for.

pub mod atem;
pub mod error;
pub mod facade;
pub mod obs;
pub mod report;
pub mod types;
pub mod vmix;

pub use error::{Error, Result};
pub use facade::Switcher;
pub use mixlink_protocol::{tally_get, tally_set, tally_unpack, TallyValue};
pub use types::{CameraLimits, SwitcherEvent, SwitcherInfo, SwitcherState, SwitcherType};
