//! Entities shared by all three backends: the switcher tag, the unified
//! info/state snapshots, and the event stream the facade exposes in place
//! of a C-style callback table.
use mixlink_protocol::effective_camera_limit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitcherType {
    Atem,
    Vmix,
    Obs,
    /// Reserved tag for an unimplemented backend; creation always fails
    /// with `NotSupported`.
    Osee,
}

impl SwitcherType {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Atem => 9910,
            Self::Vmix => mixlink_protocol::vmix::DEFAULT_PORT,
            Self::Obs => mixlink_protocol::obs::DEFAULT_PORT,
            Self::Osee => 0,
        }
    }
}

/// Product/topology facts that don't change once a backend is initialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitcherInfo {
    pub product_name: String,
    pub num_cameras: u8,
    pub num_mes: u8,
    /// Keyer count per ME, in ME order. Empty for backends without a
    /// per-ME keyer concept (vMix, OBS).
    pub keyers_per_me: Vec<u8>,
}

/// A point-in-time snapshot of the switcher's live state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitcherState {
    pub connected: bool,
    pub initialized: bool,
    pub program_input: u16,
    pub preview_input: u16,
    pub tally_packed: u64,
    pub in_transition: bool,
    pub transition_position: u16,
}

/// Events delivered over a [`tokio::sync::broadcast::Receiver`] subscribed
/// via [`crate::facade::Switcher::subscribe`] -- the async equivalent of the
/// `on_connected`/`on_disconnected`/`on_tally_changed`/`on_state_changed`
/// callback set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitcherEvent {
    Connected,
    Disconnected,
    /// Fired only when the packed tally differs from the last value
    /// reported on this handle.
    TallyChanged(u64),
    StateChanged(&'static str),
}

/// Tracks the three inputs that govern camera-channel reporting: a
/// user-configured cap, an offset added to outward-facing channel numbers,
/// and the switcher-discovered camera count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraLimits {
    pub user_limit: u8,
    pub offset: u8,
    pub num_cameras: u8,
}

impl CameraLimits {
    pub fn effective_limit(&self) -> u8 {
        effective_camera_limit(self.user_limit, self.num_cameras)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_ports_match_protocol_constants() {
        assert_eq!(SwitcherType::Atem.default_port(), 9910);
        assert_eq!(SwitcherType::Vmix.default_port(), 8099);
        assert_eq!(SwitcherType::Obs.default_port(), 4455);
    }

    #[test]
    fn camera_limits_delegate_to_shared_formula() {
        let limits = CameraLimits {
            user_limit: 4,
            offset: 0,
            num_cameras: 6,
        };
        assert_eq!(limits.effective_limit(), 4);
    }
}
