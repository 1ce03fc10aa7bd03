//! In-memory mirror of a vMix connection's tally state.
use mixlink_protocol::vmix::pack_raw_tally;
use mixlink_protocol::TallyValue;

use crate::types::{CameraLimits, SwitcherInfo, SwitcherState};

pub const MAX_RAW_CHANNELS: usize = 64;

#[derive(Debug, Clone)]
pub struct VmixState {
    pub subscribed: bool,
    pub raw_tally: Vec<u8>,
    pub tally_packed: u64,
    pub program_input: u8,
    pub preview_input: u8,
    pub camera_limits: CameraLimits,
}

impl Default for VmixState {
    fn default() -> Self {
        Self {
            subscribed: false,
            raw_tally: Vec::new(),
            tally_packed: 0,
            program_input: 0,
            preview_input: 0,
            camera_limits: CameraLimits::default(),
        }
    }
}

impl VmixState {
    /// Applies a `TALLY OK <digits>` response: updates the raw and packed
    /// tally, the first-hit program/preview channels, and the camera count.
    pub fn apply_tally_digits(&mut self, digits: &[u8]) {
        let raw: Vec<u8> = digits.iter().copied().take(MAX_RAW_CHANNELS).collect();
        let (packed, program, preview) = pack_raw_tally(&raw);
        self.raw_tally = raw;
        self.tally_packed = packed;
        self.program_input = program;
        self.preview_input = preview;
        self.camera_limits.num_cameras = self
            .raw_tally
            .len()
            .min(MAX_RAW_CHANNELS) as u8;
    }

    /// Reads channel `index`'s raw digit, including channels beyond the
    /// packed tally's 20-channel window. `None` if vMix hasn't reported
    /// that many channels yet.
    pub fn raw_tally_at(&self, index: usize) -> Option<TallyValue> {
        self.raw_tally.get(index).map(|&digit| TallyValue::from_bits(digit as u64))
    }

    pub fn info(&self) -> SwitcherInfo {
        SwitcherInfo {
            product_name: "vMix".to_string(),
            num_cameras: self.camera_limits.num_cameras,
            num_mes: 1,
            keyers_per_me: Vec::new(),
        }
    }

    pub fn state(&self, connected: bool) -> SwitcherState {
        SwitcherState {
            connected,
            initialized: self.subscribed,
            program_input: self.program_input as u16,
            preview_input: self.preview_input as u16,
            tally_packed: self.tally_packed,
            in_transition: false,
            transition_position: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tally_digits_update_packed_and_first_hit_indices() {
        let mut state = VmixState::default();
        state.apply_tally_digits(&[0, 1, 2, 0, 0]);
        assert_eq!(state.program_input, 2);
        assert_eq!(state.preview_input, 3);
        assert_eq!(state.camera_limits.num_cameras, 5);
    }

    #[test]
    fn raw_tally_at_reaches_channels_past_the_packed_window() {
        let mut digits = vec![0u8; 25];
        digits[24] = 2;
        let mut state = VmixState::default();
        state.apply_tally_digits(&digits);
        assert_eq!(state.raw_tally_at(24), Some(TallyValue::Preview));
        assert_eq!(state.raw_tally_at(99), None);
    }
}
