//! Packed tally representation shared by all three backends.
//!
//! A packed tally is a 64-bit integer encoding up to 20 channels, 2 bits
//! per channel, channel `i` occupying bits `[2*i, 2*i+1]`.

/// Maximum number of channels a packed tally can represent.
pub const MAX_CHANNELS: u8 = 20;

/// Per-channel tally state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TallyValue {
    #[default]
    Off = 0,
    Program = 1,
    Preview = 2,
    Both = 3,
}

impl TallyValue {
    pub const fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => Self::Off,
            1 => Self::Program,
            2 => Self::Preview,
            _ => Self::Both,
        }
    }

    pub const fn bits(self) -> u64 {
        self as u64
    }

    pub const fn is_program(self) -> bool {
        matches!(self, Self::Program | Self::Both)
    }

    pub const fn is_preview(self) -> bool {
        matches!(self, Self::Preview | Self::Both)
    }
}

/// Reads channel `index`'s 2-bit state out of a packed tally value.
///
/// Channels beyond [`MAX_CHANNELS`] always read as [`TallyValue::Off`].
pub const fn tally_get(packed: u64, index: u8) -> TallyValue {
    if index >= MAX_CHANNELS {
        return TallyValue::Off;
    }
    TallyValue::from_bits(packed >> (index * 2))
}

/// Returns a packed tally with channel `index` set to `value` and every
/// other channel left untouched.
pub const fn tally_set(packed: u64, index: u8, value: TallyValue) -> u64 {
    if index >= MAX_CHANNELS {
        return packed;
    }
    let shift = index * 2;
    let mask = !(0b11u64 << shift);
    (packed & mask) | (value.bits() << shift)
}

/// Splits a packed tally into 1-based program/preview channel lists.
///
/// Iterates channels `0..num_cameras.min(MAX_CHANNELS)`; a channel in state
/// `Both` contributes to both lists.
pub fn tally_unpack(packed: u64, num_cameras: u8) -> (Vec<u8>, Vec<u8>) {
    let limit = num_cameras.min(MAX_CHANNELS);
    let mut program = Vec::new();
    let mut preview = Vec::new();
    for i in 0..limit {
        let v = tally_get(packed, i);
        if v.is_program() {
            program.push(i + 1);
        }
        if v.is_preview() {
            preview.push(i + 1);
        }
    }
    (program, preview)
}

/// Computes the effective camera limit from the user-configured limit and
/// the switcher-discovered camera count.
///
/// `effective_camera_limit(user_limit, num_cameras) = min(20, user_limit==0
/// ? (num_cameras>0 ? num_cameras : 20) : min(user_limit, num_cameras>0 ?
/// num_cameras : user_limit))`
pub fn effective_camera_limit(user_limit: u8, num_cameras: u8) -> u8 {
    let uncapped = if user_limit == 0 {
        if num_cameras > 0 {
            num_cameras
        } else {
            MAX_CHANNELS
        }
    } else if num_cameras > 0 {
        user_limit.min(num_cameras)
    } else {
        user_limit
    };
    uncapped.min(MAX_CHANNELS)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_matches_shift_and_mask() {
        for i in 0..MAX_CHANNELS {
            let t: u64 = 0xDEAD_BEEF_CAFE_F00D;
            assert_eq!(tally_get(t, i).bits(), (t >> (i * 2)) & 3);
        }
    }

    #[test]
    fn set_then_get_is_isolated() {
        for i in 0..MAX_CHANNELS {
            for v in [
                TallyValue::Off,
                TallyValue::Program,
                TallyValue::Preview,
                TallyValue::Both,
            ] {
                let packed = tally_set(0, i, v);
                assert_eq!(tally_get(packed, i), v);
                for j in 0..MAX_CHANNELS {
                    if j != i {
                        assert_eq!(tally_get(packed, j), TallyValue::Off);
                    }
                }
            }
        }
    }

    #[test]
    fn effective_limit_matches_formula() {
        assert_eq!(effective_camera_limit(0, 0), 20);
        assert_eq!(effective_camera_limit(0, 6), 6);
        assert_eq!(effective_camera_limit(4, 0), 4);
        assert_eq!(effective_camera_limit(4, 6), 4);
        assert_eq!(effective_camera_limit(8, 6), 6);
        assert_eq!(effective_camera_limit(30, 0), 20);
        assert_eq!(effective_camera_limit(0, 30), 20);
    }

    #[test]
    fn unpack_example_from_spec() {
        // channels 0..3 = Off, Pgm, Pvw, Both
        let mut packed = 0u64;
        packed = tally_set(packed, 0, TallyValue::Off);
        packed = tally_set(packed, 1, TallyValue::Program);
        packed = tally_set(packed, 2, TallyValue::Preview);
        packed = tally_set(packed, 3, TallyValue::Both);
        let (pgm, pvw) = tally_unpack(packed, 4);
        assert_eq!(pgm, vec![2, 4]);
        assert_eq!(pvw, vec![3, 4]);
    }
}
