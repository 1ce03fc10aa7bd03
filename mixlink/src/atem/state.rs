//! In-memory mirror of an ATEM switcher's topology and live state.
use std::collections::HashMap;

use mixlink_protocol::atem::InboundCommand;
use mixlink_protocol::tally::{tally_set, TallyValue};

use crate::types::{CameraLimits, SwitcherInfo, SwitcherState};

pub const MAX_MES: usize = 8;
pub const MAX_DSKS: usize = 4;
pub const MAX_KEYERS_PER_ME: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct MixEffectState {
    pub program_input: u16,
    pub preview_input: u16,
    pub style: u8,
    pub position: u16,
    pub in_transition: bool,
    pub preview_enabled: bool,
    pub next_background: bool,
    pub next_key_bitmap: u8,
    pub num_keyers: u8,
    pub keyer_on_air: [bool; MAX_KEYERS_PER_ME],
}

#[derive(Debug, Clone, Default)]
pub struct DskState {
    pub on_air: bool,
    pub in_transition: bool,
    pub tie: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InputInfo {
    pub source_id: u16,
    pub long_name: String,
    pub short_name: String,
}

#[derive(Debug, Clone)]
pub struct AtemState {
    pub session_id: u16,
    pub last_received_packet_id: u16,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub product_name: String,
    pub num_sources: u8,
    pub num_mes: u8,
    pub num_dsks: u8,
    pub num_supersources: u8,
    pub mes: Vec<MixEffectState>,
    pub dsks: Vec<DskState>,
    pub supersource_fill: u16,
    pub supersource_key: u16,
    pub inputs: HashMap<u16, InputInfo>,
    pub tally_packed: u64,
    pub camera_limits: CameraLimits,
    pub initialized: bool,
}

impl Default for AtemState {
    fn default() -> Self {
        Self {
            session_id: 0,
            last_received_packet_id: 0,
            protocol_major: 0,
            protocol_minor: 0,
            product_name: String::new(),
            num_sources: 0,
            num_mes: 0,
            num_dsks: 0,
            num_supersources: 0,
            mes: (0..MAX_MES).map(|_| MixEffectState::default()).collect(),
            dsks: (0..MAX_DSKS).map(|_| DskState::default()).collect(),
            supersource_fill: 0,
            supersource_key: 0,
            inputs: HashMap::new(),
            tally_packed: 0,
            camera_limits: CameraLimits::default(),
            initialized: false,
        }
    }
}

impl AtemState {
    /// Applies one parsed inbound command, returning `true` if it can have
    /// changed the packed tally (the caller recomputes and dedupes once per
    /// packet rather than per command, as the dirty-flag note describes).
    pub fn apply(&mut self, cmd: &InboundCommand<'_>) -> bool {
        match cmd {
            InboundCommand::Version { major, minor } => {
                self.protocol_major = *major;
                self.protocol_minor = *minor;
                false
            }
            InboundCommand::ProductName(name) => {
                self.product_name = name.clone();
                false
            }
            InboundCommand::Topology {
                num_mes,
                num_sources,
                num_dsks,
                num_supersources,
            } => {
                self.num_mes = *num_mes;
                self.num_sources = *num_sources;
                self.num_dsks = *num_dsks;
                self.num_supersources = *num_supersources;
                false
            }
            InboundCommand::MixEffectConfig { me, num_keyers } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.num_keyers = *num_keyers;
                }
                false
            }
            InboundCommand::TallyByIndexConfig { num_cameras } => {
                self.camera_limits.num_cameras = *num_cameras;
                false
            }
            InboundCommand::InputProperties {
                source_id,
                long_name,
                short_name,
            } => {
                self.inputs.insert(
                    *source_id,
                    InputInfo {
                        source_id: *source_id,
                        long_name: long_name.clone(),
                        short_name: short_name.clone(),
                    },
                );
                false
            }
            InboundCommand::ProgramInput { me, source } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.program_input = *source;
                }
                true
            }
            InboundCommand::PreviewInput { me, source } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.preview_input = *source;
                }
                true
            }
            InboundCommand::TallyByIndex { flags } => {
                let mut packed = 0u64;
                for (i, &f) in flags.iter().enumerate() {
                    if i >= mixlink_protocol::MAX_CHANNELS as usize {
                        break;
                    }
                    packed = tally_set(packed, i as u8, TallyValue::from_bits((f & 3) as u64));
                }
                self.tally_packed = packed;
                true
            }
            InboundCommand::TransitionState {
                me,
                style,
                next_background,
                next_key,
            } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.style = *style;
                    me.next_background = *next_background;
                    me.next_key_bitmap = *next_key;
                }
                true
            }
            InboundCommand::TransitionPosition {
                me,
                in_transition,
                position,
            } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.in_transition = *in_transition;
                    me.position = *position;
                }
                true
            }
            InboundCommand::TransitionPreview { me, preview_enabled } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    me.preview_enabled = *preview_enabled;
                }
                true
            }
            InboundCommand::KeyerOnAir { me, keyer, on_air } => {
                if let Some(me) = self.mes.get_mut(*me as usize) {
                    if let Some(slot) = me.keyer_on_air.get_mut(*keyer as usize) {
                        *slot = *on_air;
                    }
                }
                true
            }
            InboundCommand::DskState {
                dsk,
                on_air,
                in_transition,
            } => {
                if let Some(dsk) = self.dsks.get_mut(*dsk as usize) {
                    dsk.on_air = *on_air;
                    dsk.in_transition = *in_transition;
                }
                true
            }
            InboundCommand::DskProperties { dsk, tie } => {
                if let Some(dsk) = self.dsks.get_mut(*dsk as usize) {
                    dsk.tie = *tie;
                }
                true
            }
            InboundCommand::SuperSource { fill, key } => {
                self.supersource_fill = *fill;
                self.supersource_key = *key;
                true
            }
            InboundCommand::InitializationComplete => {
                self.initialized = true;
                false
            }
            InboundCommand::Unknown(_) => false,
        }
    }

    pub fn info(&self) -> SwitcherInfo {
        SwitcherInfo {
            product_name: self.product_name.clone(),
            num_cameras: self.camera_limits.num_cameras,
            num_mes: self.num_mes,
            keyers_per_me: self
                .mes
                .iter()
                .take(self.num_mes as usize)
                .map(|me| me.num_keyers)
                .collect(),
        }
    }

    pub fn state(&self, connected: bool) -> SwitcherState {
        let me0 = self.mes.first().cloned().unwrap_or_default();
        SwitcherState {
            connected,
            initialized: self.initialized,
            program_input: me0.program_input,
            preview_input: me0.preview_input,
            tally_packed: self.tally_packed,
            in_transition: me0.in_transition,
            transition_position: me0.position,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tlin_updates_tally_and_marks_dirty() {
        let mut state = AtemState::default();
        let flags = [0x01u8, 0x02, 0x03, 0x00];
        let cmd = InboundCommand::TallyByIndex { flags: &flags };
        assert!(state.apply(&cmd));
        assert_eq!(state.tally_packed, 0b00_11_10_01);
    }

    #[test]
    fn prgi_targets_correct_me() {
        let mut state = AtemState::default();
        let cmd = InboundCommand::ProgramInput { me: 1, source: 7 };
        assert!(state.apply(&cmd));
        assert_eq!(state.mes[1].program_input, 7);
        assert_eq!(state.mes[0].program_input, 0);
    }

    #[test]
    fn incm_marks_initialized_without_tally_dirty() {
        let mut state = AtemState::default();
        assert!(!state.apply(&InboundCommand::InitializationComplete));
        assert!(state.initialized);
    }

    #[test]
    fn info_reports_keyers_per_me_up_to_num_mes() {
        let mut state = AtemState::default();
        state.num_mes = 2;
        assert!(!state.apply(&InboundCommand::MixEffectConfig { me: 0, num_keyers: 2 }));
        assert!(!state.apply(&InboundCommand::MixEffectConfig { me: 1, num_keyers: 4 }));
        assert_eq!(state.info().keyers_per_me, vec![2, 4]);
    }
}
