//! In-memory mirror of an OBS Studio connection's identity, scene list and
//! studio-mode tally.
use mixlink_protocol::obs::pack_scene_tally;

use crate::types::{CameraLimits, SwitcherInfo, SwitcherState};

#[derive(Debug, Clone, Default)]
pub struct ObsState {
    pub authenticated: bool,
    pub auth_required: bool,
    pub identified: bool,
    pub studio_mode: bool,
    pub scenes: Vec<String>,
    pub program_index: Option<usize>,
    pub preview_index: Option<usize>,
    pub tally_packed: u64,
    pub camera_limits: CameraLimits,
}

impl ObsState {
    pub fn apply_scene_list(
        &mut self,
        names: Vec<String>,
        program_index: Option<usize>,
        preview_index: Option<usize>,
    ) {
        self.camera_limits.num_cameras = names.len().min(u8::MAX as usize) as u8;
        self.scenes = names;
        self.program_index = program_index;
        self.preview_index = preview_index;
        self.recompute_tally();
    }

    pub fn set_program_by_name(&mut self, name: &str) {
        self.program_index = self.scenes.iter().position(|s| s == name);
        self.recompute_tally();
    }

    pub fn set_preview_by_name(&mut self, name: &str) {
        self.preview_index = self.scenes.iter().position(|s| s == name);
        self.recompute_tally();
    }

    /// Clears the preview scene, e.g. when studio mode is disabled
    /// server-side and the preview slot no longer applies.
    pub fn clear_preview(&mut self) {
        self.preview_index = None;
        self.recompute_tally();
    }

    fn recompute_tally(&mut self) {
        self.tally_packed = pack_scene_tally(self.program_index, self.preview_index);
    }

    pub fn program_scene_name(&self) -> Option<&str> {
        self.program_index.and_then(|i| self.scenes.get(i)).map(String::as_str)
    }

    pub fn preview_scene_name(&self) -> Option<&str> {
        self.preview_index.and_then(|i| self.scenes.get(i)).map(String::as_str)
    }

    pub fn info(&self) -> SwitcherInfo {
        SwitcherInfo {
            product_name: "OBS Studio".to_string(),
            num_cameras: self.camera_limits.num_cameras,
            num_mes: 1,
            keyers_per_me: Vec::new(),
        }
    }

    pub fn state(&self, connected: bool) -> SwitcherState {
        SwitcherState {
            connected,
            initialized: self.identified,
            program_input: self.program_index.map(|i| i as u16 + 1).unwrap_or(0),
            preview_input: self.preview_index.map(|i| i as u16 + 1).unwrap_or(0),
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
    fn scene_list_reorder_sets_one_based_program_preview() {
        let mut state = ObsState::default();
        state.apply_scene_list(
            vec!["A".into(), "B".into(), "C".into()],
            Some(0),
            Some(1),
        );
        let snapshot = state.state(true);
        assert_eq!(snapshot.program_input, 1);
        assert_eq!(snapshot.preview_input, 2);
        assert_ne!(snapshot.tally_packed, 0);
    }

    #[test]
    fn set_program_by_name_looks_up_index() {
        let mut state = ObsState::default();
        state.scenes = vec!["A".into(), "B".into()];
        state.set_program_by_name("B");
        assert_eq!(state.program_index, Some(1));
    }

    #[test]
    fn unknown_scene_name_clears_index() {
        let mut state = ObsState::default();
        state.scenes = vec!["A".into()];
        state.set_preview_by_name("Z");
        assert_eq!(state.preview_index, None);
    }

    #[test]
    fn clear_preview_drops_index_and_repacks_tally() {
        let mut state = ObsState::default();
        state.scenes = vec!["A".into(), "B".into()];
        state.set_program_by_name("A");
        state.set_preview_by_name("B");
        let with_preview = state.tally_packed;
        state.clear_preview();
        assert_eq!(state.preview_index, None);
        assert_ne!(state.tally_packed, with_preview);
    }
}
