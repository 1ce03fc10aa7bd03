//! Human-readable summaries of switcher info/state, for debug tooling.
//! Diagnostic only; never consulted for control-flow decisions.
use crate::types::{SwitcherInfo, SwitcherState};

pub fn topology(info: &SwitcherInfo) -> String {
    let keyers = if info.keyers_per_me.is_empty() {
        String::new()
    } else {
        let per_me: Vec<String> = info
            .keyers_per_me
            .iter()
            .enumerate()
            .map(|(i, k)| format!("ME{}={}key", i + 1, k))
            .collect();
        format!(" ({})", per_me.join(", "))
    };
    format!(
        "{} -- {} camera(s), {} ME(s){}",
        if info.product_name.is_empty() {
            "(unknown product)"
        } else {
            info.product_name.as_str()
        },
        info.num_cameras,
        info.num_mes,
        keyers,
    )
}

pub fn status(state: &SwitcherState) -> String {
    let transition = if state.in_transition {
        format!(", in transition @ {}", state.transition_position)
    } else {
        String::new()
    };
    format!(
        "connected={} initialized={} pgm={} pvw={} tally=0x{:05x}{}",
        state.connected,
        state.initialized,
        state.program_input,
        state.preview_input,
        state.tally_packed,
        transition,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn topology_falls_back_for_unknown_product() {
        let info = SwitcherInfo::default();
        assert!(topology(&info).starts_with("(unknown product)"));
    }

    #[test]
    fn topology_lists_keyers_per_me_when_present() {
        let info = SwitcherInfo {
            product_name: "ATEM".to_string(),
            num_cameras: 4,
            num_mes: 2,
            keyers_per_me: vec![2, 1],
        };
        assert!(topology(&info).contains("ME1=2key"));
        assert!(topology(&info).contains("ME2=1key"));
    }

    #[test]
    fn status_reports_transition_position_only_while_transitioning() {
        let mut state = SwitcherState::default();
        assert!(!status(&state).contains("in transition"));
        state.in_transition = true;
        state.transition_position = 42;
        assert!(status(&state).contains("in transition @ 42"));
    }
}
