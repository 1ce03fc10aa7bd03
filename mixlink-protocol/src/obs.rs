//! obs-websocket v5 JSON-RPC message shapes and the SHA-256/Base64
//! challenge-response auth formula.
//!
//! Frame-level WebSocket concerns (masking, ping/pong, the RFC 6455
//! upgrade handshake and its SHA-1 accept-key check) are handled by the
//! transport layer, not here -- this module only speaks the JSON payload
//! obs-websocket carries over it.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tally::{tally_set, TallyValue};

pub const DEFAULT_PORT: u16 = 4455;
pub const DEFAULT_PATH: &str = "/";
pub const MAX_SCENES: usize = 20;

/// GUID RFC 6455 specifies for validating `Sec-WebSocket-Accept`.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

pub const EVENT_SUBSCRIPTION_GENERAL: u32 = 1;
pub const EVENT_SUBSCRIPTION_SCENES: u32 = 4;
/// `General | Scenes`, the only events this client needs to track tally.
pub const EVENT_SUBSCRIPTION_TALLY: u32 = EVENT_SUBSCRIPTION_GENERAL | EVENT_SUBSCRIPTION_SCENES;

/// The `{op, d}` envelope every obs-websocket v5 message is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloData {
    pub rpc_version: u32,
    pub authentication: Option<AuthenticationChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyData {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedData {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponseData {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub event_type: String,
    pub event_intent: u32,
    #[serde(default)]
    pub event_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneEntry {
    #[serde(rename = "sceneName")]
    pub scene_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneListResponse {
    pub scenes: Vec<SceneEntry>,
    pub current_program_scene_name: Option<String>,
    pub current_preview_scene_name: Option<String>,
}

/// Computes `base64(sha256(base64(sha256(password || salt)) || challenge))`,
/// the obs-websocket v5 authentication string.
pub fn generate_auth_string(password: &str, salt: &str, challenge: &str) -> String {
    let mut secret_hasher = Sha256::new();
    secret_hasher.update(password.as_bytes());
    secret_hasher.update(salt.as_bytes());
    let secret_b64 = BASE64.encode(secret_hasher.finalize());

    let mut auth_hasher = Sha256::new();
    auth_hasher.update(secret_b64.as_bytes());
    auth_hasher.update(challenge.as_bytes());
    BASE64.encode(auth_hasher.finalize())
}

/// Reverses OBS's scene order (OBS returns newest-first), caps to
/// [`MAX_SCENES`], and resolves the program/preview scene indices by name.
pub fn normalize_scene_list(
    mut scenes: Vec<SceneEntry>,
    program_name: Option<&str>,
    preview_name: Option<&str>,
) -> (Vec<String>, Option<usize>, Option<usize>) {
    scenes.reverse();
    scenes.truncate(MAX_SCENES);
    let names: Vec<String> = scenes.into_iter().map(|s| s.scene_name).collect();
    let program_index = program_name.and_then(|n| names.iter().position(|s| s == n));
    let preview_index = preview_name.and_then(|n| names.iter().position(|s| s == n));
    (names, program_index, preview_index)
}

/// Packs program/preview scene indices into tally bits: the program index
/// gets `Program`; the preview index gets `Preview` unless it equals the
/// program index, in which case only `Program` is set.
pub fn pack_scene_tally(program_index: Option<usize>, preview_index: Option<usize>) -> u64 {
    let mut packed = 0u64;
    if let Some(p) = program_index.filter(|&p| p < MAX_SCENES) {
        packed = tally_set(packed, p as u8, TallyValue::Program);
    }
    if let Some(pv) = preview_index.filter(|&pv| pv < MAX_SCENES && Some(pv) != program_index) {
        packed = tally_set(packed, pv as u8, TallyValue::Preview);
    }
    packed
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tally::tally_get;

    #[test]
    fn auth_string_matches_manual_double_hash() {
        let got = generate_auth_string("secret", "S", "C");
        let secret_b64 = BASE64.encode(Sha256::digest(b"secretS"));
        let mut expected_hasher = Sha256::new();
        expected_hasher.update(secret_b64.as_bytes());
        expected_hasher.update(b"C");
        let expected = BASE64.encode(expected_hasher.finalize());
        assert_eq!(got, expected);
    }

    #[test]
    fn scene_list_reorders_and_resolves_indices() {
        let scenes = vec![
            SceneEntry { scene_name: "C".into() },
            SceneEntry { scene_name: "B".into() },
            SceneEntry { scene_name: "A".into() },
        ];
        let (names, program, preview) = normalize_scene_list(scenes, Some("A"), Some("B"));
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(program, Some(0));
        assert_eq!(preview, Some(1));
    }

    #[test]
    fn scene_tally_packs_program_and_preview() {
        let packed = pack_scene_tally(Some(0), Some(1));
        assert_eq!(tally_get(packed, 0), TallyValue::Program);
        assert_eq!(tally_get(packed, 1), TallyValue::Preview);
    }

    #[test]
    fn scene_tally_program_wins_when_equal() {
        let packed = pack_scene_tally(Some(0), Some(0));
        assert_eq!(tally_get(packed, 0), TallyValue::Program);
    }

    #[test]
    fn identify_omits_authentication_when_absent() {
        let data = IdentifyData {
            rpc_version: 1,
            authentication: None,
            event_subscriptions: EVENT_SUBSCRIPTION_TALLY,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("authentication").is_none());
    }

    #[test]
    fn event_subscription_bitmask_is_five() {
        assert_eq!(EVENT_SUBSCRIPTION_TALLY, 5);
    }
}
