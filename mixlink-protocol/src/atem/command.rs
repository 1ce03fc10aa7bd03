//! The ATEM embedded command stream: the 8-byte command header and the
//! catalogue of inbound/outbound commands that ride inside a packet's
//! payload.
use crate::error::{Error, Result};

pub const COMMAND_HEADER_LEN: usize = 8;

fn name_str(name: [u8; 4]) -> std::borrow::Cow<'static, str> {
    String::from_utf8_lossy(&name).into_owned().into()
}

/// One parsed inbound command, borrowing its payload from the packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand<'a> {
    Version {
        major: u16,
        minor: u16,
    },
    ProductName(String),
    Topology {
        num_mes: u8,
        num_sources: u8,
        num_dsks: u8,
        num_supersources: u8,
    },
    MixEffectConfig {
        me: u8,
        num_keyers: u8,
    },
    TallyByIndexConfig {
        num_cameras: u8,
    },
    InputProperties {
        source_id: u16,
        long_name: String,
        short_name: String,
    },
    ProgramInput {
        me: u8,
        source: u16,
    },
    PreviewInput {
        me: u8,
        source: u16,
    },
    TallyByIndex {
        flags: &'a [u8],
    },
    TransitionState {
        me: u8,
        style: u8,
        next_background: bool,
        next_key: u8,
    },
    TransitionPosition {
        me: u8,
        in_transition: bool,
        position: u16,
    },
    TransitionPreview {
        me: u8,
        preview_enabled: bool,
    },
    KeyerOnAir {
        me: u8,
        keyer: u8,
        on_air: bool,
    },
    DskState {
        dsk: u8,
        on_air: bool,
        in_transition: bool,
    },
    DskProperties {
        dsk: u8,
        tie: bool,
    },
    SuperSource {
        fill: u16,
        key: u16,
    },
    InitializationComplete,
    /// A recognized-but-unhandled or unrecognized 4-byte command name.
    Unknown([u8; 4]),
}

fn be16(payload: &[u8], offset: usize) -> Option<u16> {
    payload
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn nul_terminated_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Parses one command given its 4-byte name and payload (header stripped).
fn parse_one<'a>(name: [u8; 4], payload: &'a [u8]) -> Result<InboundCommand<'a>> {
    let err = || Error::MalformedCommand(0);
    Ok(match &name {
        b"_ver" => InboundCommand::Version {
            major: be16(payload, 0).ok_or_else(err)?,
            minor: be16(payload, 2).ok_or_else(err)?,
        },
        b"_pin" => InboundCommand::ProductName(nul_terminated_string(
            &payload[..payload.len().min(63)],
        )),
        b"_top" => InboundCommand::Topology {
            num_mes: *payload.first().ok_or_else(err)?,
            num_sources: *payload.get(1).ok_or_else(err)?,
            num_dsks: *payload.get(5).ok_or_else(err)?,
            num_supersources: *payload.get(6).ok_or_else(err)?,
        },
        b"_MeC" => InboundCommand::MixEffectConfig {
            me: *payload.first().ok_or_else(err)?,
            num_keyers: *payload.get(1).ok_or_else(err)?,
        },
        b"_TlC" => InboundCommand::TallyByIndexConfig {
            num_cameras: *payload.get(4).ok_or_else(err)?,
        },
        b"InPr" => {
            let source_id = be16(payload, 0).ok_or_else(err)?;
            let long_name = nul_terminated_string(payload.get(2..22).ok_or_else(err)?);
            let short_name = nul_terminated_string(payload.get(22..26).ok_or_else(err)?);
            InboundCommand::InputProperties {
                source_id,
                long_name,
                short_name,
            }
        }
        b"PrgI" => InboundCommand::ProgramInput {
            me: *payload.first().ok_or_else(err)?,
            source: be16(payload, 2).ok_or_else(err)?,
        },
        b"PrvI" => InboundCommand::PreviewInput {
            me: *payload.first().ok_or_else(err)?,
            source: be16(payload, 2).ok_or_else(err)?,
        },
        b"TlIn" => {
            let count = be16(payload, 0).ok_or_else(err)? as usize;
            let flags = payload.get(2..2 + count).ok_or_else(err)?;
            InboundCommand::TallyByIndex { flags }
        }
        b"TrSS" => {
            let style = *payload.get(1).ok_or_else(err)?;
            let selection = *payload.get(2).ok_or_else(err)?;
            InboundCommand::TransitionState {
                me: *payload.first().ok_or_else(err)?,
                style,
                next_background: selection & 0x01 != 0,
                next_key: (selection >> 1) & 0x0f,
            }
        }
        b"TrPs" => InboundCommand::TransitionPosition {
            me: *payload.first().ok_or_else(err)?,
            in_transition: *payload.get(1).ok_or_else(err)? != 0,
            position: be16(payload, 4).ok_or_else(err)?,
        },
        b"TrPr" => InboundCommand::TransitionPreview {
            me: *payload.first().ok_or_else(err)?,
            preview_enabled: *payload.get(1).ok_or_else(err)? != 0,
        },
        b"KeOn" => InboundCommand::KeyerOnAir {
            me: *payload.first().ok_or_else(err)?,
            keyer: *payload.get(1).ok_or_else(err)?,
            on_air: *payload.get(2).ok_or_else(err)? != 0,
        },
        b"DskS" => InboundCommand::DskState {
            dsk: *payload.first().ok_or_else(err)?,
            on_air: *payload.get(1).ok_or_else(err)? != 0,
            in_transition: *payload.get(2).ok_or_else(err)? != 0,
        },
        b"DskP" => InboundCommand::DskProperties {
            dsk: *payload.first().ok_or_else(err)?,
            tie: *payload.get(1).ok_or_else(err)? != 0,
        },
        b"SSrc" => InboundCommand::SuperSource {
            fill: be16(payload, 0).ok_or_else(err)?,
            key: be16(payload, 2).ok_or_else(err)?,
        },
        b"InCm" => InboundCommand::InitializationComplete,
        _ => InboundCommand::Unknown(name),
    })
}

/// Returns true for the commands whose state mutation should mark the
/// packed tally dirty and recomputed before the next user-visible dispatch.
pub fn affects_tally(cmd: &InboundCommand<'_>) -> bool {
    matches!(
        cmd,
        InboundCommand::ProgramInput { .. }
            | InboundCommand::PreviewInput { .. }
            | InboundCommand::TallyByIndex { .. }
            | InboundCommand::KeyerOnAir { .. }
            | InboundCommand::DskState { .. }
            | InboundCommand::DskProperties { .. }
            | InboundCommand::SuperSource { .. }
            | InboundCommand::TransitionState { .. }
            | InboundCommand::TransitionPosition { .. }
            | InboundCommand::TransitionPreview { .. }
    )
}

/// Walks the embedded command stream of one packet's payload (everything
/// after the 12-byte packet header), yielding parsed commands in order.
///
/// A malformed entry (header claims an out-of-range length, or its typed
/// fields can't be read) stops the walk for the remainder of this packet,
/// per the "localized parser errors" propagation policy -- it does not
/// return an error, since the caller treats the rest of the payload as
/// unrecoverable but the packet itself as still valid.
pub fn walk_commands(payload: &[u8]) -> Vec<InboundCommand<'_>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset + COMMAND_HEADER_LEN <= payload.len() {
        let Some(len) = be16(payload, offset) else {
            break;
        };
        let len = len as usize;
        if len < COMMAND_HEADER_LEN || offset + len > payload.len() {
            break;
        }
        let mut name = [0u8; 4];
        name.copy_from_slice(&payload[offset + 4..offset + 8]);
        let body = &payload[offset + COMMAND_HEADER_LEN..offset + len];
        match parse_one(name, body) {
            Ok(cmd) => out.push(cmd),
            Err(_) => out.push(InboundCommand::Unknown(name)),
        }
        offset += len;
    }
    out
}

/// Encodes one outbound command (8-byte header + 4-byte payload) ready to
/// append to a packet body starting at offset 12.
fn encode_command(name: &[u8; 4], payload: [u8; 4]) -> [u8; COMMAND_HEADER_LEN + 4] {
    let mut out = [0u8; COMMAND_HEADER_LEN + 4];
    let len = (COMMAND_HEADER_LEN + 4) as u16;
    out[0..2].copy_from_slice(&len.to_be_bytes());
    out[4..8].copy_from_slice(name);
    out[8..12].copy_from_slice(&payload);
    out
}

pub fn cmd_set_program(me: u8, source: u16) -> [u8; 12] {
    let [hi, lo] = source.to_be_bytes();
    encode_command(b"CPgI", [me, 0, hi, lo])
}

pub fn cmd_set_preview(me: u8, source: u16) -> [u8; 12] {
    let [hi, lo] = source.to_be_bytes();
    encode_command(b"CPvI", [me, 0, hi, lo])
}

pub fn cmd_cut(me: u8) -> [u8; 12] {
    encode_command(b"DCut", [me, 0, 0, 0])
}

pub fn cmd_auto(me: u8) -> [u8; 12] {
    encode_command(b"DAut", [me, 0, 0, 0])
}

pub fn cmd_dsk_set_on_air(dsk: u8, on_air: bool) -> [u8; 12] {
    encode_command(b"CDsL", [dsk, on_air as u8, 0, 0])
}

pub fn cmd_dsk_auto(dsk: u8) -> [u8; 12] {
    encode_command(b"DDsA", [dsk, 0, 0, 0])
}

pub fn cmd_dsk_set_tie(dsk: u8, tie: bool) -> [u8; 12] {
    encode_command(b"CDsT", [dsk, tie as u8, 0, 0])
}

pub fn cmd_keyer_set_on_air(me: u8, keyer: u8, on_air: bool) -> [u8; 12] {
    encode_command(b"CKOn", [me, keyer, on_air as u8, 0])
}

/// Next-transition selection update.
///
/// Encoding derived from the original source, not independently verified
/// against Blackmagic's protocol: byte 0 = change mask `0x02`, byte 3 =
/// `current_background | (new_next_key_bitmap << 1)`.
pub fn cmd_set_next_transition(me: u8, current_background: bool, next_key_bitmap: u8) -> [u8; 12] {
    let selection = (current_background as u8) | (next_key_bitmap << 1);
    encode_command(b"CTTp", [0x02, me, 0, selection])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tlin_four_channels_matches_spec_example() {
        let payload = [0x00, 0x04, 0x01, 0x02, 0x03, 0x00];
        let cmds = walk_one(b"TlIn", &payload);
        let InboundCommand::TallyByIndex { flags } = cmds else {
            panic!("expected TallyByIndex");
        };
        assert_eq!(flags, &[0x01, 0x02, 0x03, 0x00]);
    }

    fn walk_one<'a>(name: &[u8; 4], payload: &'a [u8]) -> InboundCommand<'a> {
        parse_one(*name, payload).unwrap()
    }

    #[test]
    fn walk_commands_stops_on_truncated_header() {
        let cmds = walk_commands(&[0, 1, 2]);
        assert!(cmds.is_empty());
    }

    #[test]
    fn walk_commands_parses_sequence() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_command(b"DCut", [0, 0, 0, 0]));
        buf.extend_from_slice(&encode_command(b"PrgI", [0, 0, 0, 1]));
        let cmds = walk_commands(&buf);
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[1], InboundCommand::ProgramInput { me: 0, source: 1 }));
    }

    #[test]
    fn set_program_encoding() {
        let bytes = cmd_set_program(0, 0x0102);
        assert_eq!(bytes[4..8], *b"CPgI");
        assert_eq!(&bytes[8..12], &[0, 0, 0x01, 0x02]);
    }

    #[test]
    fn next_transition_encoding() {
        let bytes = cmd_set_next_transition(0, true, 0b0101);
        assert_eq!(bytes[8], 0x02);
        assert_eq!(bytes[9], 0);
        assert_eq!(bytes[11], 1 | (0b0101 << 1));
    }

    #[test]
    fn unknown_command_name_preserved() {
        let cmd = parse_one(*b"????", &[]).unwrap();
        assert_eq!(cmd, InboundCommand::Unknown(*b"????"));
    }

    #[test]
    fn name_str_decodes_ascii() {
        assert_eq!(name_str(*b"_ver"), "_ver");
    }
}
