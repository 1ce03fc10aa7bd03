//! vMix's line-oriented, CRLF-terminated TCP protocol.
use crate::tally::MAX_CHANNELS;

pub const DEFAULT_PORT: u16 = 8099;

/// A single parsed line of vMix's text protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmixLine {
    SubscribeOkTally,
    TallyOk(Vec<u8>),
    Other(String),
}

/// Parses one complete line (CR already stripped by the caller's splitter).
pub fn parse_line(line: &str) -> VmixLine {
    if line == "SUBSCRIBE OK TALLY" {
        return VmixLine::SubscribeOkTally;
    }
    if let Some(digits) = line.strip_prefix("TALLY OK ") {
        if !digits.is_empty() && digits.bytes().all(|b| (b'0'..=b'2').contains(&b)) {
            return VmixLine::TallyOk(digits.bytes().map(|b| b - b'0').collect());
        }
    }
    VmixLine::Other(line.to_string())
}

/// Splits a growing accumulation buffer into complete lines, returning them
/// and leaving any trailing partial line in `buf`.
///
/// Matches the spec's "drain recv into an accumulation buffer; split on
/// `\n`, strip trailing `\r`" framing, so a line arriving split across two
/// TCP reads is only ever dispatched once, fully assembled.
pub fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop(); // '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

/// Repacks a raw per-channel digit array (up to 64 channels, one digit
/// 0/1/2 each) into a 2-bit-per-channel packed tally, truncated to
/// [`MAX_CHANNELS`], plus the first 1-based program/preview indices.
pub fn pack_raw_tally(raw: &[u8]) -> (u64, u8, u8) {
    let mut packed = 0u64;
    let mut program = 0u8;
    let mut preview = 0u8;
    for (i, &digit) in raw.iter().enumerate().take(MAX_CHANNELS as usize) {
        packed |= (digit as u64 & 0b11) << (i * 2);
        if program == 0 && digit == 1 {
            program = (i + 1) as u8;
        }
        if preview == 0 && digit == 2 {
            preview = (i + 1) as u8;
        }
    }
    (packed, program, preview)
}

pub fn line_subscribe_tally() -> &'static str {
    "SUBSCRIBE TALLY\r\n"
}

pub fn line_unsubscribe_tally() -> &'static str {
    "UNSUBSCRIBE TALLY\r\n"
}

pub fn line_tally_poll() -> &'static str {
    "TALLY\r\n"
}

pub fn line_quit() -> &'static str {
    "QUIT\r\n"
}

pub fn line_function(name: &str, params: Option<&str>) -> String {
    match params {
        Some(p) => format!("FUNCTION {name} {p}\r\n"),
        None => format!("FUNCTION {name}\r\n"),
    }
}

pub fn line_cut() -> String {
    line_function("Cut", None)
}

pub fn line_fade() -> String {
    line_function("Fade", None)
}

pub fn line_set_preview(input: u32) -> String {
    line_function("PreviewInput", Some(&format!("Input={input}")))
}

pub fn line_set_program(input: u32) -> String {
    line_function("ActiveInput", Some(&format!("Input={input}")))
}

pub fn line_quick_play(input: u32) -> String {
    line_function("QuickPlay", Some(&format!("Input={input}")))
}

pub fn line_overlay_in(overlay: u8, input: u32) -> String {
    line_function(&format!("OverlayInput{overlay}In"), Some(&format!("Input={input}")))
}

pub fn line_overlay_out(overlay: u8) -> String {
    line_function(&format!("OverlayInput{overlay}Out"), None)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tally_poll_is_seven_bytes() {
        assert_eq!(line_tally_poll().as_bytes(), b"TALLY\r\n");
    }

    #[test]
    fn mid_line_split_reassembles() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"SUBSCRIBE OK TALLY\r\nTALLY O");
        assert_eq!(drain_lines(&mut buf), vec!["SUBSCRIBE OK TALLY".to_string()]);
        buf.extend_from_slice(b"K 01200\r\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["TALLY OK 01200".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn tally_ok_parses_digits() {
        match parse_line("TALLY OK 01200") {
            VmixLine::TallyOk(digits) => assert_eq!(digits, vec![0, 1, 2, 0, 0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pack_raw_tally_matches_spec_example() {
        let (packed, program, preview) = pack_raw_tally(&[0, 1, 2, 0, 0]);
        assert_eq!(program, 2);
        assert_eq!(preview, 3);
        assert_eq!(packed & 0b11, 0);
        assert_eq!((packed >> 2) & 0b11, 1);
        assert_eq!((packed >> 4) & 0b11, 2);
    }

    #[test]
    fn unrecognized_line_passes_through() {
        assert_eq!(parse_line("VERSION OK 24"), VmixLine::Other("VERSION OK 24".to_string()));
    }

    #[test]
    fn function_lines_match_wire_shape() {
        assert_eq!(line_cut(), "FUNCTION Cut\r\n");
        assert_eq!(line_set_program(3), "FUNCTION ActiveInput Input=3\r\n");
        assert_eq!(line_overlay_out(2), "FUNCTION OverlayInput2Out\r\n");
    }
}
