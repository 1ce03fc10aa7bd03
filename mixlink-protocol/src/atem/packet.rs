//! The 12-byte ATEM packet header and the fixed 20-byte Hello packet.
//!
//! ## Format (network byte order)
//!
//! | Offset | Field |
//! |---|---|
//! | 0-1 | `(flags<<11) \| (length & 0x07FF)` |
//! | 2-3 | session id |
//! | 4-5 | ACK id |
//! | 6-9 | reserved (Hello: byte 9 = 0x3A) |
//! | 10-11 | packet id |
use crate::error::{Error, Result};
use binrw::{binrw, BinRead, BinWrite};
use std::io::Cursor;

bitflags::bitflags! {
    /// Packet-level flags, packed into the top 5 bits of the first header word.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct AtemFlags: u16 {
        /// Sender wants this packet acknowledged.
        const ACK_REQUEST    = 0x01;
        /// Initial handshake packet.
        const HELLO          = 0x02;
        /// This packet is a retransmission.
        const RESEND         = 0x04;
        /// Sender is asking the peer to resend a packet it's missing.
        const REQUEST_RESEND = 0x08;
        /// This packet acknowledges a previously-sent `ACK_REQUEST` packet.
        const ACK            = 0x10;
    }
}

pub const HEADER_LEN: u16 = 12;
pub const HELLO_LEN: u16 = 20;
pub const MAX_PACKET_LEN: u16 = 0x07ff;

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtemHeader {
    flags_length: u16,
    pub session_id: u16,
    pub ack_id: u16,
    reserved: [u8; 4],
    pub packet_id: u16,
}

impl AtemHeader {
    pub fn new(flags: AtemFlags, length: u16, session_id: u16, ack_id: u16, packet_id: u16) -> Self {
        Self {
            flags_length: (flags.bits() << 11) | (length & 0x07ff),
            session_id,
            ack_id,
            reserved: [0; 4],
            packet_id,
        }
    }

    pub const fn flags(&self) -> AtemFlags {
        AtemFlags::from_bits_truncate(self.flags_length >> 11)
    }

    pub const fn length(&self) -> u16 {
        self.flags_length & 0x07ff
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        // Unwrap is safe: a fixed-size in-memory buffer never fails to write.
        self.write(&mut out).expect("header encode is infallible");
        out.into_inner().try_into().expect("header is 12 bytes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN as usize {
            return Err(Error::PacketTooShort {
                need: HEADER_LEN as usize,
                got: bytes.len(),
            });
        }
        Ok(Self::read(&mut Cursor::new(bytes))?)
    }
}

/// Builds the fixed 20-byte Hello packet sent to start a session.
pub fn hello_packet() -> [u8; HELLO_LEN as usize] {
    let header = AtemHeader::new(AtemFlags::HELLO, HELLO_LEN, 0, 0, 0);
    let mut out = [0u8; HELLO_LEN as usize];
    out[..HEADER_LEN as usize].copy_from_slice(&header.encode());
    out[9] = 0x3a;
    out[12] = 0x01;
    out
}

/// Builds a header-only ACK packet for `packet_id`, within session `session_id`.
pub fn ack_packet(session_id: u16, packet_id: u16) -> [u8; HEADER_LEN as usize] {
    AtemHeader::new(AtemFlags::ACK, HEADER_LEN, session_id, packet_id, 0).encode()
}

/// Builds a header-only keepalive ACK, identical in shape to [`ack_packet`].
pub fn keepalive_packet(session_id: u16, last_received_packet_id: u16) -> [u8; HEADER_LEN as usize] {
    ack_packet(session_id, last_received_packet_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hello_ack_matches_spec_vector() {
        // A Hello reply with session 0x1234, packet id 5 produces an outbound
        // ACK packet of exactly 12 bytes.
        let pkt = ack_packet(0x1234, 5);
        assert_eq!(
            pkt,
            [0x80, 0x0C, 0x12, 0x34, 0x00, 0x05, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn hello_packet_shape() {
        let pkt = hello_packet();
        assert_eq!(pkt.len(), 20);
        assert_eq!(&pkt[0..2], &[0x10, 0x14]); // flags=HELLO(0x02)<<11 | 20
        assert_eq!(pkt[9], 0x3a);
        assert_eq!(pkt[12], 0x01);
    }

    #[test]
    fn header_roundtrips() {
        let h = AtemHeader::new(AtemFlags::ACK_REQUEST | AtemFlags::ACK, 42, 0xBEEF, 7, 99);
        let bytes = h.encode();
        let parsed = AtemHeader::decode(&bytes).unwrap();
        assert_eq!(parsed.flags(), AtemFlags::ACK_REQUEST | AtemFlags::ACK);
        assert_eq!(parsed.length(), 42);
        assert_eq!(parsed.session_id, 0xBEEF);
        assert_eq!(parsed.ack_id, 7);
        assert_eq!(parsed.packet_id, 99);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(AtemHeader::decode(&[0u8; 4]).is_err());
    }
}
