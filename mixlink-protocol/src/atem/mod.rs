//! Wire-level types for Blackmagic ATEM's custom UDP protocol: packet
//! framing plus the embedded command stream.
pub mod command;
pub mod packet;

pub use command::{walk_commands, InboundCommand};
pub use packet::{ack_packet, hello_packet, keepalive_packet, AtemFlags, AtemHeader};
