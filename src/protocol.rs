// Robot radio frame format
//
// Every frame is FRAME_SIZE (16) bytes on the air, zero padded. Multi-byte
// fields are little-endian.
//
// Both message kinds share one 11-byte payload with the checksum at offset 10.
//
// Drive frame (type 0x01 or 0x02):
//   [type, robot_id, direction(2), direction_speed(2), rotation_speed(2),
//    kicker_speed, dribble_speed, checksum]
//
// Config frame (type 0x7F), bytes 4..10 zero:
//   [type, robot_id, channel_freq(2), 0, 0, 0, 0, 0, 0, checksum]
//
// The checksum is the XOR of the ten bytes before it. Config frames are
// addressed like drive frames: a robot only follows its own id.

use tracing::trace;

use crate::config::{FRAME_SIZE, PAYLOAD_LEN};
use crate::messages::DriveCommand;

/// Message type bytes
pub const MSG_DRIVE: u8 = 0x01;
pub const MSG_DRIVE_ALT: u8 = 0x02;
pub const MSG_CONFIG: u8 = 0x7F;

/// A frame as it travels over the link
pub type RawFrame = [u8; FRAME_SIZE];

/// Error types for frame decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too short: need {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },

    #[error("Unknown message type 0x{0:02X}")]
    UnknownType(u8),

    #[error("Checksum mismatch: frame says 0x{received:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { received: u8, computed: u8 },
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Decoded drive frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrivePacket {
    pub message_type: u8,
    pub robot_id: u8,
    pub direction: i16,
    pub direction_speed: i16,
    pub rotation_speed: i16,
    /// Sign selects the solenoid: positive kicks, negative chips
    pub kicker_speed: i8,
    pub dribble_speed: u8,
}

impl DrivePacket {
    pub fn command(&self) -> DriveCommand {
        DriveCommand::new(self.direction, self.direction_speed, self.rotation_speed)
    }

    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = self.message_type;
        frame[1] = self.robot_id;
        frame[2..4].copy_from_slice(&self.direction.to_le_bytes());
        frame[4..6].copy_from_slice(&self.direction_speed.to_le_bytes());
        frame[6..8].copy_from_slice(&self.rotation_speed.to_le_bytes());
        frame[8] = self.kicker_speed as u8;
        frame[9] = self.dribble_speed;
        frame[PAYLOAD_LEN - 1] = checksum(&frame[..PAYLOAD_LEN - 1]);
        frame
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            message_type: bytes[0],
            robot_id: bytes[1],
            direction: i16::from_le_bytes([bytes[2], bytes[3]]),
            direction_speed: i16::from_le_bytes([bytes[4], bytes[5]]),
            rotation_speed: i16::from_le_bytes([bytes[6], bytes[7]]),
            kicker_speed: bytes[8] as i8,
            dribble_speed: bytes[9],
        }
    }
}

/// Decoded configuration frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigPacket {
    pub robot_id: u8,
    pub channel_freq: u16,
}

impl ConfigPacket {
    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = MSG_CONFIG;
        frame[1] = self.robot_id;
        frame[2..4].copy_from_slice(&self.channel_freq.to_le_bytes());
        frame[PAYLOAD_LEN - 1] = checksum(&frame[..PAYLOAD_LEN - 1]);
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Drive(DrivePacket),
    Config(ConfigPacket),
}

impl Packet {
    pub fn robot_id(&self) -> u8 {
        match self {
            Packet::Drive(p) => p.robot_id,
            Packet::Config(p) => p.robot_id,
        }
    }
}

/// XOR of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Meaningful length for a message type
fn frame_len(message_type: u8) -> Option<usize> {
    match message_type {
        MSG_DRIVE | MSG_DRIVE_ALT | MSG_CONFIG => Some(PAYLOAD_LEN),
        _ => None,
    }
}

/// Validate and decode one received frame. Padding past the meaningful
/// length is ignored.
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    let Some(&message_type) = bytes.first() else {
        return Err(FrameError::Short {
            expected: 1,
            actual: 0,
        });
    };
    let len = frame_len(message_type).ok_or(FrameError::UnknownType(message_type))?;
    if bytes.len() < len {
        return Err(FrameError::Short {
            expected: len,
            actual: bytes.len(),
        });
    }

    let computed = checksum(&bytes[..len - 1]);
    let received = bytes[len - 1];
    if computed != received {
        return Err(FrameError::ChecksumMismatch { received, computed });
    }
    trace!("Frame type 0x{:02X} passed checksum", message_type);

    let packet = match message_type {
        MSG_CONFIG => Packet::Config(ConfigPacket {
            robot_id: bytes[1],
            channel_freq: u16::from_le_bytes([bytes[2], bytes[3]]),
        }),
        _ => Packet::Drive(DrivePacket::decode(bytes)),
    };
    Ok(packet)
}
