//! Channel framing for exec/attach sessions.
//!
//! Each WebSocket binary message is one frame: `[channel id][payload]`.
//! There is no length prefix; the message boundary is the frame boundary.

use serde::{Deserialize, Serialize};

use crate::FrameError;

/// WebSocket subprotocol for the v4 channel protocol.
pub const SUBPROTOCOL: &str = "v4.channel.k8s.io";

/// Logical stream carried on a multiplexed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Process standard input (client → server).
    Stdin = 0,
    /// Process standard output (server → client).
    Stdout = 1,
    /// Process standard error (server → client).
    Stderr = 2,
    /// Final `Status` of the remote process (server → client).
    Error = 3,
    /// Terminal size changes (client → server).
    Resize = 4,
}

impl Channel {
    /// The id byte that prefixes frames on this channel.
    pub const fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = FrameError;

    fn try_from(id: u8) -> Result<Self, FrameError> {
        match id {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            3 => Ok(Self::Error),
            4 => Ok(Self::Resize),
            other => Err(FrameError::UnknownChannel(other)),
        }
    }
}

/// Prefixes `payload` with the channel id.
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(channel.id());
    frame.extend_from_slice(payload);
    frame
}

/// Splits a frame into its channel and payload.
pub fn decode_frame(frame: &[u8]) -> Result<(Channel, &[u8]), FrameError> {
    let (&id, payload) = frame.split_first().ok_or(FrameError::Empty)?;
    Ok((Channel::try_from(id)?, payload))
}

/// Terminal dimensions sent on the resize channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminalSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}
