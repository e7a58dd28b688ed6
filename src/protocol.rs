//! Messages exchanged between a match instance and its hosting lobby, and
//! the framed connection that carries them.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::PlayerId;

/// Frames larger than this are refused rather than buffered.
pub const MAX_FRAME_LEN: usize = 1 << 20;
const HEADER_LEN: usize = std::mem::size_of::<u32>();

/// Roster entry pushed to the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub player_id: PlayerId,
    pub name: String,
    pub score: i32,
    pub spectator: bool,
    /// Set when the player left the instance.
    pub left: bool,
    pub average_rank: i32,
}

/// Instance to lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LobbyMessage {
    InstanceHello {
        instance_id: u32,
        server_guid: u128,
        hub_key: Option<String>,
    },
    InstanceReady,
    UpdateMatch { update: String },
    UpdatePlayer(PlayerUpdate),
    UpdateBadge { instance_id: u32, badge: String },
    EndGame { stats: String },
    /// Nobody is left on the instance.
    Empty,
}

/// Lobby to instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LobbyCommand {
    BecomeDedicatedInstance { hub_guid: u128 },
    /// Push the roster and match time now instead of waiting for the next interval.
    ForceUpdate,
    Terminate,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Malformed frame: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Connection reset by peer")]
    ConnectionReset,
    #[error("Frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(usize),
}

/// A TCP stream carrying bincode encoded values behind a big-endian `u32` length.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Reads the next value. `Ok(None)` means the peer closed cleanly between frames.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionReset);
            }
        }
    }

    fn parse_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        let mut buf = Cursor::new(&self.buffer[..]);
        if buf.remaining() < HEADER_LEN {
            return Ok(None);
        }
        let len = buf.get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if buf.remaining() < len {
            self.buffer.reserve(HEADER_LEN + len - self.buffer.len());
            return Ok(None);
        }

        let value = bincode::deserialize(&self.buffer[HEADER_LEN..HEADER_LEN + len])?;
        self.buffer.advance(HEADER_LEN + len);
        Ok(Some(value))
    }

    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), FrameError> {
        let bytes = bincode::serialize(value)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(bytes.len()));
        }
        self.stream.write_u32(bytes.len() as u32).await?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
