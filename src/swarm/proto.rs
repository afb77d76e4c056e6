//! Wire frames for the membership transport.
//!
//! Frames are length-prefixed (u32, big-endian) JSON. Payload blobs are
//! opaque to this layer; the delegate owns their encoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Member;

/// Frames larger than this are assumed corrupt and rejected.
pub const MAX_FRAME_LEN: usize = 64 << 20;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
	/// A joining node announcing itself, carrying its full local state.
	Join { member: Member, state: Vec<u8> },
	/// Reply to a join: the known roster plus the replier's full state.
	PushPull { members: Vec<Member>, state: Vec<u8> },
	/// A batch of incremental broadcast payloads.
	Gossip { payloads: Vec<Vec<u8>> },
}

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	#[error("encode frame: {0}")]
	Encode(serde_json::Error),
	#[error("decode frame: {0}")]
	Decode(serde_json::Error),
	#[error("frame of {0} bytes exceeds the limit")]
	TooLarge(usize),
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
	writer: &mut W,
	frame: &Frame,
) -> Result<(), FrameError> {
	let data = serde_json::to_vec(frame).map_err(FrameError::Encode)?;
	if data.len() > MAX_FRAME_LEN {
		return Err(FrameError::TooLarge(data.len()));
	}
	writer.write_u32(data.len() as u32).await?;
	writer.write_all(&data).await?;
	writer.flush().await?;
	Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
	let len = reader.read_u32().await? as usize;
	if len > MAX_FRAME_LEN {
		return Err(FrameError::TooLarge(len));
	}
	let mut data = vec![0u8; len];
	reader.read_exact(&mut data).await?;
	serde_json::from_slice(&data).map_err(FrameError::Decode)
}
