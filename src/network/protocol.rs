//! Wire protocol: request/response messages and the framed codec.
//!
//! Every message carries the sender's listen address so peers learn each
//! other from ordinary traffic; there is no separate discovery protocol.
//! Broadcast verbs push a bare hash (the receiver pulls the body on
//! demand), fetch verbs answer with the requested object.
//!
//! Frames are a little-endian `u32` length prefix followed by the bincode
//! payload; declared lengths above [`MAX_FRAME_BYTES`] are rejected before
//! allocation.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::chain::{Block, BlockHeader};
use crate::constants::MAX_FRAME_BYTES;
use crate::transaction::{Output, Txn};
use crate::{from_canonical_bytes, to_canonical_bytes, Hash};

/// Errors from the wire layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeds maximum size")]
    FrameTooLarge,
    #[error("message encoding failed: {0}")]
    Codec(String),
    #[error("peer dial timed out")]
    DialTimeout,
    #[error("peer returned an object with the wrong hash")]
    HashMismatch,
    #[error("peer returned a block with a bad merkle root")]
    BadMerkle,
    #[error("peer had no answer")]
    NotFound,
    #[error("unexpected response variant")]
    UnexpectedResponse,
}

/// Protocol messages. Requests flow client-to-server, responses back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    // ── Broadcast verbs ──
    /// Announce a block by hash; the receiver fetches it if unknown.
    BcastBlock { sender: String, hash: Hash },
    /// Announce a transaction by hash.
    BcastTxn { sender: String, hash: Hash },

    // ── Fetch verbs ──
    /// Request a main-chain header.
    FetchHeader { sender: String, hash: Hash },
    /// Request a block from any section.
    FetchBlock { sender: String, hash: Hash },
    /// Request a transaction (pool first, then its enclosing block).
    FetchTxn { sender: String, hash: Hash },
    /// Request an output resolved through the out_map.
    FetchOutput { sender: String, hash: Hash },

    // ── Responses ──
    Ack { sender: String },
    HeaderResp { sender: String, header: Option<BlockHeader> },
    BlockResp { sender: String, block: Option<Box<Block>> },
    TxnResp { sender: String, txn: Option<Box<Txn>> },
    OutputResp { sender: String, output: Option<Box<Output>> },
}

impl Message {
    /// The advertised listen address of whoever sent this message.
    pub fn sender(&self) -> &str {
        match self {
            Message::BcastBlock { sender, .. }
            | Message::BcastTxn { sender, .. }
            | Message::FetchHeader { sender, .. }
            | Message::FetchBlock { sender, .. }
            | Message::FetchTxn { sender, .. }
            | Message::FetchOutput { sender, .. }
            | Message::Ack { sender }
            | Message::HeaderResp { sender, .. }
            | Message::BlockResp { sender, .. }
            | Message::TxnResp { sender, .. }
            | Message::OutputResp { sender, .. } => sender,
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), NetworkError> {
    let payload = to_canonical_bytes(msg).map_err(|e| NetworkError::Codec(e.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge);
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, capping the declared length before any
/// allocation happens.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Message, NetworkError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge);
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    from_canonical_bytes(&payload).map_err(|e| NetworkError::Codec(e.to_string()))
}
