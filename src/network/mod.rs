//! Network Module
//!
//! Framed TCP request-reply transport used for client requests, peer
//! replication and the rank authority, plus the topic broadcaster.

mod server;
mod client;
mod pubsub;

pub use server::{RequestHandler, RpcServer};
pub use client::{PeerTransport, RpcClient};
pub use pubsub::{Broadcaster, Published, Subscription, TopicBroadcaster};

use crate::replication::{Envelope, FrameHeader};
use crate::error::{Error, Result};

/// Largest frame body accepted from the wire
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Read one frame body from a reader.
///
/// A checksum mismatch is reported as [`Error::FrameCorrupted`]; the frame
/// has been fully consumed in that case, so the stream stays aligned.
/// [`Error::FrameTooLarge`] leaves the body unread.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            length: header.length,
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::FrameCorrupted("checksum mismatch".into()));
    }

    Ok(body)
}

/// Write one frame body to a writer
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let header = FrameHeader::new(body);
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;

    Ok(())
}

/// Read a framed envelope from a reader
pub async fn read_envelope<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    let body = read_frame(reader).await?;
    Ok(Envelope::deserialize(&body)?)
}

/// Write a framed envelope to a writer
pub async fn write_envelope<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    let body = envelope.serialize()?;
    write_frame(writer, &body).await
}
