//! Single-message handshake exchanged immediately after a channel opens
//! (spec §4.3). Handshake frames never carry `seq`/`ack` and are never
//! handed to `RemoteHandle`.

use futures_util::SinkExt;
use futures_util::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use reconnect::PeerId;

use crate::config::HANDSHAKE_TIMEOUT;
use crate::error::TransportError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
enum HandshakeFrame {
    #[serde(rename_all = "camelCase")]
    Handshake { incarnation_id: String },
    #[serde(rename_all = "camelCase")]
    HandshakeAck { incarnation_id: String },
}

/// A one-shot preamble identifying the dialing side's `PeerId`.
///
/// The spec treats the underlying peer-to-peer stack (dialing, identity,
/// encryption) as an opaque, already-peer-identity-aware provider; this
/// Rust rendering's transport is a bare TCP byte stream, so it needs
/// *some* way for an inbound accept to learn which peer just connected.
/// A length-delimited `{peerId}` frame ahead of the real handshake is the
/// smallest thing that fills that gap without inventing a key-exchange
/// protocol the spec doesn't ask for.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Identify {
    peer_id: PeerId,
}

/// Write the dialing side's `PeerId` as the connection's first frame.
///
/// # Errors
/// Returns [`TransportError::Connection`] on write failure.
pub async fn write_identity<S>(io: &mut Framed<S, LengthDelimitedCodec>, peer_id: &PeerId) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(&Identify { peer_id: peer_id.clone() }).map_err(|error| TransportError::Handshake(error.to_string()))?;
    io.send(bytes.into()).await.map_err(TransportError::Connection)
}

/// Read the connecting side's `PeerId`, sent via [`write_identity`].
///
/// # Errors
/// Returns [`TransportError::Handshake`] on timeout, I/O failure, or a
/// malformed preamble.
pub async fn read_identity<S>(io: &mut Framed<S, LengthDelimitedCodec>) -> Result<PeerId, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = tokio::time::timeout(HANDSHAKE_TIMEOUT, io.next())
        .await
        .map_err(|_elapsed| TransportError::Handshake("timed out waiting for identity preamble".to_owned()))?
        .ok_or_else(|| TransportError::Handshake("channel closed before identity preamble".to_owned()))?
        .map_err(TransportError::Connection)?;
    let identify: Identify = serde_json::from_slice(&bytes).map_err(|error| TransportError::Handshake(error.to_string()))?;
    Ok(identify.peer_id)
}

/// Write our `handshake`, then read exactly one frame back and require
/// it to be `handshakeAck`. Returns the remote's `incarnationId`.
///
/// # Errors
/// Returns [`TransportError::Handshake`] on timeout, I/O failure, or a
/// reply that isn't `handshakeAck`.
pub async fn initiate<S>(io: &mut Framed<S, LengthDelimitedCodec>, local_incarnation_id: &str) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        send_frame(
            io,
            &HandshakeFrame::Handshake {
                incarnation_id: local_incarnation_id.to_owned(),
            },
        )
        .await?;
        match recv_frame(io).await? {
            HandshakeFrame::HandshakeAck { incarnation_id } => Ok(incarnation_id),
            HandshakeFrame::Handshake { .. } => Err(TransportError::Handshake(
                "expected handshakeAck, got handshake".to_owned(),
            )),
        }
    })
    .await
    .map_err(|_elapsed| TransportError::Handshake("timed out waiting for handshakeAck".to_owned()))?
}

/// Read one frame, require it to be `handshake`, then write back our own
/// `handshakeAck`. Returns the remote's `incarnationId`.
///
/// # Errors
/// Returns [`TransportError::Handshake`] on timeout, I/O failure, or an
/// initial frame that isn't `handshake`.
pub async fn respond<S>(io: &mut Framed<S, LengthDelimitedCodec>, local_incarnation_id: &str) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        match recv_frame(io).await? {
            HandshakeFrame::Handshake { incarnation_id } => {
                send_frame(
                    io,
                    &HandshakeFrame::HandshakeAck {
                        incarnation_id: local_incarnation_id.to_owned(),
                    },
                )
                .await?;
                Ok(incarnation_id)
            }
            HandshakeFrame::HandshakeAck { .. } => {
                Err(TransportError::Handshake("expected handshake, got handshakeAck".to_owned()))
            }
        }
    })
    .await
    .map_err(|_elapsed| TransportError::Handshake("timed out waiting for handshake".to_owned()))?
}

async fn send_frame<S>(io: &mut Framed<S, LengthDelimitedCodec>, frame: &HandshakeFrame) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(frame).map_err(|error| TransportError::Handshake(error.to_string()))?;
    io.send(bytes.into()).await.map_err(TransportError::Connection)
}

async fn recv_frame<S>(io: &mut Framed<S, LengthDelimitedCodec>) -> Result<HandshakeFrame, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = io
        .next()
        .await
        .ok_or_else(|| TransportError::Handshake("channel closed during handshake".to_owned()))?
        .map_err(TransportError::Connection)?;
    serde_json::from_slice(&bytes).map_err(|error| TransportError::Handshake(error.to_string()))
}
