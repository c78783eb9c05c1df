//! The per-peer channel I/O task: one tokio task per live connection,
//! owning the socket exclusively. Grounded on `luanti-protocol`'s
//! `PeerRunner`, which likewise owns one connection and relays frames to
//! and from unbounded channels rather than sharing the socket.

use bytes::Bytes;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use reconnect::PeerId;

use crate::config::WRITE_TIMEOUT;
use crate::error::TransportError;
use crate::transport::Transport;

/// Spawn the I/O task for a freshly handshaken connection and return the
/// channel used to queue outgoing frames to it.
pub(crate) fn spawn<S>(transport: Transport, peer_id: PeerId, generation: u64, io: Framed<S, LengthDelimitedCodec>) -> mpsc::UnboundedSender<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(transport, peer_id, generation, io, write_rx));
    write_tx
}

async fn run<S>(
    transport: Transport,
    peer_id: PeerId,
    generation: u64,
    mut io: Framed<S, LengthDelimitedCodec>,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            outgoing = write_rx.recv() => {
                let Some(frame) = outgoing else {
                    // The transport dropped our write handle: intentional close.
                    break;
                };
                match tokio::time::timeout(WRITE_TIMEOUT, io.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        transport.report_connection_lost(&peer_id, generation, TransportError::Connection(error)).await;
                        return;
                    }
                    Err(_elapsed) => {
                        transport.report_connection_lost(&peer_id, generation, TransportError::WriteTimeout).await;
                        return;
                    }
                }
            }
            incoming = io.next() => {
                match incoming {
                    Some(Ok(bytes)) => {
                        transport.deliver_frame(peer_id.clone(), bytes.freeze());
                    }
                    Some(Err(error)) => {
                        transport.report_connection_lost(&peer_id, generation, TransportError::Connection(error)).await;
                        return;
                    }
                    None => {
                        transport.report_remote_closed(&peer_id, generation).await;
                        return;
                    }
                }
            }
        }
    }
    transport.report_remote_closed(&peer_id, generation).await;
}
