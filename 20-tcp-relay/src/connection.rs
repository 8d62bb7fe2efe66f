//! One relayed peer: its socket halves, receive buffer, and liveness.
//!
//! The socket is split in two. The [`ReceiveHalf`] travels into the event
//! loop's pending-operation set and comes back with every completed read,
//! while the [`Connection`] stays in the registry. Outbound frames go through
//! a bounded queue drained by a writer task per connection, so the event loop
//! never waits on a peer's socket. A connection only ever goes from alive to
//! dead.

use std::{io, net::SocketAddr};

use bytes::{Buf, Bytes, BytesMut};
use futures::future::AbortHandle;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    codec::{self, HEADER_SIZE},
    message::ClientId,
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identities whose writer task hit an I/O error.
pub type FaultSender = mpsc::UnboundedSender<ClientId>;

/// The peer is gone: EOF, an I/O error, or a protocol fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("peer disconnected")]
pub struct Disconnected;

/// Per-connection sizing shared by every peer of a relay.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest payload a peer may declare.
    pub max_frame_len: usize,
    /// Bytes requested from the socket per receive.
    pub read_chunk: usize,
    /// Frames that may wait for the writer before the peer counts as stalled.
    pub outbound_queue: usize,
}

/// A not-yet-registered peer transport.
pub struct Transport {
    pub peer: Option<SocketAddr>,
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Transport {
    pub fn new<R, W>(peer: Option<SocketAddr>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn from_tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = ?err, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Self::new(Some(peer), reader, writer)
    }
}

/// Read side of a connection. Owned by exactly one pending receive at a time.
pub struct ReceiveHalf {
    id: ClientId,
    reader: BoxedReader,
    chunk: usize,
}

/// Outcome of one [`ReceiveHalf::poll_receive`] call. The half is handed
/// back so the loop can re-arm it.
pub struct Received {
    pub half: ReceiveHalf,
    pub outcome: Result<Bytes, Disconnected>,
}

impl ReceiveHalf {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Performs a single read of at most one chunk.
    pub async fn poll_receive(mut self) -> Received {
        let mut chunk = BytesMut::with_capacity(self.chunk);
        let outcome = match self.reader.read_buf(&mut chunk).await {
            Ok(0) => Err(Disconnected),
            Ok(_) => Ok(chunk.freeze()),
            Err(err) => {
                debug!(client = self.id, error = ?err, "receive failed");
                Err(Disconnected)
            }
        };
        Received { half: self, outcome }
    }
}

pub struct Connection {
    id: ClientId,
    peer: Option<SocketAddr>,
    outbound: Option<mpsc::Sender<Bytes>>,
    writer_task: JoinHandle<()>,
    buffer: BytesMut,
    alive: bool,
    max_frame_len: usize,
    pending_receive: Option<AbortHandle>,
}

impl Connection {
    /// Splits `transport` into a registered connection and its receive half,
    /// and spawns the writer task that owns the send half. Write failures are
    /// reported on `faults`.
    pub fn open(
        id: ClientId,
        transport: Transport,
        limits: Limits,
        faults: FaultSender,
    ) -> (Self, ReceiveHalf) {
        let Transport {
            peer,
            reader,
            writer,
        } = transport;
        let (outbound, queue) = mpsc::channel(limits.outbound_queue.max(1));
        let writer_task = tokio::spawn(write_outbound(id, writer, queue, faults));
        let connection = Self {
            id,
            peer,
            outbound: Some(outbound),
            writer_task,
            buffer: BytesMut::new(),
            alive: true,
            max_frame_len: limits.max_frame_len,
            pending_receive: None,
        };
        let half = ReceiveHalf {
            id,
            reader,
            chunk: limits.read_chunk.max(1),
        };
        (connection, half)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Bytes received but not yet extracted as frames.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn mark_dead(&mut self) {
        self.alive = false;
        self.buffer.clear();
    }

    /// Appends the result of a completed receive to the buffer and returns
    /// the number of bytes added.
    pub fn complete_receive(
        &mut self,
        outcome: Result<Bytes, Disconnected>,
    ) -> Result<usize, Disconnected> {
        if !self.alive {
            return Err(Disconnected);
        }
        match outcome {
            Ok(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                Ok(bytes.len())
            }
            Err(Disconnected) => {
                self.mark_dead();
                Err(Disconnected)
            }
        }
    }

    /// Extracts every complete frame payload currently buffered.
    ///
    /// A header declaring more than the configured maximum is a protocol
    /// fault: the connection is marked dead and the remaining bytes dropped.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while self.alive {
            if let Some(len) = codec::frame_len(&self.buffer) {
                if len > self.max_frame_len {
                    warn!(
                        client = self.id,
                        len,
                        max = self.max_frame_len,
                        "frame exceeds maximum length; dropping connection"
                    );
                    self.mark_dead();
                    break;
                }
            }
            let Some((_, consumed)) = codec::try_extract_frame(&self.buffer) else {
                break;
            };
            let mut frame = self.buffer.split_to(consumed);
            frame.advance(HEADER_SIZE);
            frames.push(frame.freeze());
        }
        frames
    }

    /// Queues an already-framed buffer for the writer task without waiting.
    ///
    /// A full queue means the peer stopped reading; like a closed queue it
    /// marks this connection dead and is reported to the caller only.
    pub fn send(&mut self, frame: Bytes) -> Result<(), Disconnected> {
        if !self.alive {
            return Err(Disconnected);
        }
        let Some(outbound) = &self.outbound else {
            self.mark_dead();
            return Err(Disconnected);
        };
        match outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    client = self.id,
                    queued = outbound.max_capacity(),
                    "outbound queue full; dropping slow client"
                );
                self.mark_dead();
                Err(Disconnected)
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = self.id, "writer already stopped");
                self.mark_dead();
                Err(Disconnected)
            }
        }
    }

    /// Stops the writer task. Frames still queued for this peer are dropped
    /// along with the send half, which closes the write side of a TCP peer.
    pub fn close(&mut self) {
        self.mark_dead();
        self.outbound = None;
        self.writer_task.abort();
    }

    pub(crate) fn arm_receive(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.pending_receive.replace(handle) {
            previous.abort();
        }
    }

    /// Aborts the outstanding receive so its completion is never acted on.
    pub(crate) fn retire_receive(&mut self) {
        if let Some(handle) = self.pending_receive.take() {
            handle.abort();
        }
    }
}

/// Drains the outbound queue into the socket until the connection drops its
/// sender or a write fails.
async fn write_outbound(
    id: ClientId,
    mut writer: BoxedWriter,
    mut queue: mpsc::Receiver<Bytes>,
    faults: FaultSender,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame).await {
            warn!(client = id, error = ?err, "failed to send to client");
            let _ = faults.send(id);
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(client = id, error = ?err, "shutdown after disconnect failed");
    }
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;

    fn limits(max_frame_len: usize, outbound_queue: usize) -> Limits {
        Limits {
            max_frame_len,
            read_chunk: 64,
            outbound_queue,
        }
    }

    fn duplex_connection(
        limits: Limits,
    ) -> (
        Connection,
        ReceiveHalf,
        tokio::io::DuplexStream,
        mpsc::UnboundedReceiver<ClientId>,
    ) {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let (connection, half) =
            Connection::open(7, Transport::new(None, reader, writer), limits, faults);
        (connection, half, remote, fault_rx)
    }

    #[tokio::test]
    async fn receive_appends_and_drains_frames() {
        let (mut connection, half, mut remote, _faults) = duplex_connection(limits(1024, 8));

        let mut wire = encode_frame(b"one").to_vec();
        wire.extend_from_slice(&encode_frame(b"two"));
        wire.extend_from_slice(&[9, 0]);
        remote.write_all(&wire).await.expect("write frames");

        let Received { half, outcome } = half.poll_receive().await;
        assert_eq!(half.id(), 7);
        let appended = connection.complete_receive(outcome).expect("bytes arrive");
        assert_eq!(appended, wire.len());

        let frames = connection.drain_frames();
        assert_eq!(frames, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert_eq!(connection.buffered(), 2, "partial header stays buffered");
    }

    #[tokio::test]
    async fn eof_marks_connection_dead() {
        let (mut connection, half, remote, _faults) = duplex_connection(limits(1024, 8));
        drop(remote);

        let Received { outcome, .. } = half.poll_receive().await;
        assert_eq!(connection.complete_receive(outcome), Err(Disconnected));
        assert!(!connection.is_alive());
        assert_eq!(
            connection.send(Bytes::from_static(b"late")),
            Err(Disconnected)
        );
    }

    #[tokio::test]
    async fn oversized_declaration_is_a_protocol_fault() {
        let (mut connection, _half, _remote, _faults) = duplex_connection(limits(8, 8));
        let mut wire = encode_frame(b"ok").to_vec();
        wire.extend_from_slice(&encode_frame(&[0; 32]));

        connection
            .complete_receive(Ok(Bytes::from(wire)))
            .expect("buffer accepts bytes");
        let frames = connection.drain_frames();

        assert_eq!(frames, vec![Bytes::from_static(b"ok")]);
        assert!(!connection.is_alive());
        assert_eq!(connection.buffered(), 0);
    }

    #[tokio::test]
    async fn send_writes_the_frame() {
        let (mut connection, _half, mut remote, _faults) = duplex_connection(limits(1024, 8));
        let frame = encode_frame(b"hello");
        connection.send(frame.clone()).expect("send queued");

        let mut received = vec![0; frame.len()];
        remote.read_exact(&mut received).await.expect("read frame");
        assert_eq!(received, frame.to_vec());
    }

    #[tokio::test]
    async fn write_failure_is_reported_as_fault() {
        let (mut connection, _half, remote, mut faults) = duplex_connection(limits(1024, 8));
        drop(remote);

        connection
            .send(encode_frame(b"x"))
            .expect("queueing succeeds before the write fails");
        assert_eq!(faults.recv().await, Some(7));
    }

    #[tokio::test]
    async fn full_queue_marks_dead_without_waiting() {
        let (mut connection, _half, _remote, _faults) = duplex_connection(limits(1024, 1));

        // The writer task has not run yet, so the single slot stays taken.
        connection.send(encode_frame(b"first")).expect("slot free");
        assert_eq!(connection.send(encode_frame(b"second")), Err(Disconnected));
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn close_shuts_the_write_side() {
        let (mut connection, half, mut remote, _faults) = duplex_connection(limits(1024, 8));
        connection.close();
        assert!(!connection.is_alive());
        assert_eq!(
            connection.send(Bytes::from_static(b"late")),
            Err(Disconnected)
        );
        // The duplex only reports EOF once both local halves are gone.
        drop(half);

        let mut rest = Vec::new();
        let read = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            remote.read_to_end(&mut rest),
        )
        .await
        .expect("write side closes");
        assert_eq!(read.expect("clean eof"), 0);
    }
}
