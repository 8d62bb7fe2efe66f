//! Accept/receive event loop driving the relay.
//!
//! A single task owns the registry and the data store. It keeps one pending
//! accept on the listener plus one pending receive per live connection and
//! reacts to whichever finishes first:
//!
//! - accept: register, assign an id, announce the newcomer, arm its receive
//! - receive with data: buffer, extract frames, queue messages, re-arm
//! - receive with EOF/error: reap the connection
//! - writer fault: mark the connection dead
//!
//! After every wake-up the message queue is drained through the router and
//! any connection marked dead is reaped. Sends only enqueue onto each
//! connection's writer task, so a peer that stops reading never holds up the
//! loop. Receives are wrapped in [`Abortable`] so removing a connection
//! retires its pending read, and completions are re-validated against the
//! registry anyway.

use std::{collections::VecDeque, future::Future, io, net::SocketAddr};

use anyhow::Result;
use futures::{
    FutureExt, StreamExt,
    future::{AbortHandle, Abortable, Aborted, BoxFuture},
    stream::FuturesUnordered,
};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{self, CodecError, DEFAULT_MAX_FRAME_LEN, MAX_FRAME_LEN_LIMIT},
    connection::{Connection, Limits, ReceiveHalf, Received, Transport},
    message::{ClientId, ClientToServer},
    registry::Registry,
    router::{self, Effect, Outbound, Recipients},
    store::DataStore,
};

/// Bytes requested from the socket per receive.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Frames queued per client before it is dropped as too slow.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Largest payload a client may declare before it is disconnected.
    pub max_frame_len: usize,
    pub read_chunk: usize,
    /// Outbound frames buffered per client while its socket is backed up.
    pub outbound_queue: usize,
}

impl RelayConfig {
    fn limits(&self) -> Limits {
        Limits {
            max_frame_len: self.max_frame_len.min(MAX_FRAME_LEN_LIMIT),
            read_chunk: self.read_chunk,
            outbound_queue: self.outbound_queue,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk: DEFAULT_READ_CHUNK,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until `shutdown` resolves. Open connections are simply
    /// dropped on the way out.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, config } = self;
        let mut relay = EventLoop::new(&config);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(clients = relay.registry.len(), "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    relay.handle_accept(accept_result);
                }
                Some(completion) = relay.receives.next(), if !relay.receives.is_empty() => {
                    relay.handle_receive(completion);
                }
                Some(id) = relay.faults.recv() => {
                    relay.handle_fault(id);
                }
            }
            relay.process_queue();
            relay.sweep();
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

type PendingReceive = BoxFuture<'static, Result<Received, Aborted>>;

struct EventLoop {
    registry: Registry,
    store: DataStore,
    receives: FuturesUnordered<PendingReceive>,
    faults: mpsc::UnboundedReceiver<ClientId>,
    queue: VecDeque<(ClientId, ClientToServer)>,
}

impl EventLoop {
    fn new(config: &RelayConfig) -> Self {
        let (fault_tx, faults) = mpsc::unbounded_channel();
        Self {
            registry: Registry::new(config.limits(), fault_tx),
            store: DataStore::new(),
            receives: FuturesUnordered::new(),
            faults,
            queue: VecDeque::new(),
        }
    }

    fn handle_accept(&mut self, result: io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, peer)) => {
                let id = self.admit(Transport::from_tcp(stream, peer));
                info!(client = id, %peer, "client accepted");
            }
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }

    fn admit(&mut self, transport: Transport) -> ClientId {
        let (id, half) = self.registry.insert(transport);
        self.arm(half);
        for outbound in router::announce_arrival(id) {
            self.deliver(&outbound);
        }
        id
    }

    /// Issues the next receive for a connection that is still registered.
    fn arm(&mut self, half: ReceiveHalf) {
        let Some(connection) = self.registry.find_mut(half.id()) else {
            return;
        };
        let (handle, registration) = AbortHandle::new_pair();
        connection.arm_receive(handle);
        self.receives
            .push(Abortable::new(half.poll_receive(), registration).boxed());
    }

    fn handle_receive(&mut self, completion: Result<Received, Aborted>) {
        let Ok(Received { half, outcome }) = completion else {
            return;
        };
        let id = half.id();
        let Some(connection) = self.registry.find_mut(id) else {
            debug!(client = id, "ignoring receive for removed client");
            return;
        };

        if connection.complete_receive(outcome).is_err() {
            self.reap(id);
            return;
        }

        let frames = connection.drain_frames();
        let alive = connection.is_alive();
        for frame in frames {
            match ClientToServer::decode(&frame) {
                Ok(message) => self.queue.push_back((id, message)),
                Err(CodecError::UnknownTag(tag)) => {
                    warn!(client = id, tag, "unhandled message tag");
                }
                Err(err) => warn!(client = id, error = %err, "dropping malformed frame"),
            }
        }

        if alive {
            self.arm(half);
        }
    }

    /// A writer task failed; the next sweep reaps the connection.
    fn handle_fault(&mut self, id: ClientId) {
        if let Some(connection) = self.registry.find_mut(id) {
            connection.mark_dead();
        }
    }

    fn process_queue(&mut self) {
        while let Some((sender, message)) = self.queue.pop_front() {
            if !self.registry.find(sender).is_some_and(Connection::is_alive) {
                debug!(client = sender, "dropping message from departed client");
                continue;
            }
            for effect in router::route(sender, message, &mut self.store) {
                match effect {
                    Effect::Send(outbound) => self.deliver(&outbound),
                    Effect::Disconnect(id) => self.reap(id),
                }
            }
        }
    }

    /// Queues the message for every current recipient independently. A
    /// refused send only marks that recipient dead; it is reaped by the next
    /// sweep.
    fn deliver(&mut self, outbound: &Outbound) {
        let frame = codec::encode_frame(&outbound.message.encode());
        let targets: Vec<ClientId> = match outbound.to {
            Recipients::Only(id) => vec![id],
            to => self
                .registry
                .ids()
                .into_iter()
                .filter(|id| to.includes(*id))
                .collect(),
        };

        for id in targets {
            let Some(connection) = self.registry.find_mut(id) else {
                debug!(client = id, "recipient not connected");
                continue;
            };
            if connection.send(frame.clone()).is_err() {
                debug!(client = id, "recipient will be reaped");
            }
        }
    }

    /// The one cleanup path for a departing client. A second call for the
    /// same id finds nothing and announces nothing.
    fn reap(&mut self, id: ClientId) {
        let Some(mut connection) = self.registry.remove(id) else {
            return;
        };
        info!(client = id, peer = ?connection.peer(), "client disconnected");
        connection.close();
        self.deliver(&router::announce_departure(id));
    }

    fn sweep(&mut self) {
        loop {
            let dead = self.registry.dead_ids();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                self.reap(id);
            }
        }
    }
}
