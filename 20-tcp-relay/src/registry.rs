//! Live connections in accept order, keyed by a never-reused identity.
//!
//! Positions shift whenever a connection is removed, so callers hold on to
//! identities and re-resolve them with [`Registry::find_mut`] right before
//! use. A miss means the peer is already gone.

use crate::{
    connection::{Connection, FaultSender, Limits, ReceiveHalf, Transport},
    message::ClientId,
};

pub struct Registry {
    next_id: ClientId,
    connections: Vec<Connection>,
    limits: Limits,
    faults: FaultSender,
}

impl Registry {
    /// Connections created by this registry report write failures on `faults`.
    pub fn new(limits: Limits, faults: FaultSender) -> Self {
        Self {
            next_id: 0,
            connections: Vec::new(),
            limits,
            faults,
        }
    }

    /// Registers a transport under the next identity. The returned receive
    /// half must be armed by the caller.
    pub fn insert(&mut self, transport: Transport) -> (ClientId, ReceiveHalf) {
        let id = self.next_id;
        self.next_id += 1;
        let (connection, half) = Connection::open(id, transport, self.limits, self.faults.clone());
        self.connections.push(connection);
        (id, half)
    }

    /// Removes a connection and retires its outstanding receive. Removing an
    /// unknown identity is a no-op.
    pub fn remove(&mut self, id: ClientId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.id() == id)?;
        let mut connection = self.connections.remove(index);
        connection.retire_receive();
        Some(connection)
    }

    pub fn find(&self, id: ClientId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn find_mut(&mut self, id: ClientId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Snapshot of the identities currently registered, in accept order.
    pub fn ids(&self) -> Vec<ClientId> {
        self.all().map(Connection::id).collect()
    }

    /// Registered connections whose liveness flag has dropped.
    pub fn dead_ids(&self) -> Vec<ClientId> {
        self.all()
            .filter(|c| !c.is_alive())
            .map(Connection::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
