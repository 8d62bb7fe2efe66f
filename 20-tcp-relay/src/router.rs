//! Dispatch table from decoded client messages to relay effects.
//!
//! Routing never touches sockets. It turns `(sender, message)` into a list of
//! [`Effect`]s which the event loop executes against the live registry, so
//! recipients are resolved by identity only at delivery time.

use tracing::{debug, info};

use crate::{
    message::{ClientId, ClientToServer, ServerToClient},
    store::DataStore,
};

/// Who an outbound message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    All,
    AllExcept(ClientId),
    Only(ClientId),
}

impl Recipients {
    pub fn includes(&self, id: ClientId) -> bool {
        match *self {
            Recipients::All => true,
            Recipients::AllExcept(excluded) => id != excluded,
            Recipients::Only(target) => id == target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: Recipients,
    pub message: ServerToClient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Outbound),
    /// Close and reap the client. Peers are told through [`announce_departure`].
    Disconnect(ClientId),
}

fn send(to: Recipients, message: ServerToClient) -> Effect {
    Effect::Send(Outbound { to, message })
}

/// Messages owed when `id` has just been accepted.
pub fn announce_arrival(id: ClientId) -> Vec<Outbound> {
    vec![
        Outbound {
            to: Recipients::Only(id),
            message: ServerToClient::AssignClientId { id },
        },
        Outbound {
            to: Recipients::AllExcept(id),
            message: ServerToClient::ClientConnected { id },
        },
    ]
}

/// Message owed to the remaining clients once `id` has been removed.
pub fn announce_departure(id: ClientId) -> Outbound {
    Outbound {
        to: Recipients::All,
        message: ServerToClient::ClientDisconnected { id },
    }
}

pub fn route(sender: ClientId, message: ClientToServer, store: &mut DataStore) -> Vec<Effect> {
    match message {
        ClientToServer::Disconnect => vec![Effect::Disconnect(sender)],
        ClientToServer::BroadcastChatMessage { text } => {
            info!(client = sender, %text, "broadcast chat message");
            vec![send(
                Recipients::All,
                ServerToClient::BroadcastChatMessage { sender, text },
            )]
        }
        ClientToServer::BroadcastBytesAll { bytes } => vec![send(
            Recipients::All,
            ServerToClient::BroadcastBytes { sender, bytes },
        )],
        ClientToServer::BroadcastBytesOther { bytes } => vec![send(
            Recipients::AllExcept(sender),
            ServerToClient::BroadcastBytes { sender, bytes },
        )],
        ClientToServer::StoreData { label, bytes } => {
            let len = bytes.len();
            let replaced = store.store(label.clone(), bytes).is_some();
            debug!(
                client = sender,
                %label,
                len,
                replaced,
                entries = store.len(),
                "stored data"
            );
            Vec::new()
        }
        ClientToServer::RetrieveData { label } => match store.retrieve(&label) {
            Some(bytes) => vec![send(
                Recipients::Only(sender),
                ServerToClient::Data { label, bytes },
            )],
            None => {
                debug!(client = sender, %label, "retrieve of unknown label");
                Vec::new()
            }
        },
        // Unicast payloads arrive as BroadcastBytes, same as the broadcasts.
        ClientToServer::BinaryMessageTo { target, bytes } => vec![send(
            Recipients::Only(target),
            ServerToClient::BroadcastBytes { sender, bytes },
        )],
    }
}
