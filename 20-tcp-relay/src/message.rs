//! Typed relay messages and their binary encodings.
//!
//! A payload starts with a little-endian `u32` tag equal to the variant's
//! position in the enum declaration; the rest of the payload is the variant
//! body. Both directions can be encoded and decoded so the same module serves
//! the relay and [`crate::client`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{CodecError, PayloadReader, write_u32_le};

/// Identity the relay assigns to each accepted connection.
pub type ClientId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientToServer {
    Disconnect,
    BroadcastChatMessage { text: String },
    BroadcastBytesAll { bytes: Bytes },
    BroadcastBytesOther { bytes: Bytes },
    StoreData { label: String, bytes: Bytes },
    RetrieveData { label: String },
    BinaryMessageTo { target: ClientId, bytes: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerToClient {
    AssignClientId { id: ClientId },
    ClientConnected { id: ClientId },
    ClientDisconnected { id: ClientId },
    BroadcastChatMessage { sender: ClientId, text: String },
    BroadcastBytes { sender: ClientId, bytes: Bytes },
    Data { label: String, bytes: Bytes },
    BinaryMessageFrom { sender: ClientId, bytes: Bytes },
}

impl ClientToServer {
    pub fn tag(&self) -> u32 {
        match self {
            ClientToServer::Disconnect => 0,
            ClientToServer::BroadcastChatMessage { .. } => 1,
            ClientToServer::BroadcastBytesAll { .. } => 2,
            ClientToServer::BroadcastBytesOther { .. } => 3,
            ClientToServer::StoreData { .. } => 4,
            ClientToServer::RetrieveData { .. } => 5,
            ClientToServer::BinaryMessageTo { .. } => 6,
        }
    }

    /// Parses a frame payload. Unknown tags surface as
    /// [`CodecError::UnknownTag`] so callers can tell them apart from
    /// malformed bodies.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = PayloadReader::new(payload);
        let message = match reader.read_u32()? {
            0 => ClientToServer::Disconnect,
            1 => ClientToServer::BroadcastChatMessage {
                text: reader.rest_str()?.to_owned(),
            },
            2 => ClientToServer::BroadcastBytesAll {
                bytes: Bytes::copy_from_slice(reader.rest()),
            },
            3 => ClientToServer::BroadcastBytesOther {
                bytes: Bytes::copy_from_slice(reader.rest()),
            },
            4 => {
                let (label, bytes) = read_labelled(&mut reader)?;
                ClientToServer::StoreData { label, bytes }
            }
            5 => ClientToServer::RetrieveData {
                label: reader.rest_str()?.to_owned(),
            },
            6 => ClientToServer::BinaryMessageTo {
                target: reader.read_u32()?,
                bytes: Bytes::copy_from_slice(reader.rest()),
            },
            tag => return Err(CodecError::UnknownTag(tag)),
        };
        Ok(message)
    }

    /// Encodes the payload (without the frame header).
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        write_u32_le(&mut dst, self.tag());
        match self {
            ClientToServer::Disconnect => {}
            ClientToServer::BroadcastChatMessage { text } => dst.put_slice(text.as_bytes()),
            ClientToServer::BroadcastBytesAll { bytes }
            | ClientToServer::BroadcastBytesOther { bytes } => dst.put_slice(bytes),
            ClientToServer::StoreData { label, bytes } => put_labelled(&mut dst, label, bytes),
            ClientToServer::RetrieveData { label } => dst.put_slice(label.as_bytes()),
            ClientToServer::BinaryMessageTo { target, bytes } => {
                write_u32_le(&mut dst, *target);
                dst.put_slice(bytes);
            }
        }
        dst.freeze()
    }
}

impl ServerToClient {
    pub fn tag(&self) -> u32 {
        match self {
            ServerToClient::AssignClientId { .. } => 0,
            ServerToClient::ClientConnected { .. } => 1,
            ServerToClient::ClientDisconnected { .. } => 2,
            ServerToClient::BroadcastChatMessage { .. } => 3,
            ServerToClient::BroadcastBytes { .. } => 4,
            ServerToClient::Data { .. } => 5,
            ServerToClient::BinaryMessageFrom { .. } => 6,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = PayloadReader::new(payload);
        let message = match reader.read_u32()? {
            0 => ServerToClient::AssignClientId {
                id: reader.read_u32()?,
            },
            1 => ServerToClient::ClientConnected {
                id: reader.read_u32()?,
            },
            2 => ServerToClient::ClientDisconnected {
                id: reader.read_u32()?,
            },
            3 => ServerToClient::BroadcastChatMessage {
                sender: reader.read_u32()?,
                text: reader.rest_str()?.to_owned(),
            },
            4 => ServerToClient::BroadcastBytes {
                sender: reader.read_u32()?,
                bytes: Bytes::copy_from_slice(reader.rest()),
            },
            5 => {
                let (label, bytes) = read_labelled(&mut reader)?;
                ServerToClient::Data { label, bytes }
            }
            6 => ServerToClient::BinaryMessageFrom {
                sender: reader.read_u32()?,
                bytes: Bytes::copy_from_slice(reader.rest()),
            },
            tag => return Err(CodecError::UnknownTag(tag)),
        };
        Ok(message)
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        write_u32_le(&mut dst, self.tag());
        match self {
            ServerToClient::AssignClientId { id }
            | ServerToClient::ClientConnected { id }
            | ServerToClient::ClientDisconnected { id } => write_u32_le(&mut dst, *id),
            ServerToClient::BroadcastChatMessage { sender, text } => {
                write_u32_le(&mut dst, *sender);
                dst.put_slice(text.as_bytes());
            }
            ServerToClient::BroadcastBytes { sender, bytes }
            | ServerToClient::BinaryMessageFrom { sender, bytes } => {
                write_u32_le(&mut dst, *sender);
                dst.put_slice(bytes);
            }
            ServerToClient::Data { label, bytes } => put_labelled(&mut dst, label, bytes),
        }
        dst.freeze()
    }
}

// Label-prefixed blob: u32 label length, label bytes, then the blob.
fn read_labelled(reader: &mut PayloadReader<'_>) -> Result<(String, Bytes), CodecError> {
    let label_len = reader.read_u32()? as usize;
    let label = reader.read_str(label_len)?.to_owned();
    let bytes = Bytes::copy_from_slice(reader.rest());
    Ok((label, bytes))
}

fn put_labelled(dst: &mut BytesMut, label: &str, bytes: &[u8]) {
    write_u32_le(dst, label.len() as u32);
    dst.put_slice(label.as_bytes());
    dst.put_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_declaration_order() {
        assert_eq!(ClientToServer::Disconnect.encode().as_ref(), &[0, 0, 0, 0]);
        assert_eq!(
            ServerToClient::AssignClientId { id: 7 }.encode().as_ref(),
            &[0, 0, 0, 0, 7, 0, 0, 0]
        );
        assert_eq!(
            ServerToClient::ClientDisconnected { id: 1 }.tag(),
            2,
            "client disconnected is the third server variant"
        );
    }

    #[test]
    fn store_data_body_layout() {
        let payload = [4, 0, 0, 0, 1, 0, 0, 0, b'k', b'v', b'a', b'l'];
        let message = ClientToServer::decode(&payload).expect("decode store");
        assert_eq!(
            message,
            ClientToServer::StoreData {
                label: "k".into(),
                bytes: Bytes::from_static(b"val"),
            }
        );
        assert_eq!(message.encode().as_ref(), &payload);
    }

    #[test]
    fn store_data_accepts_empty_blob() {
        let message = ClientToServer::StoreData {
            label: "empty".into(),
            bytes: Bytes::new(),
        };
        assert_eq!(ClientToServer::decode(&message.encode()), Ok(message));
    }

    #[test]
    fn binary_message_to_reads_target_then_bytes() {
        let payload = [6, 0, 0, 0, 3, 0, 0, 0, 0xaa, 0xbb];
        assert_eq!(
            ClientToServer::decode(&payload),
            Ok(ClientToServer::BinaryMessageTo {
                target: 3,
                bytes: Bytes::from_static(&[0xaa, 0xbb]),
            })
        );
    }

    #[test]
    fn server_data_message_decodes() {
        let message = ServerToClient::Data {
            label: "scores".into(),
            bytes: Bytes::from_static(b"\x01\x02"),
        };
        assert_eq!(ServerToClient::decode(&message.encode()), Ok(message));
    }

    #[test]
    fn unknown_tag_is_distinguished() {
        assert_eq!(
            ClientToServer::decode(&[42, 0, 0, 0, 1, 2]),
            Err(CodecError::UnknownTag(42))
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        // label length larger than the payload
        assert!(matches!(
            ClientToServer::decode(&[4, 0, 0, 0, 9, 0, 0, 0, b'k']),
            Err(CodecError::Truncated { .. })
        ));
        // missing target id
        assert!(matches!(
            ClientToServer::decode(&[6, 0, 0, 0, 1]),
            Err(CodecError::Truncated { .. })
        ));
        assert_eq!(
            ClientToServer::decode(&[1, 0, 0, 0, 0xc3, 0x28]),
            Err(CodecError::InvalidUtf8)
        );
        assert!(ClientToServer::decode(&[]).is_err());
    }
}
