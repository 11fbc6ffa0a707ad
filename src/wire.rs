//! Wire framing (C8, §6.1): `{ u16 size_be; u16 type_be; body }` framing and
//! the fixed-layout body encodings for every message type the core
//! exchanges with friends. Built on the `bytes` crate rather than a generic
//! serializer, since every field here has an exact position spec.md pins
//! down, unlike the envelope types elsewhere in this crate that carry
//! opaque application payloads.

use crate::error::DhtError;
use crate::identity::{Id, Key, PeerId, ID_BYTES};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const HEADER_LEN: usize = 4;

/// Wire type codes. Values are local to this crate; no external protocol
/// depends on a specific numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Put = 1,
    Get = 2,
    Result = 3,
    Discovery = 4,
    AskHello = 5,
    TrailSetup = 6,
    TrailSetupResult = 7,
    TrailSetupRejection = 8,
    VerifySuccessor = 9,
    VerifySuccessorResult = 10,
    NotifyNewSuccessor = 11,
    NotifySuccessorConfirmation = 12,
    TrailTeardown = 13,
    AddTrail = 14,
}

impl MessageType {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => MessageType::Put,
            2 => MessageType::Get,
            3 => MessageType::Result,
            4 => MessageType::Discovery,
            5 => MessageType::AskHello,
            6 => MessageType::TrailSetup,
            7 => MessageType::TrailSetupResult,
            8 => MessageType::TrailSetupRejection,
            9 => MessageType::VerifySuccessor,
            10 => MessageType::VerifySuccessorResult,
            11 => MessageType::NotifyNewSuccessor,
            12 => MessageType::NotifySuccessorConfirmation,
            13 => MessageType::TrailTeardown,
            14 => MessageType::AddTrail,
            _ => return None,
        })
    }
}

/// Direction field shared by several trail messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    SrcToDest = 0,
    DestToSrc = 1,
}

impl WireDirection {
    fn from_u32(v: u32) -> Result<Self, DhtError> {
        match v {
            0 => Ok(WireDirection::SrcToDest),
            1 => Ok(WireDirection::DestToSrc),
            _ => Err(DhtError::Malformed(format!("bad direction {v}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutBody {
    pub options: u32,
    pub block_type: u32,
    pub hop_count: u32,
    pub desired_replication: u32,
    pub best_known_destination: PeerId,
    pub intermediate_trail_id: Id,
    pub expiration_unix_ms: u64,
    pub key: Key,
    pub put_path: Vec<PeerId>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GetBody {
    pub options: u32,
    pub block_type: u32,
    pub hop_count: u32,
    pub desired_replication: u32,
    pub best_known_destination: PeerId,
    pub intermediate_trail_id: Id,
    pub key: Key,
    pub get_path: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct ResultBody {
    pub block_type: u32,
    pub querying_peer: PeerId,
    pub expiration_unix_ms: u64,
    pub key: Key,
    pub put_path: Vec<PeerId>,
    pub get_path: Vec<PeerId>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryBody {
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct AskHelloBody {
    pub peer: PeerId,
}

#[derive(Debug, Clone)]
pub struct TrailSetupBody {
    pub is_predecessor: bool,
    pub final_destination_finger_value: u64,
    pub source: PeerId,
    pub best_known_destination: PeerId,
    pub intermediate_trail_id: Id,
    pub trail_id: Id,
    pub trail_so_far: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct TrailSetupResultBody {
    pub finger_identity: PeerId,
    pub querying_peer: PeerId,
    pub is_predecessor: bool,
    pub ultimate_value: u64,
    pub trail_id: Id,
    pub reverse_trail: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct TrailSetupRejectionBody {
    pub source: PeerId,
    pub congested_peer: PeerId,
    pub ultimate_value: u64,
    pub is_predecessor: bool,
    pub trail_id: Id,
    pub congestion_time_ms: u64,
    pub trail_so_far: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct VerifySuccessorBody {
    pub source: PeerId,
    pub successor: PeerId,
    pub trail_id: Id,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct VerifySuccessorResultBody {
    pub querying: PeerId,
    pub current_successor: PeerId,
    pub probable_successor: PeerId,
    pub trail_id: Id,
    pub direction: WireDirection,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct NotifyNewSuccessorBody {
    pub source: PeerId,
    pub new_successor: PeerId,
    pub trail_id: Id,
    pub trail: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct NotifySuccessorConfirmationBody {
    pub trail_id: Id,
    pub direction: WireDirection,
}

#[derive(Debug, Clone)]
pub struct TrailTeardownBody {
    pub trail_id: Id,
    pub direction: WireDirection,
}

#[derive(Debug, Clone)]
pub struct AddTrailBody {
    pub source: PeerId,
    pub destination: PeerId,
    pub trail_id: Id,
    pub trail: Vec<PeerId>,
}

/// A decoded wire message, tagged by type.
#[derive(Debug, Clone)]
pub enum Message {
    Put(PutBody),
    Get(GetBody),
    Result(ResultBody),
    Discovery(DiscoveryBody),
    AskHello(AskHelloBody),
    TrailSetup(TrailSetupBody),
    TrailSetupResult(TrailSetupResultBody),
    TrailSetupRejection(TrailSetupRejectionBody),
    VerifySuccessor(VerifySuccessorBody),
    VerifySuccessorResult(VerifySuccessorResultBody),
    NotifyNewSuccessor(NotifyNewSuccessorBody),
    NotifySuccessorConfirmation(NotifySuccessorConfirmationBody),
    TrailTeardown(TrailTeardownBody),
    AddTrail(AddTrailBody),
}

fn put_id(buf: &mut BytesMut, id: &Id) {
    buf.put_slice(id.as_bytes());
}

fn get_id(buf: &mut Bytes) -> Result<Id, DhtError> {
    if buf.remaining() < ID_BYTES {
        return Err(DhtError::Malformed("truncated identifier".into()));
    }
    let mut bytes = [0u8; ID_BYTES];
    buf.copy_to_slice(&mut bytes);
    Ok(Id::from_bytes(bytes))
}

fn put_path(buf: &mut BytesMut, path: &[PeerId]) {
    buf.put_u32(path.len() as u32);
    put_path_items(buf, path);
}

fn get_path(buf: &mut Bytes, max_len: usize) -> Result<Vec<PeerId>, DhtError> {
    let len = get_u32(buf)? as usize;
    get_path_items(buf, len, max_len)
}

/// Writes just the trailing `PeerId[]` array, with no length prefix of its
/// own. Used by message bodies (`PeerPutMessage`, `PeerGetMessage`,
/// `PeerGetResultMessage`) whose path length travels as a fixed header
/// field ahead of the other variable-length trailers rather than glued to
/// its own array.
fn put_path_items(buf: &mut BytesMut, path: &[PeerId]) {
    for p in path {
        put_id(buf, p);
    }
}

/// Counterpart to [`put_path_items`]: reads `len` peer identities with no
/// length prefix of their own, having already validated `len` against
/// `max_len` at the call site via the header field it was read from.
fn get_path_items(buf: &mut Bytes, len: usize, max_len: usize) -> Result<Vec<PeerId>, DhtError> {
    if len > max_len {
        return Err(DhtError::Malformed(format!(
            "path length {len} exceeds body bound {max_len}"
        )));
    }
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(get_id(buf)?);
    }
    Ok(out)
}

fn get_u32(buf: &mut Bytes) -> Result<u32, DhtError> {
    if buf.remaining() < 4 {
        return Err(DhtError::Malformed("truncated u32".into()));
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, DhtError> {
    if buf.remaining() < 8 {
        return Err(DhtError::Malformed("truncated u64".into()));
    }
    Ok(buf.get_u64())
}

fn put_blob(buf: &mut BytesMut, blob: &[u8]) {
    buf.put_u32(blob.len() as u32);
    buf.put_slice(blob);
}

fn get_blob(buf: &mut Bytes, max_len: usize) -> Result<Vec<u8>, DhtError> {
    let len = get_u32(buf)? as usize;
    if len > max_len || buf.remaining() < len {
        return Err(DhtError::Malformed(format!(
            "payload length {len} exceeds remaining body"
        )));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

/// Body-level caps, distinct from the wire-count limits path/payload lengths
/// are checked against so a malformed size field can't force an
/// unbounded-looking allocation before the rest of the frame has arrived.
const MAX_PATH_ELEMENTS: usize = 4096;
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

fn bool_to_u32(b: bool) -> u32 {
    if b {
        1
    } else {
        0
    }
}

fn u32_to_bool(v: u32) -> bool {
    v != 0
}

impl Message {
    fn type_code(&self) -> MessageType {
        match self {
            Message::Put(_) => MessageType::Put,
            Message::Get(_) => MessageType::Get,
            Message::Result(_) => MessageType::Result,
            Message::Discovery(_) => MessageType::Discovery,
            Message::AskHello(_) => MessageType::AskHello,
            Message::TrailSetup(_) => MessageType::TrailSetup,
            Message::TrailSetupResult(_) => MessageType::TrailSetupResult,
            Message::TrailSetupRejection(_) => MessageType::TrailSetupRejection,
            Message::VerifySuccessor(_) => MessageType::VerifySuccessor,
            Message::VerifySuccessorResult(_) => MessageType::VerifySuccessorResult,
            Message::NotifyNewSuccessor(_) => MessageType::NotifyNewSuccessor,
            Message::NotifySuccessorConfirmation(_) => MessageType::NotifySuccessorConfirmation,
            Message::TrailTeardown(_) => MessageType::TrailTeardown,
            Message::AddTrail(_) => MessageType::AddTrail,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Message::Put(b) => {
                buf.put_u32(b.options);
                buf.put_u32(b.block_type);
                buf.put_u32(b.hop_count);
                buf.put_u32(b.desired_replication);
                buf.put_u32(b.put_path.len() as u32);
                put_id(buf, &b.best_known_destination);
                put_id(buf, &b.intermediate_trail_id);
                buf.put_u64(b.expiration_unix_ms);
                put_id(buf, &b.key);
                put_path_items(buf, &b.put_path);
                put_blob(buf, &b.payload);
            }
            Message::Get(b) => {
                buf.put_u32(b.options);
                buf.put_u32(b.block_type);
                buf.put_u32(b.hop_count);
                buf.put_u32(b.desired_replication);
                buf.put_u32(b.get_path.len() as u32);
                put_id(buf, &b.best_known_destination);
                put_id(buf, &b.intermediate_trail_id);
                put_id(buf, &b.key);
                put_path_items(buf, &b.get_path);
            }
            Message::Result(b) => {
                buf.put_u32(b.block_type);
                buf.put_u32(b.put_path.len() as u32);
                buf.put_u32(b.get_path.len() as u32);
                put_id(buf, &b.querying_peer);
                buf.put_u64(b.expiration_unix_ms);
                put_id(buf, &b.key);
                put_path_items(buf, &b.put_path);
                put_path_items(buf, &b.get_path);
                put_blob(buf, &b.payload);
            }
            Message::Discovery(b) => {
                buf.put_u32(0);
                put_path(buf, &b.peers);
            }
            Message::AskHello(b) => {
                buf.put_u32(0);
                put_id(buf, &b.peer);
            }
            Message::TrailSetup(b) => {
                buf.put_u32(bool_to_u32(b.is_predecessor));
                buf.put_u64(b.final_destination_finger_value);
                put_id(buf, &b.source);
                put_id(buf, &b.best_known_destination);
                put_id(buf, &b.intermediate_trail_id);
                put_id(buf, &b.trail_id);
                put_path(buf, &b.trail_so_far);
            }
            Message::TrailSetupResult(b) => {
                put_id(buf, &b.finger_identity);
                put_id(buf, &b.querying_peer);
                buf.put_u32(bool_to_u32(b.is_predecessor));
                buf.put_u64(b.ultimate_value);
                put_id(buf, &b.trail_id);
                put_path(buf, &b.reverse_trail);
            }
            Message::TrailSetupRejection(b) => {
                put_id(buf, &b.source);
                put_id(buf, &b.congested_peer);
                buf.put_u64(b.ultimate_value);
                buf.put_u32(bool_to_u32(b.is_predecessor));
                put_id(buf, &b.trail_id);
                buf.put_u64(b.congestion_time_ms);
                put_path(buf, &b.trail_so_far);
            }
            Message::VerifySuccessor(b) => {
                put_id(buf, &b.source);
                put_id(buf, &b.successor);
                put_id(buf, &b.trail_id);
                put_path(buf, &b.trail);
            }
            Message::VerifySuccessorResult(b) => {
                put_id(buf, &b.querying);
                put_id(buf, &b.current_successor);
                put_id(buf, &b.probable_successor);
                put_id(buf, &b.trail_id);
                buf.put_u32(b.direction as u32);
                put_path(buf, &b.trail);
            }
            Message::NotifyNewSuccessor(b) => {
                put_id(buf, &b.source);
                put_id(buf, &b.new_successor);
                put_id(buf, &b.trail_id);
                put_path(buf, &b.trail);
            }
            Message::NotifySuccessorConfirmation(b) => {
                put_id(buf, &b.trail_id);
                buf.put_u32(b.direction as u32);
            }
            Message::TrailTeardown(b) => {
                put_id(buf, &b.trail_id);
                buf.put_u32(b.direction as u32);
            }
            Message::AddTrail(b) => {
                put_id(buf, &b.source);
                put_id(buf, &b.destination);
                put_id(buf, &b.trail_id);
                put_path(buf, &b.trail);
            }
        }
    }

    /// Encode `self` as a full frame: `{u16 size; u16 type; body}`.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        let total_len = HEADER_LEN + body.len();
        frame.put_u16(total_len as u16);
        frame.put_u16(self.type_code() as u16);
        frame.extend_from_slice(&body);
        frame
    }

    /// Decode a full frame, validating the declared size against the
    /// actual buffer length before trusting any body field.
    pub fn decode(mut frame: Bytes) -> Result<Message, DhtError> {
        if frame.remaining() < HEADER_LEN {
            return Err(DhtError::Malformed("frame shorter than header".into()));
        }
        let declared_len = frame.get_u16() as usize;
        let type_code = frame.get_u16();
        if declared_len != frame.remaining() + HEADER_LEN {
            return Err(DhtError::Malformed(format!(
                "declared size {declared_len} does not match frame length"
            )));
        }
        let kind = MessageType::from_u16(type_code)
            .ok_or_else(|| DhtError::Malformed(format!("unknown message type {type_code}")))?;
        decode_body(kind, &mut frame)
    }
}

fn decode_body(kind: MessageType, buf: &mut Bytes) -> Result<Message, DhtError> {
    Ok(match kind {
        MessageType::Put => {
            let options = get_u32(buf)?;
            let block_type = get_u32(buf)?;
            let hop_count = get_u32(buf)?;
            let desired_replication = get_u32(buf)?;
            let put_path_length = get_u32(buf)? as usize;
            let best_known_destination = get_id(buf)?;
            let intermediate_trail_id = get_id(buf)?;
            let expiration_unix_ms = get_u64(buf)?;
            let key = get_id(buf)?;
            Message::Put(PutBody {
                options,
                block_type,
                hop_count,
                desired_replication,
                best_known_destination,
                intermediate_trail_id,
                expiration_unix_ms,
                key,
                put_path: get_path_items(buf, put_path_length, MAX_PATH_ELEMENTS)?,
                payload: get_blob(buf, MAX_PAYLOAD_BYTES)?,
            })
        }
        MessageType::Get => {
            let options = get_u32(buf)?;
            let block_type = get_u32(buf)?;
            let hop_count = get_u32(buf)?;
            let desired_replication = get_u32(buf)?;
            let get_path_length = get_u32(buf)? as usize;
            let best_known_destination = get_id(buf)?;
            let intermediate_trail_id = get_id(buf)?;
            let key = get_id(buf)?;
            Message::Get(GetBody {
                options,
                block_type,
                hop_count,
                desired_replication,
                best_known_destination,
                intermediate_trail_id,
                key,
                get_path: get_path_items(buf, get_path_length, MAX_PATH_ELEMENTS)?,
            })
        }
        MessageType::Result => {
            let block_type = get_u32(buf)?;
            let put_path_length = get_u32(buf)? as usize;
            let get_path_length = get_u32(buf)? as usize;
            let querying_peer = get_id(buf)?;
            let expiration_unix_ms = get_u64(buf)?;
            let key = get_id(buf)?;
            Message::Result(ResultBody {
                block_type,
                querying_peer,
                expiration_unix_ms,
                key,
                put_path: get_path_items(buf, put_path_length, MAX_PATH_ELEMENTS)?,
                get_path: get_path_items(buf, get_path_length, MAX_PATH_ELEMENTS)?,
                payload: get_blob(buf, MAX_PAYLOAD_BYTES)?,
            })
        }
        MessageType::Discovery => {
            let _reserved = get_u32(buf)?;
            Message::Discovery(DiscoveryBody {
                peers: get_path(buf, MAX_PATH_ELEMENTS)?,
            })
        }
        MessageType::AskHello => {
            let _reserved = get_u32(buf)?;
            Message::AskHello(AskHelloBody { peer: get_id(buf)? })
        }
        MessageType::TrailSetup => Message::TrailSetup(TrailSetupBody {
            is_predecessor: u32_to_bool(get_u32(buf)?),
            final_destination_finger_value: get_u64(buf)?,
            source: get_id(buf)?,
            best_known_destination: get_id(buf)?,
            intermediate_trail_id: get_id(buf)?,
            trail_id: get_id(buf)?,
            trail_so_far: get_path(buf, MAX_PATH_ELEMENTS)?,
        }),
        MessageType::TrailSetupResult => Message::TrailSetupResult(TrailSetupResultBody {
            finger_identity: get_id(buf)?,
            querying_peer: get_id(buf)?,
            is_predecessor: u32_to_bool(get_u32(buf)?),
            ultimate_value: get_u64(buf)?,
            trail_id: get_id(buf)?,
            reverse_trail: get_path(buf, MAX_PATH_ELEMENTS)?,
        }),
        MessageType::TrailSetupRejection => {
            Message::TrailSetupRejection(TrailSetupRejectionBody {
                source: get_id(buf)?,
                congested_peer: get_id(buf)?,
                ultimate_value: get_u64(buf)?,
                is_predecessor: u32_to_bool(get_u32(buf)?),
                trail_id: get_id(buf)?,
                congestion_time_ms: get_u64(buf)?,
                trail_so_far: get_path(buf, MAX_PATH_ELEMENTS)?,
            })
        }
        MessageType::VerifySuccessor => Message::VerifySuccessor(VerifySuccessorBody {
            source: get_id(buf)?,
            successor: get_id(buf)?,
            trail_id: get_id(buf)?,
            trail: get_path(buf, MAX_PATH_ELEMENTS)?,
        }),
        MessageType::VerifySuccessorResult => {
            Message::VerifySuccessorResult(VerifySuccessorResultBody {
                querying: get_id(buf)?,
                current_successor: get_id(buf)?,
                probable_successor: get_id(buf)?,
                trail_id: get_id(buf)?,
                direction: WireDirection::from_u32(get_u32(buf)?)?,
                trail: get_path(buf, MAX_PATH_ELEMENTS)?,
            })
        }
        MessageType::NotifyNewSuccessor => Message::NotifyNewSuccessor(NotifyNewSuccessorBody {
            source: get_id(buf)?,
            new_successor: get_id(buf)?,
            trail_id: get_id(buf)?,
            trail: get_path(buf, MAX_PATH_ELEMENTS)?,
        }),
        MessageType::NotifySuccessorConfirmation => {
            Message::NotifySuccessorConfirmation(NotifySuccessorConfirmationBody {
                trail_id: get_id(buf)?,
                direction: WireDirection::from_u32(get_u32(buf)?)?,
            })
        }
        MessageType::TrailTeardown => Message::TrailTeardown(TrailTeardownBody {
            trail_id: get_id(buf)?,
            direction: WireDirection::from_u32(get_u32(buf)?)?,
        }),
        MessageType::AddTrail => Message::AddTrail(AddTrailBody {
            source: get_id(buf)?,
            destination: get_id(buf)?,
            trail_id: get_id(buf)?,
            trail: get_path(buf, MAX_PATH_ELEMENTS)?,
        }),
    })
}
