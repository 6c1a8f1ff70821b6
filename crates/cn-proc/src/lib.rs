//! Netlink process-connector wire format.
//!
//! ## Wire Format
//!
//! A datagram from the kernel carries one or more netlink messages, each
//! padded to a 4-byte boundary. Integers are little-endian.
//!
//! ```text
//! nlmsghdr    [4B len][2B type][2B flags][4B seq][4B pid]           16 bytes
//! cn_msg      [4B idx][4B val][4B seq][4B ack][2B len][2B flags]    20 bytes
//! proc_event  [4B what][4B cpu][8B timestamp_ns][event data]        16 + n bytes
//! ```
//!
//! ## Event Data
//!
//! | what       | Name | Event data |
//! |------------|------|------------|
//! | 0x00000001 | fork | `[4B parent_pid][4B parent_tgid][4B child_pid][4B child_tgid]` |
//! | 0x00000002 | exec | `[4B pid][4B tgid]` |
//! | 0x80000000 | exit | `[4B pid][4B tgid][4B exit_code][4B exit_signal]` |
//!
//! Other `what` values (uid, gid, sid, comm, ptrace, coredump, ack) are
//! well-formed but not actionable and decode to nothing.
//!
//! The only outbound message is the multicast subscribe request: a
//! `nlmsghdr` + `cn_msg` followed by a 4-byte [`McastOp`].

/// Netlink message header size.
pub const NLMSG_HDRLEN: usize = 16;

/// Connector message header size (`struct cn_msg` without data).
pub const CN_MSG_LEN: usize = 20;

/// Proc-event header size (`what`, `cpu`, `timestamp_ns`).
pub const PROC_EVENT_HDR_LEN: usize = 16;

/// Size of the subscribe/unsubscribe payload.
pub const MCAST_OP_LEN: usize = 4;

// Netlink control message types.
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;

/// Connector id of the process connector (`{idx, val}`).
pub const CN_IDX_PROC: u32 = 1;
pub const CN_VAL_PROC: u32 = 1;

// Proc-event `what` flags.
pub const PROC_EVENT_NONE: u32 = 0x0000_0000;
pub const PROC_EVENT_FORK: u32 = 0x0000_0001;
pub const PROC_EVENT_EXEC: u32 = 0x0000_0002;
pub const PROC_EVENT_EXIT: u32 = 0x8000_0000;

/// Multicast operation sent to the process connector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McastOp {
    Listen = 1,
    Ignore = 2,
}

/// Protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    MessageTooSmall(usize),
    LengthMismatch { declared: usize, available: usize },
    InvalidPayload(&'static str),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageTooSmall(size) => write!(f, "message too small: {size}"),
            Self::LengthMismatch {
                declared,
                available,
            } => write!(
                f,
                "message length {declared} exceeds available {available} bytes"
            ),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Kind of process lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Fork,
    Exec,
    /// `status` is the raw wait status reported by the kernel.
    Exit { status: u32 },
}

/// A decoded process event.
///
/// For fork events `pid`/`tgid` describe the new child, not the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: EventKind,
    pub pid: u32,
    pub tgid: u32,
}

impl ProcessEvent {
    /// True when the event concerns a thread-group leader.
    pub fn is_leader(&self) -> bool {
        self.pid == self.tgid
    }
}

/// Round `len` up to the netlink 4-byte alignment.
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Read a `u16` from `data` at `offset`. Returns `None` if out of bounds.
fn read_u16_at(data: &[u8], offset: usize) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset + 2)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

/// Read a `u32` from `data` at `offset`. Returns `None` if out of bounds.
fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a multicast subscribe (or unsubscribe) request.
///
/// `port_id` is the sender's netlink port, normally the daemon's pid.
pub fn encode_subscribe(op: McastOp, seq: u32, port_id: u32) -> Vec<u8> {
    let total = NLMSG_HDRLEN + CN_MSG_LEN + MCAST_OP_LEN;
    let mut buf = Vec::with_capacity(total);

    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.extend_from_slice(&NLMSG_DONE.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(&port_id.to_le_bytes());

    buf.extend_from_slice(&CN_IDX_PROC.to_le_bytes());
    buf.extend_from_slice(&CN_VAL_PROC.to_le_bytes());
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(MCAST_OP_LEN as u16).to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());

    buf.extend_from_slice(&(op as u32).to_le_bytes());
    buf
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode a single netlink message starting at the beginning of `msg`.
///
/// Returns `Ok(None)` for well-formed messages that carry no fork, exec or
/// exit event. Bytes beyond the declared message length are ignored.
pub fn decode_message(msg: &[u8]) -> Result<Option<ProcessEvent>, ProtocolError> {
    let len = read_u32_at(msg, 0).ok_or(ProtocolError::MessageTooSmall(msg.len()))? as usize;
    if len < NLMSG_HDRLEN {
        return Err(ProtocolError::MessageTooSmall(len));
    }
    if len > msg.len() {
        return Err(ProtocolError::LengthMismatch {
            declared: len,
            available: msg.len(),
        });
    }

    let msg_type =
        read_u16_at(msg, 4).ok_or(ProtocolError::MessageTooSmall(msg.len()))?;
    if msg_type != NLMSG_DONE {
        return Ok(None);
    }

    let payload = msg
        .get(NLMSG_HDRLEN..len)
        .ok_or(ProtocolError::InvalidPayload("netlink payload truncated"))?;

    let idx = read_u32_at(payload, 0)
        .ok_or(ProtocolError::InvalidPayload("connector header truncated"))?;
    let val = read_u32_at(payload, 4)
        .ok_or(ProtocolError::InvalidPayload("connector header truncated"))?;
    if idx != CN_IDX_PROC || val != CN_VAL_PROC {
        return Ok(None);
    }

    let event = payload
        .get(CN_MSG_LEN..)
        .ok_or(ProtocolError::InvalidPayload("connector header truncated"))?;
    let what =
        read_u32_at(event, 0).ok_or(ProtocolError::InvalidPayload("event header truncated"))?;
    let data = event
        .get(PROC_EVENT_HDR_LEN..)
        .ok_or(ProtocolError::InvalidPayload("event header truncated"))?;

    let field = |offset: usize, context: &'static str| {
        read_u32_at(data, offset).ok_or(ProtocolError::InvalidPayload(context))
    };

    let decoded = match what {
        PROC_EVENT_FORK => ProcessEvent {
            kind: EventKind::Fork,
            pid: field(8, "fork event truncated")?,
            tgid: field(12, "fork event truncated")?,
        },
        PROC_EVENT_EXEC => ProcessEvent {
            kind: EventKind::Exec,
            pid: field(0, "exec event truncated")?,
            tgid: field(4, "exec event truncated")?,
        },
        PROC_EVENT_EXIT => ProcessEvent {
            kind: EventKind::Exit {
                status: field(8, "exit event truncated")?,
            },
            pid: field(0, "exit event truncated")?,
            tgid: field(4, "exit event truncated")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Decode every fork, exec and exit event in a receive buffer.
///
/// Events are returned in buffer order. Malformed messages are skipped; a
/// header whose length cannot be trusted ends the walk since the next
/// message boundary is unknown.
pub fn decode_events(buf: &[u8]) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while let Some(rest) = buf.get(offset..) {
        let Some(len) = read_u32_at(rest, 0).map(|v| v as usize) else {
            break;
        };
        if len < NLMSG_HDRLEN || len > rest.len() {
            break;
        }
        if let Ok(Some(event)) = decode_message(rest) {
            events.push(event);
        }
        offset += nlmsg_align(len);
    }

    events
}
