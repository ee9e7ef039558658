//! Message body decoding
//!
//! Bodies come from arbitrary senders, so decoding is total: every malformed
//! or unexpected input maps to [`MessageBody::Unknown`].

use super::{Cell, CellError, CellSlice};
use crate::address::TonAddress;

/// Op code of a plain text comment
pub const OP_TEXT_COMMENT: u32 = 0;

/// Op code of a jetton `transfer_notification` (TEP-74)
pub const OP_TRANSFER_NOTIFICATION: u32 = 0x7362_d09c;

/// How many times a forward payload is decoded below the top level.
/// Payloads at this depth only recognise comments.
pub const MAX_PAYLOAD_DEPTH: usize = 1;

/// Longest snake chain accepted for a comment
pub const MAX_SNAKE_CELLS: usize = 32;

/// A decoded inbound message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// No data and no references
    Empty,
    Comment(String),
    JettonNotify(JettonNotification),
    /// Unrecognised op code or malformed content
    Unknown { opcode: Option<u32> },
}

/// Fields of a `transfer_notification` sent by a jetton wallet to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JettonNotification {
    pub query_id: u64,
    /// Amount in the jetton's base units
    pub amount: u128,
    /// Previous owner of the jettons, as claimed by the sending wallet
    pub sender: Option<TonAddress>,
    pub forward_payload: Option<Box<MessageBody>>,
}

impl JettonNotification {
    /// Comment carried in the forward payload, if any
    pub fn comment(&self) -> Option<&str> {
        match self.forward_payload.as_deref() {
            Some(MessageBody::Comment(text)) => Some(text),
            _ => None,
        }
    }
}

impl MessageBody {
    pub fn decode(cell: &Cell) -> Self {
        decode_slice(cell.parse(), 0)
    }

    /// Comment text of the body, looking through a notification's payload
    pub fn comment(&self) -> Option<&str> {
        match self {
            MessageBody::Comment(text) => Some(text),
            MessageBody::JettonNotify(n) => n.comment(),
            _ => None,
        }
    }
}

fn decode_slice(mut slice: CellSlice<'_>, depth: usize) -> MessageBody {
    if slice.is_empty() {
        return MessageBody::Empty;
    }
    let opcode = match slice.load_u32() {
        Ok(op) => op,
        Err(_) => return MessageBody::Unknown { opcode: None },
    };

    match opcode {
        OP_TEXT_COMMENT => match read_snake_text(slice) {
            Ok(text) => MessageBody::Comment(text),
            Err(_) => MessageBody::Unknown {
                opcode: Some(opcode),
            },
        },
        OP_TRANSFER_NOTIFICATION if depth < MAX_PAYLOAD_DEPTH => {
            match read_notification(slice, depth) {
                Ok(notification) => MessageBody::JettonNotify(notification),
                Err(_) => MessageBody::Unknown {
                    opcode: Some(opcode),
                },
            }
        }
        other => MessageBody::Unknown {
            opcode: Some(other),
        },
    }
}

fn read_notification(
    mut slice: CellSlice<'_>,
    depth: usize,
) -> Result<JettonNotification, CellError> {
    let query_id = slice.load_uint(64)?;
    let amount = slice.load_coins()?;
    let sender = slice.load_address()?;

    // forward_payload:(Either Cell ^Cell); some wallets omit it entirely
    let forward_payload = if slice.remaining_bits() == 0 {
        None
    } else if slice.load_bit()? {
        let payload = slice.load_ref()?;
        Some(decode_slice(payload.parse(), depth + 1))
    } else {
        Some(decode_slice(slice, depth + 1))
    };

    Ok(JettonNotification {
        query_id,
        amount,
        sender,
        forward_payload: forward_payload
            .filter(|p| *p != MessageBody::Empty)
            .map(Box::new),
    })
}

/// Concatenate the bytes of `slice` and its first-reference continuations
fn read_snake_text(mut slice: CellSlice<'_>) -> Result<String, CellError> {
    let mut bytes = Vec::new();
    let mut cells = 1;
    loop {
        bytes.extend(slice.load_remaining_bytes()?);
        if slice.remaining_refs() == 0 {
            break;
        }
        cells += 1;
        if cells > MAX_SNAKE_CELLS {
            return Err(CellError::ChainTooLong(MAX_SNAKE_CELLS));
        }
        slice = slice.load_ref()?.parse();
    }
    String::from_utf8(bytes).map_err(|_| CellError::InvalidUtf8)
}
