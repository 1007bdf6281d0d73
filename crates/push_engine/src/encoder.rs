//! Poll response wire format and the encode-and-send sequence
//!
//! Layout (little-endian, no padding):
//!
//! ```text
//! header: message_kind u16 | epoch i32 | consumer_id i64
//! body:   requested_offset i64 | returned_offset i64 | block_count i32
//!         block_count x (block_len i32 | block_bytes)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, instrument};

use contracts::{ConsumerId, RpcContext, RpcSender};

use crate::error::PushError;
use crate::handle::{InputStatus, PushHandle, RequestTag};

/// Header size in bytes
pub const HEAD_LEN: usize = 2 + 4 + 8;
/// Fixed body prefix size in bytes
pub const BODY_PREFIX_LEN: usize = 8 + 8 + 4;

/// Response message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageKind {
    PollRsp = 1,
}

impl TryFrom<u16> for MessageKind {
    type Error = PushError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::PollRsp),
            other => Err(PushError::Encode(format!("unknown message kind {other}"))),
        }
    }
}

/// Response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RspHead {
    pub kind: MessageKind,
    pub epoch: i32,
    pub consumer_id: ConsumerId,
}

/// One poll response: header plus result blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub head: RspHead,
    pub requested_offset: i64,
    pub returned_offset: i64,
    pub blocks: Vec<Bytes>,
}

impl PollResponse {
    /// Exact encoded size
    pub fn encoded_len(&self) -> usize {
        HEAD_LEN
            + BODY_PREFIX_LEN
            + self.blocks.iter().map(|b| 4 + b.len()).sum::<usize>()
    }

    /// Serialize into one contiguous buffer of at most `max_len` bytes
    pub fn encode(&self, max_len: usize) -> Result<Bytes, PushError> {
        let len = self.encoded_len();
        if len > max_len {
            return Err(PushError::exhausted(
                "response buffer",
                format!("{len} bytes needed, limit {max_len}"),
            ));
        }
        let block_count = i32::try_from(self.blocks.len())
            .map_err(|_| PushError::Encode(format!("{} blocks", self.blocks.len())))?;

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u16_le(self.head.kind as u16);
        buf.put_i32_le(self.head.epoch);
        buf.put_i64_le(self.head.consumer_id);
        buf.put_i64_le(self.requested_offset);
        buf.put_i64_le(self.returned_offset);
        buf.put_i32_le(block_count);
        for block in &self.blocks {
            let block_len = i32::try_from(block.len())
                .map_err(|_| PushError::Encode(format!("block of {} bytes", block.len())))?;
            buf.put_i32_le(block_len);
            buf.put_slice(block);
        }
        Ok(buf.freeze())
    }

    /// Parse a response; block payloads are zero-copy slices of `buf`
    pub fn decode(mut buf: Bytes) -> Result<Self, PushError> {
        fn need(buf: &Bytes, n: usize, what: &str) -> Result<(), PushError> {
            if buf.remaining() < n {
                return Err(PushError::Encode(format!(
                    "truncated {what}: need {n} bytes, have {}",
                    buf.remaining()
                )));
            }
            Ok(())
        }

        need(&buf, HEAD_LEN + BODY_PREFIX_LEN, "header")?;
        let kind = MessageKind::try_from(buf.get_u16_le())?;
        let epoch = buf.get_i32_le();
        let consumer_id = buf.get_i64_le();
        let requested_offset = buf.get_i64_le();
        let returned_offset = buf.get_i64_le();
        let block_count = buf.get_i32_le();
        if block_count < 0 {
            return Err(PushError::Encode(format!("negative block count {block_count}")));
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            need(&buf, 4, "block length")?;
            let block_len = buf.get_i32_le();
            if block_len < 0 {
                return Err(PushError::Encode(format!("negative block length {block_len}")));
            }
            need(&buf, block_len as usize, "block")?;
            blocks.push(buf.split_to(block_len as usize));
        }

        Ok(Self {
            head: RspHead {
                kind,
                epoch,
                consumer_id,
            },
            requested_offset,
            returned_offset,
            blocks,
        })
    }

    /// Recipient-side staleness check: reject responses from another epoch
    pub fn validate_epoch(&self, expected: i32) -> Result<(), PushError> {
        if self.head.epoch != expected {
            return Err(PushError::Encode(format!(
                "stale response: epoch {} != expected {expected}",
                self.head.epoch
            )));
        }
        Ok(())
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Response handed to the transport
    Sent { rpc: RpcContext, bytes: usize },
    /// No request was open; nothing was sent
    NoRequest,
    /// A newer poll replaced the request the results were computed for
    Superseded,
}

/// Build the response for `handle` and hand it to `rpc`, at most once per
/// opened request.
///
/// Runs entirely under the handle lock. `tag` is the request the results
/// were computed for; if a newer poll has replaced it nothing is sent.
/// On success the request is closed, the processed version moves to
/// `returned_offset` and the handle's input is blocked until the next poll. On failure the request stays open and `blocks` are
/// released.
#[instrument(
    level = "debug",
    name = "push_send_response",
    skip(handle, rpc, blocks),
    fields(handle_id = handle.id(), consumer_id = handle.consumer_id(), blocks = blocks.len())
)]
pub(crate) fn send_response(
    handle: &PushHandle,
    rpc: &dyn RpcSender,
    tag: RequestTag,
    blocks: Vec<Bytes>,
    returned_offset: i64,
    max_len: usize,
) -> Result<SendOutcome, PushError> {
    let mut state = handle.request.lock();
    if handle.request_tag() != tag {
        return Ok(SendOutcome::Superseded);
    }
    if state.pending.is_none() {
        return Ok(SendOutcome::NoRequest);
    }

    let response = PollResponse {
        head: RspHead {
            kind: MessageKind::PollRsp,
            epoch: tag.epoch,
            consumer_id: handle.consumer_id(),
        },
        requested_offset: state.requested_offset,
        returned_offset,
        blocks,
    };
    let buf = response.encode(max_len)?;
    let bytes = buf.len();

    let Some(ctx) = handle.close_request(&mut state) else {
        return Ok(SendOutcome::NoRequest);
    };
    handle.set_input_status(InputStatus::Blocked);
    handle.advance(returned_offset);
    rpc.send(ctx, buf);
    drop(state);

    debug!(
        epoch = response.head.epoch,
        req_offset = response.requested_offset,
        rsp_offset = returned_offset,
        bytes,
        "Poll response sent"
    );
    Ok(SendOutcome::Sent { rpc: ctx, bytes })
}
