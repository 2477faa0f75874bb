//! Batch encoder: turns an ordered list of pending-message payloads into
//! one request body, deterministically, based on the stream's content
//! type.

use bytes::{BufMut, Bytes, BytesMut};

/// Decide whether a content type puts the stream in JSON mode.
///
/// Case-insensitive; the media type is extracted by splitting on `;` and
/// trimming. JSON mode iff the media type equals `application/json` or
/// ends with `+json`.
pub fn is_json_content_type(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    media_type == "application/json" || media_type.ends_with("+json")
}

/// Encode a batch of messages into one request body.
///
/// JSON mode: each message is assumed to already be a valid JSON value
/// encoded as UTF-8 bytes. The body is `[` + messages joined by `,` + `]`;
/// the server flattens one array level, so each message ends up as its
/// own stored message - a batch of one is still wrapped, since the
/// server's flattening handles it.
///
/// Byte mode: the body is the byte concatenation of messages in order.
/// Message boundaries are not preserved by the stream in this mode.
pub fn encode_batch(is_json: bool, messages: &[Bytes]) -> Bytes {
    if is_json {
        let total_len = 2
            + messages.iter().map(|m| m.len()).sum::<usize>()
            + messages.len().saturating_sub(1);
        let mut buf = BytesMut::with_capacity(total_len);
        buf.put_u8(b'[');
        for (i, msg) in messages.iter().enumerate() {
            if i > 0 {
                buf.put_u8(b',');
            }
            buf.put_slice(msg);
        }
        buf.put_u8(b']');
        buf.freeze()
    } else {
        let total_len = messages.iter().map(|m| m.len()).sum();
        let mut buf = BytesMut::with_capacity(total_len);
        for msg in messages {
            buf.put_slice(msg);
        }
        buf.freeze()
    }
}
