//! Terminator-delimited message framing.
//!
//! Every message on the wire ends with the literal marker `END238973`. A
//! connection may carry several messages back-to-back, so [`FrameBuffer`]
//! accumulates raw bytes and yields one complete frame at a time, keeping
//! whatever follows the last marker buffered for the next read.
//!
//! Replies are deliberately not framed: publication replies are bare HTTP
//! status lines that senders never read, and `/info` replies are raw JSON the
//! requester locates by scanning for the first `{`.

use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Marker terminating every framed message.
pub const FRAME_TERMINATOR: &[u8] = b"END238973";

/// Reply written after a successfully delivered publication.
pub const REPLY_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Reply written for any frame that fails to parse.
pub const REPLY_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

const INFO_PREFIX: &[u8] = b"GET /info";
const PUBLICATION_PREFIX: &[u8] = b"POST /";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";
const REQUEST_LINE_SUFFIX: &[u8] = b" HTTP";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unrecognized request line")]
    UnknownRequest,
    #[error("publication path is missing the topic segment")]
    MissingTopic,
    #[error("publication topic is not valid UTF-8")]
    TopicNotUtf8,
    #[error("message has no header/body separator")]
    MissingSeparator,
}

/// One parsed inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    /// `GET /info` carrying the sender's catalog as a JSON body. The body is
    /// handed up unparsed; a malformed catalog must not fail the frame, the
    /// handler still answers it.
    InfoExchange { body: Bytes },
    /// `POST /<ip>:<port>/<topic>` publication. The address prefix only
    /// annotates the intended recipient and is not validated.
    Publication { topic: String, payload: Bytes },
}

/// Incremental frame extractor over a byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, without its terminator.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let end = find(&self.buf, FRAME_TERMINATOR)?;
        let frame = self.buf.split_to(end).freeze();
        self.buf.advance(FRAME_TERMINATOR.len());
        Some(frame)
    }

    /// Bytes buffered past the last complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Encode a publication frame addressed to `recipient`.
pub fn encode_publication(recipient: SocketAddr, topic: &str, payload: &[u8]) -> Bytes {
    let head = format!("POST /{recipient}/{topic} HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n");
    let mut frame = BytesMut::with_capacity(head.len() + payload.len() + FRAME_TERMINATOR.len());
    frame.extend_from_slice(head.as_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(FRAME_TERMINATOR);
    frame.freeze()
}

/// Encode an info-exchange request carrying `catalog_json` as its body.
pub fn encode_info_request(catalog_json: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(
        INFO_PREFIX.len() + HEADER_SEPARATOR.len() + catalog_json.len() + FRAME_TERMINATOR.len(),
    );
    frame.extend_from_slice(INFO_PREFIX);
    frame.extend_from_slice(HEADER_SEPARATOR);
    frame.extend_from_slice(catalog_json);
    frame.extend_from_slice(FRAME_TERMINATOR);
    frame.freeze()
}

/// Parse one de-framed message.
pub fn parse_request(frame: &Bytes) -> std::result::Result<Request, FrameError> {
    if frame.starts_with(INFO_PREFIX) {
        // A missing separator means an empty body; whether that is an error
        // is the handler's call, not the codec's.
        let body = match find(frame, HEADER_SEPARATOR) {
            Some(at) => frame.slice(at + HEADER_SEPARATOR.len()..),
            None => Bytes::new(),
        };
        return Ok(Request::InfoExchange { body });
    }

    if frame.starts_with(PUBLICATION_PREFIX) {
        let path_start = PUBLICATION_PREFIX.len();
        let path_end = find(&frame[path_start..], REQUEST_LINE_SUFFIX)
            .map(|at| path_start + at)
            .ok_or(FrameError::UnknownRequest)?;
        let path = &frame[path_start..path_end];

        // The topic is everything after the first slash inside the path.
        let topic_at = path
            .iter()
            .position(|&b| b == b'/')
            .ok_or(FrameError::MissingTopic)?;
        let topic = std::str::from_utf8(&path[topic_at + 1..])
            .map_err(|_| FrameError::TopicNotUtf8)?
            .to_owned();

        let body_at = find(frame, HEADER_SEPARATOR).ok_or(FrameError::MissingSeparator)?;
        let payload = frame.slice(body_at + HEADER_SEPARATOR.len()..);
        return Ok(Request::Publication { topic, payload });
    }

    Err(FrameError::UnknownRequest)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
