//! # gRPC-Web Framing
//!
//! Length-prefixed message framing for gRPC over HTTP/1.1 proxies.
//!
//! ```text
//! +------+-----------------+-------------------+
//! | flag | length (u32 BE) | payload           |
//! +------+-----------------+-------------------+
//!  0x00    data frame: one protobuf message
//!  0x80    trailer frame: "key: value\r\n" lines
//! ```
//!
//! The text format base64-encodes the framed stream. Proxies may flush
//! independently padded base64 segments, so the decoder works in
//! 4-character quanta and restarts after every padded quantum.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{Metadata, RpcCode, RpcStatus, StreamError};

/// Frame header length: flag byte plus big-endian length.
pub const FRAME_HEADER_LEN: usize = 5;

const FLAG_COMPRESSED: u8 = 0x01;
const FLAG_TRAILERS: u8 = 0x80;

/// Bytes escaped in `grpc-message`: controls and `%`. Non-ASCII bytes are
/// always escaped by the encoder.
const GRPC_MESSAGE: &AsciiSet = &CONTROLS.add(b'%');

/// Wire format negotiated at client construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `application/grpc-web+proto`
    Binary,
    /// `application/grpc-web-text` (base64 body)
    #[default]
    Text,
}

impl WireFormat {
    /// Request/response content type.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Binary => "application/grpc-web+proto",
            Self::Text => "application/grpc-web-text",
        }
    }

    /// Detect the format of a response from its content type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.trim().to_ascii_lowercase();
        if ct.starts_with("application/grpc-web-text") {
            Some(Self::Text)
        } else if ct.starts_with("application/grpc-web") {
            Some(Self::Binary)
        } else {
            None
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            _ => Err(format!("Invalid wire format: {}", s)),
        }
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// One serialized message.
    Data(Bytes),
    /// Terminal trailers.
    Trailers(RpcStatus),
}

/// Frame a payload.
pub fn encode_frame(payload: &[u8], trailers: bool) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(if trailers { FLAG_TRAILERS } else { 0x00 });
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf
}

/// Encode a request body for `format`.
pub fn encode_request<M: Message>(msg: &M, format: WireFormat) -> Bytes {
    let framed = encode_frame(&msg.encode_to_vec(), false);
    match format {
        WireFormat::Binary => framed.freeze(),
        WireFormat::Text => Bytes::from(STANDARD.encode(&framed)),
    }
}

/// Encode a trailer frame carrying `status`. Used by servers and tests.
pub fn encode_trailers(status: &RpcStatus) -> BytesMut {
    let mut text = format!(
        "grpc-status: {}\r\ngrpc-message: {}\r\n",
        status.code.as_i32(),
        percent_encode(&status.details)
    );
    for (key, value) in &status.metadata {
        text.push_str(&format!("{}: {}\r\n", key, value));
    }
    encode_frame(text.as_bytes(), true)
}

/// Decode one protobuf message from a data frame payload.
pub fn decode_message<M: Message + Default>(payload: &[u8]) -> Result<M, StreamError> {
    M::decode(payload).map_err(|e| StreamError::Decode(e.to_string()))
}

/// Incremental response body decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    format: WireFormat,
    max_message_bytes: usize,
    /// Undecoded base64 characters (text format only).
    pending_text: Vec<u8>,
    /// Decoded bytes not yet split into frames.
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder.
    pub fn new(format: WireFormat, max_message_bytes: usize) -> Self {
        Self {
            format,
            max_message_bytes,
            pending_text: Vec::new(),
            buf: BytesMut::new(),
        }
    }

    /// Feed a body chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        match self.format {
            WireFormat::Binary => {
                self.buf.extend_from_slice(chunk);
                Ok(())
            }
            WireFormat::Text => {
                self.pending_text
                    .extend(chunk.iter().copied().filter(|c| !c.is_ascii_whitespace()));
                self.decode_text()
            }
        }
    }

    fn decode_text(&mut self) -> Result<(), StreamError> {
        loop {
            let usable = self.pending_text.len() / 4 * 4;
            if usable == 0 {
                return Ok(());
            }
            // A padded quantum closes a segment; decode through it.
            let end = match self.pending_text[..usable].iter().position(|&c| c == b'=') {
                Some(pos) => (pos / 4 + 1) * 4,
                None => usable,
            };
            let decoded = STANDARD
                .decode(&self.pending_text[..end])
                .map_err(|e| StreamError::Decode(format!("invalid base64 body: {}", e)))?;
            self.buf.extend_from_slice(&decoded);
            self.pending_text.drain(..end);
        }
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let flag = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > self.max_message_bytes {
            return Err(StreamError::Transport {
                code: RpcCode::ResourceExhausted,
                details: format!(
                    "frame of {} bytes exceeds limit of {}",
                    len, self.max_message_bytes
                ),
            });
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();

        if flag & FLAG_TRAILERS != 0 {
            return Ok(Some(Frame::Trailers(parse_trailers(&payload))));
        }
        if flag & FLAG_COMPRESSED != 0 {
            return Err(StreamError::Decode(
                "compressed frames are not supported".to_string(),
            ));
        }
        Ok(Some(Frame::Data(payload)))
    }

    /// Whether undecoded bytes remain (a truncated frame at end of body).
    pub fn has_remainder(&self) -> bool {
        !self.buf.is_empty() || !self.pending_text.is_empty()
    }
}

/// Parse a trailer frame payload into a status.
pub fn parse_trailers(payload: &[u8]) -> RpcStatus {
    let text = String::from_utf8_lossy(payload);
    status_from_headers(text.lines().filter_map(|line| {
        let (key, value) = line.split_once(':')?;
        Some((key.trim(), value.trim()))
    }))
    .unwrap_or_else(|| RpcStatus::new(RpcCode::Unknown, "trailers missing grpc-status"))
}

/// Extract a status from header pairs. `None` when `grpc-status` is absent.
pub fn status_from_headers<'a, I>(headers: I) -> Option<RpcStatus>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut code = None;
    let mut details = String::new();
    let mut metadata = Metadata::new();

    for (key, value) in headers {
        let key = key.to_ascii_lowercase();
        match key.as_str() {
            "grpc-status" => {
                code = Some(
                    value
                        .parse::<i32>()
                        .map(RpcCode::from_i32)
                        .unwrap_or(RpcCode::Unknown),
                )
            }
            "grpc-message" => details = percent_decode(value),
            _ => {
                metadata.insert(key, value.to_string());
            }
        }
    }

    code.map(|code| RpcStatus {
        code,
        details,
        metadata,
    })
}

/// Status for a non-200 HTTP response.
pub fn status_from_http(http_status: u16) -> RpcStatus {
    let code = match http_status {
        400 => RpcCode::Internal,
        401 => RpcCode::Unauthenticated,
        403 => RpcCode::PermissionDenied,
        404 => RpcCode::Unimplemented,
        429 | 502 | 503 | 504 => RpcCode::Unavailable,
        _ => RpcCode::Unknown,
    };
    RpcStatus::new(code, format!("HTTP status {}", http_status))
}

fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, GRPC_MESSAGE).to_string()
}
