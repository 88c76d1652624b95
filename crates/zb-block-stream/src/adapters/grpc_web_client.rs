//! gRPC-Web Client Adapter
//!
//! Implements `CompactTxStreamer` against a lightwalletd gRPC-Web proxy
//! (Envoy, grpcwebproxy) over HTTP/1.1 or HTTP/2 with `reqwest`.

use async_trait::async_trait;
use futures::StreamExt;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::{debug, warn};

use crate::algorithms::{
    decode_message, encode_request, status_from_headers, status_from_http, Frame, FrameDecoder,
    WireFormat,
};
use crate::domain::{
    BlockId, BlockRange, ChainSpec, CompactBlock, Metadata, RpcCode, RpcStatus, StreamError,
    DEFAULT_MAX_MESSAGE_BYTES, SERVICE_NAME,
};
use crate::ports::outbound::CompactTxStreamer;
use crate::ports::stream::{block_stream_channel, BlockStream, StreamSender, DEFAULT_EVENT_BUFFER};

/// Credentials attached to every call as request metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    /// `authorization: Bearer <token>`.
    Bearer(String),
    /// Arbitrary metadata headers.
    Metadata(Metadata),
}

impl Credentials {
    /// Request headers for these credentials. Names and values that are
    /// not valid HTTP headers are rejected.
    pub fn headers(&self) -> Result<HeaderMap, StreamError> {
        let mut headers = HeaderMap::new();
        match self {
            Self::Bearer(token) => {
                let value = header_value("authorization", &format!("Bearer {}", token))?;
                headers.insert(AUTHORIZATION, value);
            }
            Self::Metadata(metadata) => {
                for (key, value) in metadata {
                    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                        StreamError::InvalidEndpoint(format!("invalid metadata key {:?}", key))
                    })?;
                    headers.insert(name, header_value(key, value)?);
                }
            }
        }
        Ok(headers)
    }
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue, StreamError> {
    HeaderValue::from_str(value)
        .map_err(|_| StreamError::InvalidEndpoint(format!("invalid value for metadata key {:?}", key)))
}

/// Transport options.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Wire format.
    pub format: WireFormat,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout for unary calls.
    pub unary_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_message_bytes: usize,
    /// Event buffer per streaming call.
    pub channel_capacity: usize,
    /// Reject blocks whose compact records have wrong field widths.
    pub validate_blocks: bool,
    /// Value of the `x-user-agent` header.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            format: WireFormat::Text,
            connect_timeout: Duration::from_secs(10),
            unary_timeout: Duration::from_secs(30),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            channel_capacity: DEFAULT_EVENT_BUFFER,
            validate_blocks: true,
            user_agent: format!("zb-block-stream/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// gRPC-Web connection to one lightwalletd endpoint.
#[derive(Clone, Debug)]
pub struct GrpcWebClient {
    http: Client,
    endpoint: String,
    metadata: HeaderMap,
    options: ClientOptions,
}

impl GrpcWebClient {
    /// Create a client. Trailing slashes on `endpoint` are stripped.
    pub fn new(
        endpoint: impl AsRef<str>,
        credentials: Option<Credentials>,
        options: ClientOptions,
    ) -> Result<Self, StreamError> {
        let endpoint = normalize_endpoint(endpoint.as_ref())?;
        let metadata = match &credentials {
            Some(credentials) => credentials.headers()?,
            None => HeaderMap::new(),
        };
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| StreamError::InvalidEndpoint(e.to_string()))?;

        debug!(endpoint = %endpoint, format = ?options.format, "[zb-stream] gRPC-Web client created");
        Ok(Self {
            http,
            endpoint,
            metadata,
            options,
        })
    }

    /// Client with default options and no credentials.
    pub fn connect(endpoint: impl AsRef<str>) -> Result<Self, StreamError> {
        Self::new(endpoint, None, ClientOptions::default())
    }

    /// Transport options in use.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Full URL of a service method.
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{}/{}", self.endpoint, SERVICE_NAME, method)
    }

    fn request<M: Message>(&self, method: &str, msg: &M) -> RequestBuilder {
        let format = self.options.format;
        self.http
            .post(self.method_url(method))
            .header(CONTENT_TYPE, format.content_type())
            .header(ACCEPT, format.content_type())
            .header("x-grpc-web", "1")
            .header("x-user-agent", self.options.user_agent.as_str())
            .headers(self.metadata.clone())
            .body(encode_request(msg, format))
    }

    fn decoder_for(&self, response: &Response) -> FrameDecoder {
        let format = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(WireFormat::from_content_type)
            .unwrap_or(self.options.format);
        FrameDecoder::new(format, self.options.max_message_bytes)
    }
}

#[async_trait]
impl CompactTxStreamer for GrpcWebClient {
    async fn get_block_range(&self, range: BlockRange) -> Result<BlockStream, StreamError> {
        let (start, end) = range.bounds();
        debug!(start, end, endpoint = %self.endpoint, "[zb-stream] GetBlockRange");

        let request = self.request("GetBlockRange", &range);
        let (tx, rx) = block_stream_channel(self.options.channel_capacity);
        tokio::spawn(pump_block_range(self.clone(), request, tx));
        Ok(rx)
    }

    async fn get_latest_block(&self) -> Result<BlockId, StreamError> {
        let response = self
            .request("GetLatestBlock", &ChainSpec {})
            .timeout(self.options.unary_timeout)
            .send()
            .await
            .map_err(|e| status_from_reqwest(&e).to_error().unwrap_or(StreamError::Cancelled))?;

        if let Some(status) = response_status(&response) {
            return Err(status.to_error().unwrap_or_else(|| {
                StreamError::Decode("trailers-only response carried no message".to_string())
            }));
        }

        let mut decoder = self.decoder_for(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| status_from_reqwest(&e).to_error().unwrap_or(StreamError::Cancelled))?;
        decoder.push(&body)?;

        let mut block_id = None;
        while let Some(frame) = decoder.next_frame()? {
            match frame {
                Frame::Data(payload) if block_id.is_none() => {
                    block_id = Some(decode_message::<BlockId>(&payload)?);
                }
                Frame::Data(_) => warn!("[zb-stream] extra unary message ignored"),
                Frame::Trailers(status) => {
                    if let Some(err) = status.to_error() {
                        return Err(err);
                    }
                }
            }
        }
        block_id.ok_or_else(|| StreamError::Decode("unary response carried no message".to_string()))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Drive one streaming response into the event channel.
async fn pump_block_range(client: GrpcWebClient, request: RequestBuilder, mut tx: StreamSender) {
    let sent = tokio::select! {
        biased;
        _ = tx.cancelled() => {
            debug!("[zb-stream] cancelled before response");
            return;
        }
        sent = request.send() => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "[zb-stream] request failed");
            finish(tx, Some(status_from_reqwest(&e))).await;
            return;
        }
    };

    if let Some(status) = response_status(&response) {
        finish(tx, Some(status)).await;
        return;
    }

    let mut decoder = client.decoder_for(&response);
    let mut body = Box::pin(response.bytes_stream());
    loop {
        let chunk = tokio::select! {
            biased;
            _ = tx.cancelled() => {
                debug!("[zb-stream] cancelled mid-stream");
                return;
            }
            chunk = body.next() => chunk,
        };
        let chunk = match chunk {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!(error = %e, "[zb-stream] body read failed");
                finish(tx, Some(status_from_reqwest(&e))).await;
                return;
            }
        };

        if let Err(e) = decoder.push(&chunk) {
            finish(tx, Some(status_from_error(&e))).await;
            return;
        }
        loop {
            match decoder.next_frame() {
                Ok(None) => break,
                Ok(Some(Frame::Data(payload))) => {
                    let block = match decode_block(&payload, client.options.validate_blocks) {
                        Ok(block) => block,
                        Err(e) => {
                            warn!(error = %e, "[zb-stream] bad block frame");
                            finish(tx, Some(status_from_error(&e))).await;
                            return;
                        }
                    };
                    if tx.data(block).await.is_err() {
                        return;
                    }
                }
                Ok(Some(Frame::Trailers(status))) => {
                    if tx.status(status).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    finish(tx, Some(status_from_error(&e))).await;
                    return;
                }
            }
        }
    }

    let status = if decoder.has_remainder() && !tx.status_sent() {
        Some(RpcStatus::new(
            RpcCode::Internal,
            "response body ended mid-frame",
        ))
    } else {
        None
    };
    finish(tx, status).await;
}

async fn finish(mut tx: StreamSender, status: Option<RpcStatus>) {
    if let Some(status) = status {
        let _ = tx.status(status).await;
    }
    tx.end().await;
}

fn decode_block(payload: &[u8], validate: bool) -> Result<CompactBlock, StreamError> {
    let block: CompactBlock = decode_message(payload)?;
    if validate {
        block.validate()?;
    }
    Ok(block)
}

/// Status carried by the response head: a non-200 HTTP status or a
/// trailers-only response.
fn response_status(response: &Response) -> Option<RpcStatus> {
    let from_headers = status_from_headers(
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v))),
    );
    if !response.status().is_success() {
        return Some(from_headers.unwrap_or_else(|| status_from_http(response.status().as_u16())));
    }
    from_headers
}

fn status_from_reqwest(error: &reqwest::Error) -> RpcStatus {
    let code = if error.is_builder() {
        RpcCode::InvalidArgument
    } else if error.is_timeout() {
        RpcCode::DeadlineExceeded
    } else if error.is_decode() || error.is_body() {
        RpcCode::Internal
    } else {
        RpcCode::Unavailable
    };
    RpcStatus::new(code, error.to_string())
}

fn status_from_error(error: &StreamError) -> RpcStatus {
    let code = match error {
        StreamError::InvalidField { .. } => RpcCode::DataLoss,
        other => other.code().unwrap_or(RpcCode::Internal),
    };
    RpcStatus::new(code, error.to_string())
}

fn normalize_endpoint(endpoint: &str) -> Result<String, StreamError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|e| StreamError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(StreamError::InvalidEndpoint(format!(
            "{}: expected http(s)://host[:port]",
            endpoint
        )));
    }
    Ok(trimmed.to_string())
}
