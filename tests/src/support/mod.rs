//! # Mock gRPC-Web Proxy
//!
//! Minimal stand-in for an Envoy/grpcwebproxy in front of lightwalletd.
//! Serves synthetic blocks (`mock_block`) in either wire format, each
//! frame flushed as its own chunk, so text bodies arrive as separately
//! padded base64 segments like real proxies send them.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use prost::Message;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use zb_block_stream::algorithms::{encode_frame, encode_trailers, Frame, FrameDecoder, WireFormat};
use zb_block_stream::ports::{mock_block, mock_hash};
use zb_block_stream::{BlockId, BlockRange, RpcCode, RpcStatus, SERVICE_NAME};

/// Delivery order of a served range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Ascending heights.
    Ascending,
    /// Odd offsets first, then even offsets.
    Interleaved,
    /// Descending heights.
    Reversed,
}

/// Behavior of one `GetBlockRange` call.
#[derive(Clone, Debug)]
pub enum Script {
    /// Every block, then OK trailers.
    Serve(Order),
    /// `blocks` blocks, then `status` trailers.
    ErrorAfter { blocks: usize, status: RpcStatus },
    /// `blocks` blocks, then half a frame; no trailers.
    Truncated { blocks: usize },
    /// Every block; body closes without trailers.
    NoTrailers,
    /// Empty body with the status in the response headers.
    TrailersOnly(RpcStatus),
    /// Non-200 response.
    Http(u16),
    /// Every block with a pause before each frame.
    Slow(Duration),
}

/// Proxy state.
pub struct MockProxy {
    tip: u64,
    default: Script,
    queued: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<(u64, u64)>>,
    content_types: Mutex<Vec<String>>,
    headers: Mutex<Vec<HeaderMap>>,
}

impl MockProxy {
    /// Proxy serving `default` for every call.
    pub fn new(default: Script) -> Self {
        Self {
            tip: 3_000_000,
            default,
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            content_types: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        }
    }

    /// Chain tip; ranges past it are rejected with `OUT_OF_RANGE`.
    pub fn with_tip(mut self, tip: u64) -> Self {
        self.tip = tip;
        self
    }

    /// Serve `script` for the next call before falling back to the default.
    pub fn then(self, script: Script) -> Self {
        self.queued.lock().unwrap().push_back(script);
        self
    }

    fn next_script(&self) -> Script {
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Running proxy. Aborted on drop.
pub struct ProxyHandle {
    /// Bound address.
    pub addr: SocketAddr,
    state: Arc<MockProxy>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    /// Base URL of the proxy.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Ranges requested so far.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Values of header `name` on every request so far, in arrival order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.state
            .headers
            .lock()
            .unwrap()
            .iter()
            .filter_map(|headers| headers.get(name)?.to_str().ok().map(str::to_string))
            .collect()
    }

    /// Request content types seen so far.
    pub fn content_types(&self) -> Vec<String> {
        self.state.content_types.lock().unwrap().clone()
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind to an ephemeral loopback port and serve `proxy`.
pub async fn spawn_proxy(proxy: MockProxy) -> ProxyHandle {
    let state = Arc::new(proxy);
    let app = Router::new()
        .route(&format!("/{}/GetBlockRange", SERVICE_NAME), post(get_block_range))
        .route(&format!("/{}/GetLatestBlock", SERVICE_NAME), post(get_latest_block))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    ProxyHandle { addr, state, task }
}

fn request_format(headers: &HeaderMap) -> Option<WireFormat> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(WireFormat::from_content_type)
}

fn decode_request<M: Message + Default>(format: WireFormat, body: &[u8]) -> Option<M> {
    let mut decoder = FrameDecoder::new(format, 1 << 20);
    decoder.push(body).ok()?;
    match decoder.next_frame().ok()?? {
        Frame::Data(payload) => M::decode(payload).ok(),
        Frame::Trailers(_) => None,
    }
}

fn wire(format: WireFormat, frame: &[u8]) -> Bytes {
    match format {
        WireFormat::Binary => Bytes::copy_from_slice(frame),
        WireFormat::Text => Bytes::from(STANDARD.encode(frame)),
    }
}

fn heights(start: u64, end: u64, order: Order) -> Vec<u64> {
    let mut heights: Vec<u64> = (start..=end).collect();
    match order {
        Order::Ascending => {}
        Order::Reversed => heights.reverse(),
        Order::Interleaved => {
            let (odd, even): (Vec<u64>, Vec<u64>) =
                heights.into_iter().partition(|h| (h - start) % 2 == 1);
            heights = odd.into_iter().chain(even).collect();
        }
    }
    heights
}

fn block_frame(height: u64) -> Vec<u8> {
    encode_frame(&mock_block(height).encode_to_vec(), false).to_vec()
}

fn response(format: WireFormat, chunks: Vec<Bytes>, pause: Option<Duration>) -> Response {
    let body = futures::stream::iter(chunks).then(move |chunk| async move {
        if let Some(pause) = pause {
            tokio::time::sleep(pause).await;
        }
        Ok::<Bytes, std::io::Error>(chunk)
    });
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, format.content_type())
        .body(Body::from_stream(body))
        .expect("valid response")
}

async fn get_block_range(
    State(state): State<Arc<MockProxy>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.headers.lock().unwrap().push(headers.clone());
    let Some(format) = request_format(&headers) else {
        return status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    };
    state
        .content_types
        .lock()
        .unwrap()
        .push(format.content_type().to_string());
    let Some(range) = decode_request::<BlockRange>(format, &body) else {
        return status_only(StatusCode::BAD_REQUEST);
    };
    let (start, end) = range.bounds();
    state.requests.lock().unwrap().push((start, end));

    if start > end || end > state.tip {
        let trailers = encode_trailers(&RpcStatus::new(
            RpcCode::OutOfRange,
            format!("range [{}, {}] beyond tip {}", start, end, state.tip),
        ));
        return response(format, vec![wire(format, &trailers)], None);
    }

    let ok = wire(format, &encode_trailers(&RpcStatus::ok()));
    let all = |order: Order| -> Vec<Bytes> {
        heights(start, end, order)
            .into_iter()
            .map(|h| wire(format, &block_frame(h)))
            .collect()
    };

    match state.next_script() {
        Script::Serve(order) => {
            let mut chunks = all(order);
            chunks.push(ok);
            response(format, chunks, None)
        }
        Script::ErrorAfter { blocks, status } => {
            let mut chunks: Vec<Bytes> = all(Order::Ascending).into_iter().take(blocks).collect();
            chunks.push(wire(format, &encode_trailers(&status)));
            response(format, chunks, None)
        }
        Script::Truncated { blocks } => {
            let mut chunks: Vec<Bytes> = all(Order::Ascending).into_iter().take(blocks).collect();
            let next = block_frame(start + blocks as u64);
            chunks.push(wire(format, &next[..next.len() / 2]));
            response(format, chunks, None)
        }
        Script::NoTrailers => response(format, all(Order::Ascending), None),
        Script::TrailersOnly(status) => axum::http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, format.content_type())
            .header("grpc-status", status.code.as_i32().to_string())
            .header("grpc-message", status.details.clone())
            .body(Body::empty())
            .expect("valid response"),
        Script::Http(code) => status_only(StatusCode::from_u16(code).expect("valid status")),
        Script::Slow(pause) => {
            let mut chunks = all(Order::Ascending);
            chunks.push(ok);
            response(format, chunks, Some(pause))
        }
    }
}

async fn get_latest_block(State(state): State<Arc<MockProxy>>, headers: HeaderMap) -> Response {
    state.headers.lock().unwrap().push(headers.clone());
    let format = request_format(&headers).unwrap_or(WireFormat::Binary);
    let tip = BlockId {
        height: state.tip,
        hash: mock_hash(state.tip).to_vec(),
    };
    let chunks = vec![
        wire(format, &encode_frame(&tip.encode_to_vec(), false)),
        wire(format, &encode_trailers(&RpcStatus::ok())),
    ];
    response(format, chunks, None)
}

fn status_only(code: StatusCode) -> Response {
    axum::http::Response::builder()
        .status(code)
        .body(Body::empty())
        .expect("valid response")
}
