//! Event Log HTTP transport
//!
//! In-process server for migration run streams. Uses tokio directly (no
//! web framework) to match the existing server pattern. Streams live in
//! memory: an append-only buffer of encoded events per run id, a
//! broadcast channel for live fan-out, and a TTL after which the stream
//! is discarded.
//!
//! Routes (all under `/migrations/{runId}`):
//! - `POST` — create the stream (with a `Stream-TTL` header) and/or
//!   append events: a JSON body is one event, an `application/x-ndjson`
//!   body is a batch, an empty body just creates.
//! - `GET ?offset=N` — catch-up read, ndjson body of `(offset, event)`
//!   lines from N (`-1` means from the start).
//! - `GET ?offset=N&live=sse` — live tail as SSE `id:`/`data:` frames.
//! - `HEAD` — existence probe: 200 = exists, 404 = absent or expired.

use crate::error::{MigrateError, Result};
use crate::stream::event::MigrationEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// TTL applied when a create request carries no Stream-TTL header
const DEFAULT_TTL_SECS: u64 = 86_400;

/// Broadcast capacity per stream; laggy tails refill from the buffer
const LIVE_CHANNEL_CAPACITY: usize = 1024;

struct StreamBuf {
    /// Encoded events; index = offset
    events: Vec<String>,
    created_at: Instant,
    ttl: Duration,
    live: broadcast::Sender<(u64, String)>,
}

impl StreamBuf {
    fn new(ttl: Duration) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            events: Vec::new(),
            created_at: Instant::now(),
            ttl,
            live,
        }
    }

    fn expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

struct ServerState {
    streams: RwLock<HashMap<String, StreamBuf>>,
}

impl ServerState {
    /// Drop the stream if its TTL has passed; returns whether it exists
    async fn check_alive(&self, run_id: &str) -> bool {
        let expired = {
            let streams = self.streams.read().await;
            match streams.get(run_id) {
                Some(buf) => buf.expired(),
                None => return false,
            }
        };
        if expired {
            let mut streams = self.streams.write().await;
            if streams.get(run_id).map(|b| b.expired()).unwrap_or(false) {
                info!("Stream {} expired, discarding", run_id);
                streams.remove(run_id);
            }
            return false;
        }
        true
    }
}

/// Event log server bound to a local address
pub struct EventLogServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl EventLogServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MigrateError::Stream(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                streams: RwLock::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MigrateError::Stream(format!("No local addr: {}", e)))
    }

    /// Token that stops the accept loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept loop; returns when the cancellation token fires
    pub async fn run(self) -> Result<()> {
        info!("Event log server listening on {}", self.local_addr()?);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Event log server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted
                        .map_err(|e| MigrateError::Stream(format!("Accept failed: {}", e)))?;
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            debug!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
            }
        }
    }
}

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    use tokio::time::timeout;

    let mut buffer = Vec::new();
    let mut temp_buf = [0u8; 8192];

    // Read until the header terminator, with a timeout
    let header_end = timeout(Duration::from_secs(10), async {
        loop {
            if let Some(pos) = find_header_end(&buffer) {
                return Ok::<usize, std::io::Error>(pos);
            }
            let n = stream.read(&mut temp_buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before headers",
                ));
            }
            buffer.extend_from_slice(&temp_buf[..n]);
        }
    })
    .await
    .map_err(|_| MigrateError::Stream("Request timeout".to_string()))??;

    let header_text = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = header_text.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| MigrateError::Stream("Empty request".to_string()))?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(MigrateError::Stream("Invalid request line".to_string()));
    }
    let method = parts[0].to_string();
    let raw_path = parts[1];

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let (path, query) = match raw_path.find('?') {
        Some(q_pos) => {
            let (p, q) = raw_path.split_at(q_pos);
            let params: HashMap<String, String> = q[1..]
                .split('&')
                .filter_map(|pair| {
                    let mut kv = pair.split('=');
                    match (kv.next(), kv.next()) {
                        (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
                        _ => None,
                    }
                })
                .collect();
            (p.to_string(), params)
        }
        None => (raw_path.to_string(), HashMap::new()),
    };

    // Body per Content-Length, continuing from what we already buffered
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream
            .read(&mut temp_buf)
            .await
            .map_err(|e| MigrateError::Stream(format!("Body read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&temp_buf[..n]);
    }
    body.truncate(content_length);

    Ok(Request {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let request = read_request(&mut stream).await?;

    let run_id = match request.path.strip_prefix("/migrations/") {
        Some(rest) if !rest.is_empty() && !rest.contains('/') => rest.to_string(),
        _ => {
            write_response(&mut stream, 404, "application/json", b"{\"error\":\"not found\"}")
                .await?;
            return Ok(());
        }
    };

    match request.method.as_str() {
        "HEAD" => {
            let status = if state.check_alive(&run_id).await { 200 } else { 404 };
            write_response(&mut stream, status, "application/json", b"").await?;
        }
        "POST" => handle_post(&mut stream, &state, &run_id, &request).await?,
        "GET" => {
            if request.query.get("live").map(|v| v == "sse").unwrap_or(false) {
                handle_tail(stream, &state, &run_id, &request).await?;
            } else {
                handle_catch_up(&mut stream, &state, &run_id, &request).await?;
            }
        }
        _ => {
            write_response(&mut stream, 405, "application/json", b"{\"error\":\"method not allowed\"}")
                .await?;
        }
    }
    Ok(())
}

async fn handle_post(
    stream: &mut TcpStream,
    state: &Arc<ServerState>,
    run_id: &str,
    request: &Request,
) -> Result<()> {
    // Decode events before taking the write lock; a malformed body must
    // not partially append.
    let body = String::from_utf8_lossy(&request.body);
    let is_batch = request
        .headers
        .get("content-type")
        .map(|v| v.contains("x-ndjson"))
        .unwrap_or(false);

    let mut events = Vec::new();
    let lines: Vec<&str> = if is_batch {
        body.lines().filter(|l| !l.trim().is_empty()).collect()
    } else if body.trim().is_empty() {
        Vec::new()
    } else {
        vec![body.trim()]
    };
    for line in lines {
        match MigrationEvent::decode(line) {
            Ok(event) => events.push(event.encode()?),
            Err(e) => {
                let msg = format!("{{\"error\":\"invalid event: {}\"}}", e);
                write_response(stream, 400, "application/json", msg.as_bytes()).await?;
                return Ok(());
            }
        }
    }

    let ttl = request
        .headers
        .get("stream-ttl")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TTL_SECS);

    let mut streams = state.streams.write().await;
    let buf = streams
        .entry(run_id.to_string())
        .or_insert_with(|| StreamBuf::new(Duration::from_secs(ttl)));
    if buf.expired() {
        *buf = StreamBuf::new(Duration::from_secs(ttl));
    }

    let mut offset = buf.events.len() as u64;
    let appended = events.len();
    for encoded in events {
        // Live tails may have no receivers; that is fine
        let _ = buf.live.send((offset, encoded.clone()));
        buf.events.push(encoded);
        offset += 1;
    }

    let response = format!(
        "{{\"appended\":{},\"nextOffset\":{}}}",
        appended,
        buf.events.len()
    );
    drop(streams);
    write_response(stream, 200, "application/json", response.as_bytes()).await
}

fn parse_offset(request: &Request) -> u64 {
    // "-1" means from the start
    match request.query.get("offset").map(|s| s.as_str()) {
        Some("-1") | None => 0,
        Some(s) => s.parse().unwrap_or(0),
    }
}

async fn handle_catch_up(
    stream: &mut TcpStream,
    state: &Arc<ServerState>,
    run_id: &str,
    request: &Request,
) -> Result<()> {
    if !state.check_alive(run_id).await {
        write_response(stream, 404, "application/json", b"{\"error\":\"stream not found\"}")
            .await?;
        return Ok(());
    }
    let from = parse_offset(request) as usize;

    let body = {
        let streams = state.streams.read().await;
        let buf = match streams.get(run_id) {
            Some(buf) => buf,
            None => {
                drop(streams);
                write_response(stream, 404, "application/json", b"{\"error\":\"stream not found\"}")
                    .await?;
                return Ok(());
            }
        };
        let mut body = String::new();
        for encoded in buf.events.iter().skip(from) {
            body.push_str(encoded);
            body.push('\n');
        }
        body
    };

    write_response(stream, 200, "application/x-ndjson", body.as_bytes()).await
}

async fn handle_tail(
    mut stream: TcpStream,
    state: &Arc<ServerState>,
    run_id: &str,
    request: &Request,
) -> Result<()> {
    if !state.check_alive(run_id).await {
        write_response(&mut stream, 404, "application/json", b"{\"error\":\"stream not found\"}")
            .await?;
        return Ok(());
    }
    let from = parse_offset(request);

    // Subscribe before snapshotting the buffer so no append can fall
    // between catch-up and live delivery.
    let (mut rx, buffered) = {
        let streams = state.streams.read().await;
        let buf = match streams.get(run_id) {
            Some(buf) => buf,
            None => {
                drop(streams);
                write_response(&mut stream, 404, "application/json", b"{\"error\":\"stream not found\"}")
                    .await?;
                return Ok(());
            }
        };
        let rx = buf.live.subscribe();
        let buffered: Vec<(u64, String)> = buf
            .events
            .iter()
            .enumerate()
            .skip(from as usize)
            .map(|(i, e)| (i as u64, e.clone()))
            .collect();
        (rx, buffered)
    };

    let header = "HTTP/1.1 200 OK\r\n\
         Content-Type: text/event-stream\r\n\
         Cache-Control: no-cache\r\n\
         Connection: keep-alive\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n";
    stream.write_all(header.as_bytes()).await?;

    let mut next = from;
    for (offset, encoded) in buffered {
        write_sse_frame(&mut stream, offset, &encoded).await?;
        next = offset + 1;
    }
    stream.flush().await?;

    loop {
        match rx.recv().await {
            Ok((offset, encoded)) => {
                // Duplicates of what the snapshot already covered
                if offset < next {
                    continue;
                }
                write_sse_frame(&mut stream, offset, &encoded).await?;
                stream.flush().await?;
                next = offset + 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Refill the gap from the buffer
                debug!("Tail for {} lagged by {}, refilling", run_id, skipped);
                let refill: Vec<(u64, String)> = {
                    let streams = state.streams.read().await;
                    match streams.get(run_id) {
                        Some(buf) => buf
                            .events
                            .iter()
                            .enumerate()
                            .skip(next as usize)
                            .map(|(i, e)| (i as u64, e.clone()))
                            .collect(),
                        None => break,
                    }
                };
                for (offset, encoded) in refill {
                    write_sse_frame(&mut stream, offset, &encoded).await?;
                    next = offset + 1;
                }
                stream.flush().await?;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

async fn write_sse_frame(stream: &mut TcpStream, offset: u64, encoded: &str) -> Result<()> {
    let frame = format!("id: {}\ndata: {}\n\n", offset, encoded);
    stream
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| MigrateError::Stream(format!("Tail write failed: {}", e)))
}

async fn write_response(
    stream: &mut TcpStream,
    status_code: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_text = match status_code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    // One request per connection; announce it so clients do not pool
    let header = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\
         \r\n",
        status_code,
        status_text,
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Bind on an ephemeral local port and run in a background task.
/// Returns the base URL and a token that stops the server.
pub async fn spawn_local() -> Result<(String, CancellationToken)> {
    let server = EventLogServer::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Event log server failed: {}", e);
        }
    });
    Ok((format!("http://{}", addr), cancel))
}
