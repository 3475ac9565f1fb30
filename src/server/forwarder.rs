//! Data forwarding module
//!
//! Protocols the gateway does not serve itself are forwarded byte-for-byte to
//! a configured upstream, starting with the bytes consumed while classifying.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use http::StatusCode;
use log::{debug, Level};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::common::{close_on_flush, ConnectionInfo, GatewayError, Result};
use crate::config::GatewayConfig;
use crate::http::{is_websocket, HttpMatcher, HttpResponse, NativeHandoff, RequestHead};
use crate::protocol::{CallbackSink, Handoff, MatchResult, Probe, ProtocolMatcher, Stage};

/// Time limits of a forwarded connection
///
/// `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardLimits {
    /// Close when the client sends nothing for this long
    pub read_idle: Option<Duration>,
    /// Close when nothing is written to the client for this long
    pub write_idle: Option<Duration>,
    /// Close when neither direction moves data for this long
    pub idle: Option<Duration>,
    /// How long the other direction may keep running once one side reached EOF
    pub drain: Option<Duration>,
}

impl ForwardLimits {
    /// Limits for byte-for-byte protocol forwarding
    pub fn forwarding(idle: Duration, drain: Duration) -> Self {
        Self {
            read_idle: None,
            write_idle: None,
            idle: Some(idle),
            drain: Some(drain),
        }
    }

    /// Limits for upgraded HTTP connections
    ///
    /// The per-direction idle limits also bound the drain.
    pub fn native(read_idle: Duration, write_idle: Duration) -> Self {
        Self {
            read_idle: Some(read_idle),
            write_idle: Some(write_idle),
            idle: None,
            drain: None,
        }
    }

    /// Forwarding limits taken from the configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::forwarding(config.forward_idle(), config.forward_drain())
    }
}

impl Default for ForwardLimits {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// How one direction of a forwarded connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Eof,
    Idle(Duration),
    Failed,
    DrainTimeout,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

/// Last time either direction moved data
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self { started: Instant::now(), last_ms: AtomicU64::new(0) }
    }

    fn touch(&self) {
        self.last_ms.store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn quiet_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Resolve once neither direction moved data for `limit`
async fn watch_idle(activity: &Activity, limit: Option<Duration>) -> Finish {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };

    loop {
        let quiet = activity.quiet_for();
        if quiet >= limit {
            return Finish::Idle(limit);
        }
        tokio::time::sleep(limit - quiet).await;
    }
}

/// Copy one direction until EOF, error or idle timeout
async fn copy_half<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    idle: Option<Duration>,
    activity: &Activity,
) -> (u64, Finish)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total_bytes = 0u64;

    loop {
        let read = match idle {
            Some(limit) => match timeout(limit, reader.read(&mut buffer)).await {
                Ok(read) => read,
                Err(_) => return (total_bytes, Finish::Idle(limit)),
            },
            None => reader.read(&mut buffer).await,
        };

        match read {
            Ok(0) => {
                // Propagate the half-close so the other side sees EOF too.
                let _ = writer.shutdown().await;
                return (total_bytes, Finish::Eof);
            }
            Ok(n) => {
                total_bytes += n as u64;
                activity.touch();
                if writer.write_all(&buffer[..n]).await.is_err() {
                    return (total_bytes, Finish::Failed);
                }
            }
            Err(_) => return (total_bytes, Finish::Failed),
        }
    }
}

/// Let the remaining direction finish, bounded by `limit` and the idle watch
async fn drain<F, I>(remaining: Pin<&mut F>, idle: Pin<&mut I>, limit: Option<Duration>) -> (u64, Finish)
where
    F: Future<Output = (u64, Finish)>,
    I: Future<Output = Finish>,
{
    let bounded = async {
        match limit {
            Some(limit) => timeout(limit, remaining).await.unwrap_or((0, Finish::DrainTimeout)),
            None => remaining.await,
        }
    };

    tokio::select! {
        result = bounded => result,
        finish = idle => (0, finish),
    }
}

/// Forward data between a client and an upstream
///
/// # Parameters
///
/// * `client` - Client side stream
/// * `upstream` - Upstream stream
/// * `buffer_size` - Copy buffer size per direction
/// * `limits` - Idle and drain limits
///
/// # Returns
///
/// Returns `Ok(())` once both directions are done or the drain ran out, and
/// `IdleTimeout` when an idle limit closed the connection.
pub async fn proxy_data<C, U>(client: C, upstream: U, buffer_size: usize, limits: ForwardLimits) -> Result<()>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (client_reader, client_writer) = tokio::io::split(client);
    let (upstream_reader, upstream_writer) = tokio::io::split(upstream);
    let activity = Activity::new();

    let client_to_upstream = copy_half(client_reader, upstream_writer, buffer_size, limits.read_idle, &activity);
    let upstream_to_client = copy_half(upstream_reader, client_writer, buffer_size, limits.write_idle, &activity);
    let idle = watch_idle(&activity, limits.idle);
    tokio::pin!(client_to_upstream);
    tokio::pin!(upstream_to_client);
    tokio::pin!(idle);

    let (done, finish) = tokio::select! {
        (total_bytes, finish) = &mut client_to_upstream => {
            debug!("Client to upstream finished ({:?}) after {} bytes", finish, total_bytes);
            (Some(Direction::ClientToUpstream), finish)
        }
        (total_bytes, finish) = &mut upstream_to_client => {
            debug!("Upstream to client finished ({:?}) after {} bytes", finish, total_bytes);
            (Some(Direction::UpstreamToClient), finish)
        }
        finish = &mut idle => (None, finish),
    };

    // A clean EOF lets the other direction drain; anything else drops both.
    let finish = match (done, finish) {
        (Some(Direction::ClientToUpstream), Finish::Eof) => {
            let (total_bytes, other) = drain(upstream_to_client, idle, limits.drain).await;
            debug!("Upstream to client finished ({:?}) after {} bytes", other, total_bytes);
            other
        }
        (Some(Direction::UpstreamToClient), Finish::Eof) => {
            let (total_bytes, other) = drain(client_to_upstream, idle, limits.drain).await;
            debug!("Client to upstream finished ({:?}) after {} bytes", other, total_bytes);
            other
        }
        (_, finish) => finish,
    };

    match finish {
        Finish::Idle(limit) => Err(GatewayError::IdleTimeout(limit.as_secs())),
        _ => Ok(()),
    }
}

/// Connect to an upstream with a timeout
pub async fn connect_upstream(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "Connection timed out")))?
        .map_err(GatewayError::Io)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Protocol matcher forwarding matched connections to an upstream
#[derive(Debug, Clone)]
pub struct ForwardMatcher {
    probe: Probe,
    upstream: SocketAddr,
    connect_timeout: Duration,
    limits: ForwardLimits,
}

impl ForwardMatcher {
    /// Forward connections recognised by `probe` to `upstream`
    pub fn new(probe: Probe, upstream: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            probe,
            upstream,
            connect_timeout,
            limits: ForwardLimits::default(),
        }
    }

    /// Replace the idle and drain limits
    pub fn with_limits(mut self, limits: ForwardLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl ProtocolMatcher for ForwardMatcher {
    fn name(&self) -> &str {
        self.probe.name()
    }

    fn matches(&self, buf: &[u8]) -> MatchResult {
        self.probe.matches(buf)
    }

    fn install_pipeline(self: Arc<Self>, handoff: Handoff) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let Handoff { mut stream, conn, sink, handle, buffer_size, .. } = handoff;
            handle.set_stage(Stage::Handed);

            let upstream = match connect_upstream(self.upstream, self.connect_timeout).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    sink.log_error(&conn, Level::Warn, &format!("{} upstream {} unreachable", self.name(), self.upstream), &err);
                    close_on_flush(&mut stream).await;
                    return Err(err);
                }
            };

            sink.log(&conn, Level::Debug, &format!("forwarding {} to {}", self.name(), self.upstream));
            let result = proxy_data(stream, upstream, buffer_size, self.limits).await;
            if let Err(err) = &result {
                sink.log_error(&conn, Level::Info, &format!("{} connection closed", self.name()), err);
            }
            drop(handle);
            result
        })
    }
}

/// Native HTTP matcher forwarding WebSocket upgrades to an upstream
#[derive(Debug, Clone)]
pub struct UpgradeForwarder {
    upstream: SocketAddr,
    connect_timeout: Duration,
}

impl UpgradeForwarder {
    /// Forward WebSocket upgrades to `upstream`
    pub fn new(upstream: SocketAddr, connect_timeout: Duration) -> Self {
        Self { upstream, connect_timeout }
    }

    /// Answer 502 and close after the upstream failed us
    async fn bad_gateway<S>(&self, stream: &mut S, conn: &ConnectionInfo, sink: &CallbackSink, message: &str, err: &GatewayError)
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        sink.log_error(conn, Level::Warn, &format!("websocket upstream {} {}", self.upstream, message), err);
        let _ = stream.write_all(&HttpResponse::status_text(StatusCode::BAD_GATEWAY).encode(false, true)).await;
        close_on_flush(stream).await;
    }
}

impl HttpMatcher for UpgradeForwarder {
    fn name(&self) -> &str {
        "websocket"
    }

    fn matches(&self, head: &RequestHead) -> bool {
        is_websocket(head)
    }

    fn install_pipeline(self: Arc<Self>, handoff: NativeHandoff) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let NativeHandoff { head, mut stream, conn, sink, handle, limits, buffer_size } = handoff;

            if let Ok(Some(length)) = head.content_length() {
                if length > limits.max_message_size as u64 {
                    sink.log(&conn, Level::Info, &format!("upgrade request body of {} bytes refused", length));
                    stream.write_all(&HttpResponse::payload_too_large().encode(false, true)).await?;
                    close_on_flush(&mut stream).await;
                    return Ok(());
                }
            }

            let mut upstream = match connect_upstream(self.upstream, self.connect_timeout).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    self.bad_gateway(&mut stream, &conn, &sink, "unreachable", &err).await;
                    return Err(err);
                }
            };

            if let Err(e) = upstream.write_all(&head.encode()).await {
                let err = GatewayError::Io(e);
                self.bad_gateway(&mut stream, &conn, &sink, "refused the request head", &err).await;
                return Err(err);
            }

            let forward_limits = ForwardLimits::native(limits.read_idle, limits.write_idle);
            let result = proxy_data(stream, upstream, buffer_size, forward_limits).await;
            if let Err(err) = &result {
                sink.log_error(&conn, Level::Info, "idle timeout", err);
            }
            drop(handle);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RecordingCallback;
    use tokio::net::TcpListener;

    fn unlimited() -> ForwardLimits {
        ForwardLimits { read_idle: None, write_idle: None, idle: None, drain: None }
    }

    #[tokio::test]
    async fn test_proxy_data_both_directions() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);

        let forward = tokio::spawn(proxy_data(client, upstream, 64, unlimited()));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_peer);
        drop(upstream_peer);
        forward.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_half_close_still_delivers_response() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);

        let forward = tokio::spawn(proxy_data(client, upstream, 64, ForwardLimits::forwarding(
            Duration::from_secs(5),
            Duration::from_secs(5),
        )));

        client_peer.write_all(b"request").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut request = Vec::new();
        upstream_peer.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        upstream_peer.write_all(b"response").await.unwrap();
        drop(upstream_peer);

        let mut response = Vec::new();
        client_peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"response");
        forward.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upstream_close_ends_after_drain() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, upstream_peer) = tokio::io::duplex(1024);
        drop(upstream_peer);

        let limits = ForwardLimits::forwarding(Duration::from_secs(60), Duration::from_millis(50));
        let result = timeout(Duration::from_secs(5), proxy_data(client, upstream, 64, limits)).await;
        assert!(matches!(result, Ok(Ok(()))));

        // The client saw the upstream's EOF while its own socket stayed open.
        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_client_half_close_ends_after_drain() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, _upstream_peer) = tokio::io::duplex(1024);
        client_peer.shutdown().await.unwrap();

        let limits = ForwardLimits::forwarding(Duration::from_secs(60), Duration::from_millis(50));
        let result = timeout(Duration::from_secs(5), proxy_data(client, upstream, 64, limits)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_connection_idle_limit() {
        let (client, _client_peer) = tokio::io::duplex(1024);
        let (upstream, _upstream_peer) = tokio::io::duplex(1024);

        let limits = ForwardLimits::forwarding(Duration::from_millis(50), Duration::from_secs(5));
        let result = timeout(Duration::from_secs(5), proxy_data(client, upstream, 64, limits)).await.unwrap();
        assert!(matches!(result, Err(GatewayError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_traffic_in_one_direction_keeps_connection_alive() {
        let (client, _client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);

        let limits = ForwardLimits::forwarding(Duration::from_millis(150), Duration::from_secs(5));
        let forward = tokio::spawn(proxy_data(client, upstream, 64, limits));

        // Only the upstream talks; the shared idle watch must not fire.
        for _ in 0..5 {
            upstream_peer.write_all(b"tick").await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert!(!forward.is_finished());
        forward.abort();
    }

    #[tokio::test]
    async fn test_native_read_idle() {
        let (client, _client_peer) = tokio::io::duplex(1024);
        let (upstream, _upstream_peer) = tokio::io::duplex(1024);

        let limits = ForwardLimits::native(Duration::from_millis(30), Duration::from_secs(5));
        let result = proxy_data(client, upstream, 64, limits).await;
        assert!(matches!(result, Err(GatewayError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_native_write_idle() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, _upstream_peer) = tokio::io::duplex(1024);

        let limits = ForwardLimits::native(Duration::from_secs(5), Duration::from_millis(30));
        let forward = tokio::spawn(proxy_data(client, upstream, 64, limits));

        // The client keeps talking but nothing is written back to it.
        client_peer.write_all(b"hello").await.unwrap();
        let result = timeout(Duration::from_secs(5), forward).await.unwrap().unwrap();
        assert!(matches!(result, Err(GatewayError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_bad_gateway_answers_502_and_closes() {
        let recorder = Arc::new(RecordingCallback::default());
        let sink = CallbackSink::new(recorder.clone());
        let conn = ConnectionInfo::new("127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap());
        let forwarder = UpgradeForwarder::new("127.0.0.1:9".parse().unwrap(), Duration::from_secs(1));
        let (mut stream, mut peer) = tokio::io::duplex(1024);

        let err = GatewayError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        forwarder.bad_gateway(&mut stream, &conn, &sink, "refused the request head", &err).await;

        let mut out = Vec::new();
        timeout(Duration::from_secs(5), peer.read_to_end(&mut out)).await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 502"));
        assert_eq!(
            recorder.events(),
            vec!["log:WARN:websocket upstream 127.0.0.1:9 refused the request head".to_string()]
        );
    }

    #[tokio::test]
    async fn test_connect_upstream_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_upstream(addr, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(GatewayError::Io(_))));
    }
}
