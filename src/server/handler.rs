//! Connection handler module
//!
//! Drives one accepted connection through protocol classification and hands
//! it to the matched pipeline.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::common::{close_on_flush, AsyncStream, BoxedStream, ConnectionInfo, GatewayError, PrefixedStream, Result};
use crate::config::GatewayConfig;
use crate::protocol::{
    CallbackSink, Classifier, ConnectionRegistry, FatalEvent, Handoff, Inbound, MatcherSet, SlowProbeGuard, Stage,
    Verdict,
};

/// Shared, read-only state of the gateway
pub struct GatewayContext {
    /// Gateway configuration
    pub config: Arc<GatewayConfig>,
    /// Ordered protocol matchers
    pub matchers: MatcherSet,
    /// Callback sink
    pub sink: CallbackSink,
    /// Live connections
    pub registry: ConnectionRegistry,
}

enum Event {
    Read(std::io::Result<usize>),
    Fatal(FatalEvent),
}

/// Handle a single client connection
///
/// # Parameters
///
/// * `stream` - Accepted client stream
/// * `conn` - Connection description
/// * `ctx` - Gateway context
///
/// # Returns
///
/// Returns the result of the installed pipeline, or the error that ended
/// classification.
pub async fn handle_connection<S>(mut stream: S, conn: ConnectionInfo, ctx: Arc<GatewayContext>) -> Result<()>
where
    S: AsyncStream + 'static,
{
    let sink = ctx.sink.clone();
    sink.connection_init(&conn);

    let (handle, mut control) = ctx.registry.register(conn.id);
    let guard = SlowProbeGuard::arm(handle.downgrade(), Stage::Classifying, ctx.config.slow_probe_timeout());

    let buffer_size = ctx.config.buffer_size;
    let mut classifier = Classifier::new(ctx.matchers.clone());
    let mut chunk = vec![0u8; buffer_size];

    loop {
        let event = tokio::select! {
            read = stream.read(&mut chunk) => Event::Read(read),
            Some(fatal) = control.recv() => Event::Fatal(fatal),
        };

        let cause = match event {
            Event::Read(Ok(0)) => {
                classifier.on_close(&conn, &sink);
                return Ok(());
            }
            Event::Read(Ok(n)) => {
                let message = Inbound::Bytes(Bytes::copy_from_slice(&chunk[..n]));
                match classifier.on_message(message, &conn, &sink) {
                    Ok(Verdict::Pending) => continue,
                    Ok(Verdict::Matched { matcher, buffer }) => {
                        guard.disarm();
                        let stream: BoxedStream = Box::new(stream);
                        let handoff = Handoff {
                            stream: PrefixedStream::new(buffer, stream),
                            conn,
                            sink,
                            handle,
                            control,
                            buffer_size,
                        };
                        return matcher.install_pipeline(handoff).await;
                    }
                    Ok(Verdict::Exhausted { buffered }) => {
                        close_on_flush(&mut stream).await;
                        return Err(GatewayError::MatchExhausted { buffered });
                    }
                    Err(err) => {
                        close_on_flush(&mut stream).await;
                        return Err(err);
                    }
                }
            }
            Event::Read(Err(e)) => GatewayError::Io(e),
            Event::Fatal(event) => {
                if handle.stage() != Some(event.stage) {
                    continue;
                }
                event.error
            }
        };

        classifier.on_transport_error(&cause, &conn, &sink);
        close_on_flush(&mut stream).await;
        return Err(cause);
    }
}
