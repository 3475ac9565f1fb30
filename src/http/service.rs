//! Built-in HTTP protocol matcher
//!
//! Claims connections starting with an origin-form HTTP request, then runs
//! the HTTP sub-router on them under its own slow-probe deadline.

use std::sync::Arc;

use bytes::BytesMut;
use futures::future::BoxFuture;
use log::Level;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::{close_on_flush, GatewayError, PrefixedStream, Result};
use crate::config::HttpConfig;
use crate::protocol::{FatalEvent, Handoff, MatchResult, Probe, ProtocolMatcher, SlowProbeGuard, Stage};

use super::codec::HttpDecoder;
use super::matcher::{HttpMatcher, NativeHandoff, NativeLimits};
use super::message::HttpResponse;
use super::pipeline::DefaultPipeline;
use super::router::{HttpRouter, Route};

enum RoutingEvent {
    Read(std::io::Result<usize>),
    Fatal(FatalEvent),
}

/// The plain-HTTP protocol matcher and its pipeline
pub struct HttpService {
    config: HttpConfig,
    matchers: Arc<[Arc<dyn HttpMatcher>]>,
    pipeline: DefaultPipeline,
}

impl HttpService {
    /// Create the service
    ///
    /// `matchers` are tried in order on every first request head; requests
    /// none of them claims go to `pipeline`.
    pub fn new(config: HttpConfig, matchers: Vec<Arc<dyn HttpMatcher>>, pipeline: DefaultPipeline) -> Self {
        Self {
            config,
            matchers: matchers.into(),
            pipeline,
        }
    }

    fn native_limits(&self) -> NativeLimits {
        NativeLimits {
            read_idle: self.config.native_read_idle(),
            write_idle: self.config.native_write_idle(),
            max_message_size: self.config.max_aggregate_size,
        }
    }

    async fn serve(self: Arc<Self>, handoff: Handoff) -> Result<()> {
        let Handoff { mut stream, conn, sink, handle, mut control, buffer_size } = handoff;

        handle.set_stage(Stage::HttpRouting);
        let guard = SlowProbeGuard::arm(handle.downgrade(), Stage::HttpRouting, self.config.slow_probe_timeout());

        let mut decoder = HttpDecoder::new(self.config.max_head_size);
        let mut router = HttpRouter::new(Arc::clone(&self.matchers));
        let mut chunk = vec![0u8; buffer_size];

        let route = loop {
            match decoder.decode() {
                Ok(Some(fragment)) => {
                    if let Some(route) = router.on_fragment(fragment, &conn, &sink)? {
                        break route;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    sink.log_error(&conn, Level::Debug, "bad http request", &err);
                    let _ = stream.write_all(&HttpResponse::bad_request().encode(false, true)).await;
                    close_on_flush(&mut stream).await;
                    return Err(err);
                }
            }

            let event = tokio::select! {
                read = stream.read(&mut chunk) => RoutingEvent::Read(read),
                Some(fatal) = control.recv() => RoutingEvent::Fatal(fatal),
            };

            match event {
                RoutingEvent::Read(Ok(0)) => {
                    sink.log(&conn, Level::Debug, "closed before a complete request head");
                    return Ok(());
                }
                RoutingEvent::Read(Ok(n)) => decoder.feed(&chunk[..n]),
                RoutingEvent::Read(Err(e)) => return Err(GatewayError::Io(e)),
                RoutingEvent::Fatal(event) => {
                    // Repeat the stage check here, the stage may have moved on since the timer fired.
                    if handle.stage() != Some(event.stage) {
                        continue;
                    }
                    sink.log_error(&conn, Level::Info, "http routing aborted", &event.error);
                    close_on_flush(&mut stream).await;
                    return Err(event.error);
                }
            }
        };

        guard.disarm();
        handle.set_stage(Stage::Handed);

        match route {
            Route::Native { matcher, head } => {
                // Bytes after the head go to the native pipeline untouched.
                let (unread, inner) = stream.into_parts();
                let mut remaining = BytesMut::from(&decoder.into_remaining()[..]);
                remaining.extend_from_slice(&unread);

                let native = NativeHandoff {
                    head,
                    stream: PrefixedStream::new(remaining.freeze(), inner),
                    conn,
                    sink,
                    handle,
                    limits: self.native_limits(),
                    buffer_size,
                };
                matcher.install_pipeline(native).await
            }
            Route::Default { replay } => {
                router.finish();
                let result = self.pipeline.run(&mut stream, decoder, replay, buffer_size, &conn, &sink).await;
                drop(handle);
                result
            }
        }
    }
}

impl ProtocolMatcher for HttpService {
    fn name(&self) -> &str {
        Probe::HttpPlain.name()
    }

    fn matches(&self, buf: &[u8]) -> MatchResult {
        Probe::HttpPlain.matches(buf)
    }

    fn install_pipeline(self: Arc<Self>, handoff: Handoff) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.serve(handoff))
    }
}
