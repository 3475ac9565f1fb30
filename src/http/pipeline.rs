//! Default HTTP pipeline
//!
//! Aggregates each request, runs the application on a bounded pool of
//! blocking workers and writes the response back, honouring keep-alive.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::Method;
use log::Level;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::common::{close_on_flush, ConnectionInfo, GatewayError, Result};
use crate::protocol::CallbackSink;

use super::application::HttpApplication;
use super::codec::{HttpDecoder, HttpFragment, RequestHead};
use super::message::{HttpRequest, HttpResponse};

/// Bounded pool of blocking workers
///
/// Tasks are rejected, not queued, once every worker is busy.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` tasks at once
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on a blocking worker, or fail right away if none is free
    pub fn try_spawn<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            GatewayError::ApplicationDispatch(format!("all {} workers are busy", self.size))
        })?;

        Ok(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        }))
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// Request/response pipeline behind the HTTP sub-router
#[derive(Clone)]
pub struct DefaultPipeline {
    application: Arc<dyn HttpApplication>,
    pool: WorkerPool,
    idle_timeout: Duration,
    max_body_size: usize,
}

/// A request being aggregated
struct Pending {
    head: RequestHead,
    body: BytesMut,
}

impl DefaultPipeline {
    /// Create the pipeline
    pub fn new(
        application: Arc<dyn HttpApplication>,
        pool: WorkerPool,
        idle_timeout: Duration,
        max_body_size: usize,
    ) -> Self {
        Self { application, pool, idle_timeout, max_body_size }
    }

    /// Worker pool used for dispatch
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Serve requests until the peer closes, asks to close, or goes idle
    ///
    /// `replay` holds fragments decoded before the pipeline was installed;
    /// they are processed before anything else.
    pub async fn run<S>(
        &self,
        stream: &mut S,
        mut decoder: HttpDecoder,
        mut replay: VecDeque<HttpFragment>,
        buffer_size: usize,
        conn: &ConnectionInfo,
        sink: &CallbackSink,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let mut chunk = vec![0u8; buffer_size];
        let mut pending: Option<Pending> = None;

        loop {
            let fragment = match replay.pop_front() {
                Some(fragment) => fragment,
                None => match decoder.decode() {
                    Ok(Some(fragment)) => fragment,
                    Ok(None) => {
                        let n = match timeout(self.idle_timeout, stream.read(&mut chunk)).await {
                            Ok(read) => read?,
                            Err(_) => {
                                sink.log(conn, Level::Info, &format!("read timeout after {:?}", self.idle_timeout));
                                close_on_flush(stream).await;
                                return Err(GatewayError::IdleTimeout(self.idle_timeout.as_secs()));
                            }
                        };
                        if n == 0 {
                            sink.log(conn, Level::Debug, "peer closed the connection");
                            return Ok(());
                        }
                        decoder.feed(&chunk[..n]);
                        continue;
                    }
                    Err(err) => {
                        sink.log_error(conn, Level::Debug, "malformed request", &err);
                        let _ = stream.write_all(&HttpResponse::bad_request().encode(false, true)).await;
                        close_on_flush(stream).await;
                        return Err(err);
                    }
                },
            };

            match fragment {
                HttpFragment::Head(head) => {
                    if let Ok(Some(length)) = head.content_length() {
                        if length > self.max_body_size as u64 {
                            return self.reject_too_large(stream, conn, sink).await;
                        }
                    }
                    pending = Some(Pending { head, body: BytesMut::new() });
                }
                HttpFragment::Body(data) => {
                    if let Some(request) = pending.as_mut() {
                        if request.body.len() + data.len() > self.max_body_size {
                            return self.reject_too_large(stream, conn, sink).await;
                        }
                        request.body.extend_from_slice(&data);
                    }
                }
                HttpFragment::End => {
                    let Some(Pending { head, body }) = pending.take() else {
                        continue;
                    };
                    let keep_alive = head.is_keep_alive();
                    let include_body = head.method != Method::HEAD;

                    let response = self.dispatch(HttpRequest::new(head, body.freeze()), conn, sink).await;
                    stream.write_all(&response.encode(keep_alive, include_body)).await?;
                    stream.flush().await?;

                    if !keep_alive {
                        close_on_flush(stream).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(&self, request: HttpRequest, conn: &ConnectionInfo, sink: &CallbackSink) -> HttpResponse {
        sink.application_dispatch(conn, &request.url());

        let application = Arc::clone(&self.application);
        let task = match self.pool.try_spawn(move || application.handle(request)) {
            Ok(task) => task,
            Err(err) => {
                sink.log_error(conn, Level::Warn, "application dispatch rejected", &err);
                return HttpResponse::service_unavailable();
            }
        };

        match task.await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                sink.log_error(conn, Level::Warn, "application failed", &err);
                HttpResponse::internal_error()
            }
            Err(join_err) => {
                let err = GatewayError::Other(format!("application task failed: {}", join_err));
                sink.log_error(conn, Level::Error, "application panicked", &err);
                HttpResponse::internal_error()
            }
        }
    }

    async fn reject_too_large<S>(&self, stream: &mut S, conn: &ConnectionInfo, sink: &CallbackSink) -> Result<()>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        sink.log(conn, Level::Info, &format!("request body exceeds {} bytes", self.max_body_size));
        stream.write_all(&HttpResponse::payload_too_large().encode(false, true)).await?;
        close_on_flush(stream).await;
        Ok(())
    }
}
