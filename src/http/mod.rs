//! HTTP module
//!
//! Everything that happens after a connection has been classified as plain
//! HTTP: request decoding, the native/default sub-router, the default
//! request/response pipeline and the application interface.

mod application;
mod codec;
mod matcher;
mod message;
mod pipeline;
mod router;
mod service;

pub use application::{HttpApplication, StatusApplication};
pub use codec::{HttpDecoder, HttpFragment, RequestHead};
pub use matcher::{is_websocket, HttpMatcher, NativeHandoff, NativeLimits};
pub use message::{HttpRequest, HttpResponse};
pub use pipeline::{DefaultPipeline, WorkerPool};
pub use router::{HttpRouter, Route, RouterState};
pub use service::HttpService;
