//! An asynchronous web server for small devices, on top of `micro-async-http`.
//!
//! Requests are handled as callbacks while their bytes arrive: a [`Server`] picks a
//! handler once the head is parsed, streams the body to it and sends the response as
//! fast as the socket acknowledges it. Connections may be upgraded to a
//! [`websocket::WebSocket`] or an [`sse::EventSource`], whose registries broadcast to
//! every subscribed client.
//!
//! # Example
//!
//! ```no_run
//! use micro_async_http::protocol::MethodSet;
//! use micro_async_web::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder().address("0.0.0.0:8080").build().unwrap();
//!     server.on("/", MethodSet::GET, |request| {
//!         request.send_text(200, "text/plain", "hello world");
//!     });
//!     server.start().await.unwrap();
//! }
//! ```
//!
//! # Modules
//!
//! - [`handler`]: callback, static file and JSON handlers
//! - [`middleware`]: the request middleware chain and its stock middlewares
//! - [`filter`]: predicates restricting handlers and rewrites
//! - [`websocket`] and [`sse`]: upgraded connections
//! - [`fs`]: a filesystem backed by a host directory
//!
//! The socket driver in this crate runs on tokio; embedded targets feed
//! [`Connection`] from their own TCP callbacks instead.

mod broadcast;
mod config;
mod digest;
mod error;
mod net;
mod request;
mod rewrite;
mod server;

pub mod filter;
pub mod fs;
pub mod handler;
pub mod middleware;
pub mod sse;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use broadcast::SendStatus;
pub use config::ServerConfig;
pub use digest::digest_hash;
pub use error::ServerError;
pub use micro_async_http::url_decode;
pub use net::SEND_WINDOW;
pub use request::{HANDLE_LOCK_TIMEOUT, Request, RequestHandle};
pub use rewrite::Rewrite;
pub use server::{Connection, Server, ServerBuilder};
