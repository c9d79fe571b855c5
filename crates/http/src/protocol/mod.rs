//! Core HTTP protocol value types.
//!
//! This module provides the building blocks the request parser and the response
//! engine share:
//!
//! - **Headers** ([`header`]): [`Header`] and the ordered, case-insensitive [`Headers`] list,
//!   including the set of names allowed only once
//! - **Parameters** ([`param`]): [`Param`] tagged by [`ParamKind`] (query, form post, file)
//! - **Methods** ([`method`]): the [`MethodSet`] mask used for route matching and the
//!   request-line method parser
//! - **Request head** ([`request`]): [`RequestHead`] with the recognized header fields
//! - **Status** ([`status`]): the reason phrase table
//! - **Errors** ([`error`]): [`ParseError`]
//!
//! # Example
//!
//! ```
//! use micro_async_http::protocol::{Header, Headers};
//!
//! let mut headers = Headers::new();
//! assert!(headers.add(Header::new("Content-Length", "10"), false));
//! assert!(!headers.add(Header::new("content-length", "12"), false));
//! assert_eq!(headers.value("CONTENT-LENGTH"), Some("10"));
//! ```

pub mod header;
pub mod method;
pub mod param;
pub mod request;
pub mod status;

mod error;

pub use error::ParseError;
pub use header::{Header, Headers};
pub use method::MethodSet;
pub use param::{Param, ParamKind};
pub use request::{AuthScheme, ConnectionKind, RequestHead};
pub use status::reason_phrase;
