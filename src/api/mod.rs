//! HTTP Control API Module
//!
//! Status queries and operator-triggered re-discovery over REST.

mod http;

pub use http::HttpServer;
