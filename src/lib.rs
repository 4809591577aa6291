//! # seqwire
//!
//! A minimal RPC runtime over any bidirectional byte stream.
//!
//! One connection opens with a JSON preamble naming the codec, then carries
//! codec-encoded header/body frames in both directions. The server handles
//! many requests per connection concurrently while serializing response
//! writes; the client keeps many calls in flight and matches responses back
//! by sequence number.
//!
//! ## Architecture
//!
//! - **Wire protocol** ([`protocol`]): header, preamble, unit framing
//! - **Codecs** ([`codec`]): MessagePack (default) and JSON, extensible by
//!   name through the process-wide registry
//! - **Services** ([`service`]): typed handlers registered under
//!   `"Service.Method"` names
//! - **Server / Client**: one task per connection, one task per request,
//!   one receive task per client
//!
//! ## Example
//!
//! ```ignore
//! use seqwire::{Client, Server, Service};
//!
//! #[tokio::main]
//! async fn main() -> seqwire::Result<()> {
//!     let server = Server::new();
//!     server.register(
//!         Service::builder("Foo")
//!             .method("Uppercase", |s: String, reply: &mut String| {
//!                 *reply = s.to_uppercase();
//!                 Ok(())
//!             })
//!             .build()?,
//!     )?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { server.accept(listener).await });
//!
//!     let client = Client::dial(&addr.to_string()).await?;
//!     let reply: String = client.call("Foo.Uppercase", "hello world").await?;
//!     assert_eq!(reply, "HELLO WORLD");
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod service;

mod client;
mod server;

pub use client::{Call, Client, Options};
pub use error::{MethodError, Result, RpcError};
pub use server::{accept, register, serve_conn, Server};
pub use service::{MethodDescriptor, Service, ServiceBuilder};
