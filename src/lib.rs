//! # broccoli-client
//!
//! Async client for the Bro event-exchange protocol: typed events over a
//! TCP stream, with handler-based dispatch of inbound events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Connection                        │
//! │  send() / register_for_event() / close()                │
//! └──────────┬──────────────────────────────────┬───────────┘
//!            │                                  │
//!            ▼                                  ▼
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │     Writer Task      │          │     Receive Loop     │
//! │ batches + vectored   │          │ FrameBuffer reassembly│
//! │ writes, backpressure │          │ EventRegistry dispatch│
//! └──────────┬───────────┘          └──────────▲───────────┘
//!            │            TCP stream           │
//!            └──────────────►◄─────────────────┘
//! ```
//!
//! ## Layers
//!
//! - [`value`] - the typed value model ([`value::BroValue`]) and its
//!   binary codec
//! - [`protocol`] - event frames, stream reassembly, and the handshake
//! - [`dispatch`] - routing inbound events to registered handlers
//! - [`Connection`] / [`ConnectionBuilder`] - connection lifecycle
//!
//! ## Quick start
//!
//! ```ignore
//! use broccoli_client::{Connection, Event};
//!
//! #[tokio::main]
//! async fn main() -> broccoli_client::Result<()> {
//!     let conn = Connection::builder()
//!         .peer_class("rust-client")
//!         .register("foo")
//!         .on_event("foo", |event| async move {
//!             println!("received foo: {:?}", event.args());
//!             Ok(())
//!         })
//!         .connect("127.0.0.1:47760")
//!         .await?;
//!
//!     conn.send(&Event::new("bar").arg("hello").arg(42i64)).await?;
//!     conn.wait_until_closed().await;
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod value;

mod connection;
mod writer;

pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use error::{BroError, Result};
pub use protocol::{Event, FrameBuffer, FrameLimits};
pub use value::{BroEnum, BroPort, BroRecord, BroSubnet, BroTable, BroTime, BroValue};
pub use writer::WriterConfig;
