//! # GBXRemote Client Library
//!
//! Client side of the XML-RPC remote-control protocol spoken by the racing
//! game's dedicated server. A controller opens one TCP connection, reads the
//! protocol banner, authenticates and then issues method calls while the
//! server pushes gameplay callbacks over the same socket.
//!
//! ## Module Organization
//!
//! ### Value Module (`value`)
//! The tagged value model shared by requests, responses and callbacks.
//! Structs keep member order.
//!
//! ### Codec Module (`codec`)
//! Encodes method calls and decodes responses, faults and callbacks from
//! XML-RPC documents.
//!
//! ### Transport Module (`transport`)
//! Handshake and framing over any async byte stream:
//! - `GBXRemote 1` frames are `size . payload`
//! - `GBXRemote 2` frames are `size . handle . payload`
//! - Replies are matched by handle, callbacks are queued
//! - Size limits are checked before any payload is buffered
//!
//! ### Client Module (`client`)
//! `RpcClient` ties the codec to the transport and turns server faults into
//! typed errors.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rpc::{RpcClient, TransportConfig, Value};
//!
//! # async fn run() -> Result<(), rpc::RpcError> {
//! let mut client = RpcClient::connect("127.0.0.1:5000", TransportConfig::default()).await?;
//! client.authenticate("SuperAdmin", "SuperAdmin").await?;
//! client.enable_callbacks(true).await?;
//!
//! let players = client.call("GetPlayerList", &[Value::from(100), Value::from(0)]).await?;
//! println!("{:?}", players);
//!
//! for callback in client.poll_callbacks() {
//!     println!("{:?}", callback);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Model
//!
//! Transport errors close the connection and have to be handled by
//! reconnecting. Codec errors and server faults only affect the call that
//! produced them.

pub mod client;
pub mod codec;
pub mod error;
pub mod transport;
pub mod value;

pub use client::RpcClient;
pub use error::{CodecError, RpcError, RpcFault, TransportError};
pub use transport::{ProtocolVersion, RpcTransport, TransportConfig, TransportState};
pub use value::Value;
