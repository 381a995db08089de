//! Frame transport primitives shared by the executor client and its test doubles.
//!
//! This module exposes the foundational pieces the dispatch layer builds on:
//! * [`FrameSink`] – outbound half; writes one multipart message at a time.
//! * [`FrameSource`] – inbound half; yields frames tagged with a "more follows" marker.
//! * [`Transport`] – opens both halves against one executor endpoint.
//! * [`MemTransport`] / [`MemRouter`] – in-process backend with a router-style server end.
//! * [`TransportError`] – error surface; [`TransportError::Closed`] marks a clean shutdown.

mod error;
mod frame;
mod mem;
#[cfg(feature = "zmq")]
mod zmq_socket;

pub use error::{TransportError, TransportResult};
pub use frame::{read_multipart, Frame, FrameSink, FrameSource, Multipart, Transport};
pub use mem::{MemRouter, MemTransport, RoutedMessage};
#[cfg(feature = "zmq")]
pub use zmq_socket::ZmqTransport;
