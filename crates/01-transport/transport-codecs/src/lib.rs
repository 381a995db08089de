//! Wire schema and codecs for executor messages.
//!
//! This crate owns the rkyv-archived envelope and body types, the closed
//! [`Payload`] sum over every body, and the [`TypeRegistry`] that turns an
//! envelope's type name back into a decodable kind.

#![allow(missing_docs)]

mod codec;
mod error;
mod payload;
mod registry;
pub mod schema;

pub use codec::{decode_envelope, encode_envelope};
pub use error::{CodecError, CodecResult};
pub use payload::{Message, Payload, PayloadKind};
pub use registry::TypeRegistry;
pub use schema::*;
