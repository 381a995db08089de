use rkyv::{
    api::high::{to_bytes, HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize, Serialize,
};

use crate::schema::{Envelope, SCHEMA_VERSION_V1};
use crate::{CodecError, CodecResult};

pub(crate) fn serialize<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Archive,
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    to_bytes::<Error>(value)
        .map(|aligned| aligned.into_vec())
        .map_err(|err| CodecError::Serialize(err.to_string()))
}

pub(crate) fn deserialize<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, Error>>
        + Deserialize<T, HighDeserializer<Error>>,
{
    // Frames arrive in plain byte buffers; archived roots need alignment.
    let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, Error>(&aligned).map_err(|err| CodecError::Validate(err.to_string()))
}

pub fn encode_envelope(envelope: &Envelope) -> CodecResult<Vec<u8>> {
    serialize(envelope)
}

/// Decodes an envelope frame and checks its schema version.
pub fn decode_envelope(bytes: &[u8]) -> CodecResult<Envelope> {
    let envelope: Envelope = deserialize(bytes)?;
    if envelope.ver != SCHEMA_VERSION_V1 {
        return Err(CodecError::Version {
            found: envelope.ver,
            expected: SCHEMA_VERSION_V1,
        });
    }
    Ok(envelope)
}
