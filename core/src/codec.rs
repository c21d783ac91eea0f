use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::Error;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

/// Encode a wire message. `None` means the frame could not be serialized;
/// callers treat that as a dropped frame, never a fatal error.
pub fn encode<M>(msg: &M) -> Option<Vec<u8>>
where
    M: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    rkyv::to_bytes::<Error>(msg).ok().map(|bytes| bytes.into_vec())
}

/// Decode and validate a wire message. Malformed frames decode to `None`
/// and are ignored by every consumer.
pub fn decode<M>(bytes: &[u8]) -> Option<M>
where
    M: Archive,
    M::Archived:
        for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<M, HighDeserializer<Error>>,
{
    rkyv::from_bytes::<M, Error>(bytes).ok()
}
