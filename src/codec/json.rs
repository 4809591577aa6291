//! JSON codec: length-prefixed units, UTF-8 JSON values.
//!
//! Slower and larger than the default binary codec, but every frame is
//! readable in a packet capture, which earns it a place in the registry.

use super::{framed, ByteStream, CodecReader, CodecWriter, Encoding};

/// Marker type for the `"application/json"` codec.
pub struct JsonCodec;

impl JsonCodec {
    /// Registry constructor: install the codec over `stream`.
    pub fn new(stream: Box<dyn ByteStream>) -> (Box<dyn CodecReader>, Box<dyn CodecWriter>) {
        framed::pair(stream, Encoding::Json)
    }
}
