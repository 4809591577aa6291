//! Default binary codec: length-prefixed units, MessagePack values.
//!
//! Uses `rmp_serde::to_vec_named` so structs travel as maps with field
//! names, which keeps the encoding self-describing: the decoder needs no
//! schema agreed out of band.

use super::{framed, ByteStream, CodecReader, CodecWriter, Encoding};

/// Marker type for the `"application/msgpack"` codec.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Registry constructor: install the codec over `stream`.
    pub fn new(stream: Box<dyn ByteStream>) -> (Box<dyn CodecReader>, Box<dyn CodecWriter>) {
        framed::pair(stream, Encoding::MsgPack)
    }
}
