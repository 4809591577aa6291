//! Length-prefixed unit transport shared by the shipped codecs.
//!
//! The shipped codecs differ only in their value [`Encoding`]; the framing
//! is the same for both. `pair` splits the stream once and hands back the
//! boxed read and write halves.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

use super::{ByteStream, CodecReader, CodecWriter, Encoding};
use crate::error::{Result, RpcError};
use crate::protocol::{put_unit, read_unit, Header};

pub(super) fn pair(
    stream: Box<dyn ByteStream>,
    encoding: Encoding,
) -> (Box<dyn CodecReader>, Box<dyn CodecWriter>) {
    let (reader, writer) = tokio::io::split(stream);
    (
        Box::new(FramedReader {
            inner: reader,
            encoding,
        }),
        Box::new(FramedWriter {
            inner: writer,
            encoding,
            closed: false,
        }),
    )
}

struct FramedReader {
    inner: ReadHalf<Box<dyn ByteStream>>,
    encoding: Encoding,
}

#[async_trait]
impl CodecReader for FramedReader {
    async fn read_header(&mut self) -> Result<Header> {
        let unit = read_unit(&mut self.inner).await?;
        self.encoding.decode(&unit)
    }

    async fn read_body(&mut self) -> Result<Bytes> {
        Ok(Bytes::from(read_unit(&mut self.inner).await?))
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }
}

struct FramedWriter {
    inner: WriteHalf<Box<dyn ByteStream>>,
    encoding: Encoding,
    /// Set on any mid-frame failure; all later writes are refused.
    closed: bool,
}

#[async_trait]
impl CodecWriter for FramedWriter {
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(RpcError::CodecClosed);
        }
        let header_unit = match self.encoding.encode(header) {
            Ok(unit) => unit,
            Err(e) => {
                self.closed = true;
                let _ = self.inner.shutdown().await;
                return Err(e);
            }
        };

        // Header and body land on the wire as one buffered write, so the
        // peer observes the frame as a unit.
        let mut frame = Vec::with_capacity(8 + header_unit.len() + body.len());
        put_unit(&mut frame, &header_unit);
        put_unit(&mut frame, body);

        if let Err(e) = self.inner.write_all(&frame).await {
            self.closed = true;
            return Err(e.into());
        }
        if let Err(e) = self.inner.flush().await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duplex_pair(
        encoding: Encoding,
    ) -> (
        (Box<dyn CodecReader>, Box<dyn CodecWriter>),
        (Box<dyn CodecReader>, Box<dyn CodecWriter>),
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (pair(Box::new(a), encoding), pair(Box::new(b), encoding))
    }

    #[tokio::test]
    async fn test_frame_roundtrip_msgpack() {
        let ((mut reader, _w), (_r, mut writer)) = duplex_pair(Encoding::MsgPack);

        let header = Header::request("Foo.Sum", 3);
        let body = Encoding::MsgPack.encode(&"payload").unwrap();
        writer.write(&header, &body).await.unwrap();

        let decoded = reader.read_header().await.unwrap();
        assert_eq!(decoded, header);
        let body_bytes = reader.read_body().await.unwrap();
        let value: String = Encoding::MsgPack.decode(&body_bytes).unwrap();
        assert_eq!(value, "payload");
    }

    #[tokio::test]
    async fn test_frame_roundtrip_json() {
        let ((mut reader, _w), (_r, mut writer)) = duplex_pair(Encoding::Json);

        let mut header = Header::request("Foo.Sum", 9);
        header.error = "boom".to_string();
        writer.write(&header, b"null").await.unwrap();

        let decoded = reader.read_header().await.unwrap();
        assert_eq!(decoded.error, "boom");
        assert_eq!(decoded.seq, 9);
        reader.read_body().await.unwrap();
    }

    #[tokio::test]
    async fn test_consecutive_frames_stay_delimited() {
        let ((mut reader, _w), (_r, mut writer)) = duplex_pair(Encoding::MsgPack);

        for seq in 1..=3u64 {
            let body = Encoding::MsgPack.encode(&seq).unwrap();
            writer.write(&Header::request("Foo.Echo", seq), &body).await.unwrap();
        }
        for seq in 1..=3u64 {
            let header = reader.read_header().await.unwrap();
            assert_eq!(header.seq, seq);
            let value: u64 = Encoding::MsgPack.decode(&reader.read_body().await.unwrap()).unwrap();
            assert_eq!(value, seq);
        }
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let ((_r, _w), (_r2, mut writer)) = duplex_pair(Encoding::MsgPack);
        writer.close().await.unwrap();
        let err = writer.write(&Header::request("Foo.Sum", 1), b"").await.unwrap_err();
        assert!(matches!(err, RpcError::CodecClosed));
    }

    #[tokio::test]
    async fn test_reader_reports_eof_when_peer_drops() {
        let ((mut reader, _w), peer) = duplex_pair(Encoding::MsgPack);
        drop(peer);
        let err = reader.read_header().await.unwrap_err();
        match err {
            RpcError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected I/O error, got {other}"),
        }
    }
}
