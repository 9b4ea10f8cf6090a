//! Payload encodings carried inside a frame.
//!
//! The provisioning protocol carries a JSON object, the discovery protocol a
//! MessagePack map. Both sit behind [`PayloadCodec`] so the code that reads
//! and writes frames does not care which one is in use.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{CodecError, FrameError};
use crate::framing::{write_frame, FrameReader};

/// A payload encoding.
pub trait PayloadCodec {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON object payloads (provisioning protocol).
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack map payloads (discovery protocol).
///
/// Structs are written with field names so they land on the wire as maps,
/// not positional arrays.
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Errors from [`send_message`] and [`recv_message`].
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Encodes `value` with `C` and writes it as one frame.
pub async fn send_message<C, W, T>(writer: &mut W, command: u32, value: &T) -> Result<(), MessageError>
where
    C: PayloadCodec,
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let payload = C::encode(value)?;
    write_frame(writer, command, &payload).await?;
    Ok(())
}

/// Reads one frame and decodes its payload with `C`.
///
/// Returns `Ok(None)` on a clean close between frames.
pub async fn recv_message<C, R, T>(reader: &mut FrameReader<R>) -> Result<Option<(u32, T)>, MessageError>
where
    C: PayloadCodec,
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match reader.read_frame().await? {
        Some((command, payload)) => Ok(Some((command, C::decode(payload)?))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        command: i32,
    }

    #[test]
    fn msgpack_writes_a_map() {
        let bytes = MsgPackCodec::encode(&Probe { command: 20 }).unwrap();
        // fixmap(1), fixstr(7) "command", positive fixint 20
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0xa7);
        assert_eq!(&bytes[2..9], b"command");
        assert_eq!(bytes[9], 20);
    }

    #[test]
    fn json_rejects_garbage() {
        assert!(matches!(
            JsonCodec::decode::<Probe>(b"{not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[tokio::test]
    async fn message_roundtrip_over_frames() {
        let mut wire = Vec::new();
        send_message::<MsgPackCodec, _, _>(&mut wire, 0x14, &Probe { command: 20 })
            .await
            .unwrap();
        send_message::<JsonCodec, _, _>(&mut wire, 0x11, &Probe { command: 17 })
            .await
            .unwrap();

        let mut reader = FrameReader::new(&wire[..], 1024);
        let first = recv_message::<MsgPackCodec, _, Probe>(&mut reader)
            .await
            .unwrap();
        assert_eq!(first, Some((0x14, Probe { command: 20 })));

        let second = recv_message::<JsonCodec, _, Probe>(&mut reader)
            .await
            .unwrap();
        assert_eq!(second, Some((0x11, Probe { command: 17 })));

        let end = recv_message::<JsonCodec, _, Probe>(&mut reader)
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
