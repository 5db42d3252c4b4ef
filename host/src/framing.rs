//! Native messaging framing: a 32-bit little-endian length prefix followed
//! by a JSON document.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; anything larger is a protocol error.
const MAX_FRAME: u32 = 32 * 1024 * 1024;

/// Read one frame. `None` on clean EOF before a length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_survive_the_wire() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, br#"{"type":"GET_SETTINGS"}"#)
            .await
            .unwrap();
        write_frame(&mut client, b"second").await.unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(first, br#"{"type":"GET_SETTINGS"}"#);
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(second, b"second");
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }
}
