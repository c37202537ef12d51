//! Formato de archivo de frames.
//!
//! Una secuencia de registros `u16` little-endian con la longitud seguida
//! de ese número de bytes de un frame opus, hasta el final del archivo.

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tamaño máximo representable por el prefijo de longitud
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Lee frames secuencialmente.
pub struct FrameReader<R> {
    inner: R,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames_read: 0,
        }
    }

    /// Siguiente frame, o `None` al final del archivo.
    ///
    /// Un registro truncado al final también se trata como fin de archivo;
    /// ver [`FrameReader::next_frame_strict`] para detectarlo.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.read_record().await? {
            Record::Frame(frame) => Ok(Some(frame)),
            Record::End | Record::Truncated => Ok(None),
        }
    }

    /// Como [`FrameReader::next_frame`] pero un registro truncado es error.
    pub async fn next_frame_strict(&mut self) -> Result<Option<Bytes>> {
        match self.read_record().await? {
            Record::Frame(frame) => Ok(Some(frame)),
            Record::End => Ok(None),
            Record::Truncated => anyhow::bail!(
                "registro truncado después de {} frames",
                self.frames_read
            ),
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    async fn read_record(&mut self) -> Result<Record> {
        let mut header = [0u8; 2];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                return Ok(if filled == 0 {
                    Record::End
                } else {
                    Record::Truncated
                });
            }
            filled += n;
        }

        let len = u16::from_le_bytes(header) as usize;
        let mut frame = BytesMut::zeroed(len);
        match self.inner.read_exact(&mut frame).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Record::Truncated),
            Err(e) => return Err(e.into()),
        }

        self.frames_read += 1;
        Ok(Record::Frame(frame.freeze()))
    }
}

enum Record {
    Frame(Bytes),
    End,
    Truncated,
}

/// Escribe frames con su prefijo de longitud.
pub struct FrameWriter<W> {
    inner: W,
    frames_written: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            frames_written: 0,
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_FRAME_LEN {
            anyhow::bail!(
                "frame de {} bytes excede el máximo de {}",
                frame.len(),
                MAX_FRAME_LEN
            );
        }

        self.inner.write_all(&(frame.len() as u16).to_le_bytes()).await?;
        self.inner.write_all(frame).await?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Vacía el buffer y devuelve el writer interno.
    pub async fn finish(mut self) -> Result<W> {
        self.inner.flush().await?;
        Ok(self.inner)
    }
}
