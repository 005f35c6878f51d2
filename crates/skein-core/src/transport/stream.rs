//! Byte-stream transport: varint length prefix followed by one encoded message.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::{Address, Connector, DecodeError, EncodeError, Encoding, Message, TransportError};

use super::{Transport, TransportBackend};

/// Maximum varint length in bytes.
const MAX_VARINT_LEN: usize = 10;

/// Maximum encoded message size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode a u64 value as a varint into a buffer.
/// Returns the number of bytes written.
fn encode_varint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf[i] = byte;
            return i + 1;
        } else {
            buf[i] = byte | 0x80;
            i += 1;
        }
    }
}

enum VarintResult {
    Value(u64),
    /// Stream ended before any varint byte: a graceful close.
    CleanEof,
    /// Stream ended in the middle of a varint.
    TruncatedVarint,
    /// More than [`MAX_VARINT_LEN`] bytes without termination.
    TooLong,
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<VarintResult, std::io::Error> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for bytes_read in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if bytes_read == 0 {
                    return Ok(VarintResult::CleanEof);
                } else {
                    return Ok(VarintResult::TruncatedVarint);
                }
            }
            Err(e) => return Err(e),
        }

        value |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(VarintResult::Value(value));
        }
        shift += 7;
    }

    Ok(VarintResult::TooLong)
}

#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("encoding", &self.inner.encoding)
            .finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
    encoding: Encoding,
}

impl StreamTransport {
    pub fn new<S>(stream: S, encoding: Encoding) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, encoding)
    }

    /// Create a transport from separate reader and writer halves.
    pub fn from_split<R, W>(reader: R, writer: W, encoding: Encoding) -> Self
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
                encoding,
            }),
        }
    }

    /// Two transports joined by an in-memory duplex pipe.
    pub fn pair(encoding: Encoding) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a, encoding), Self::new(b, encoding))
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl TransportBackend for StreamTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let body = self
            .inner
            .encoding
            .encode_message(&message)
            .map_err(TransportError::Encode)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Encode(EncodeError::FrameTooLarge {
                len: body.len(),
                max: MAX_FRAME_SIZE,
            }));
        }

        let mut varint_buf = [0u8; MAX_VARINT_LEN];
        let varint_len = encode_varint(body.len() as u64, &mut varint_buf);

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&varint_buf[..varint_len]).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let frame_len = match read_varint(&mut *reader).await? {
            VarintResult::Value(len) => len as usize,
            VarintResult::CleanEof => return Err(TransportError::Closed),
            VarintResult::TruncatedVarint => {
                return Err(TransportError::Decode(DecodeError::InvalidData(
                    "stream ended before varint length prefix terminated".to_string(),
                )));
            }
            VarintResult::TooLong => {
                return Err(TransportError::Decode(DecodeError::InvalidData(
                    "varint length prefix exceeded 10 bytes".to_string(),
                )));
            }
        };

        if frame_len > MAX_FRAME_SIZE {
            return Err(TransportError::Decode(DecodeError::FrameTooLarge {
                len: frame_len,
                max: MAX_FRAME_SIZE,
            }));
        }

        let mut body = vec![0u8; frame_len];
        reader.read_exact(&mut body).await?;
        self.inner
            .encoding
            .decode_message(&body)
            .map_err(TransportError::Decode)
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "stream transport shutdown failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

/// Connects over TCP and frames messages with the configured [`Encoding`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector {
    pub encoding: Encoding,
}

impl TcpConnector {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, address: &Address) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let host = address.host().to_string();
        let port = address.port();
        let encoding = self.encoding;
        async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;
            Ok(Transport::Stream(StreamTransport::new(stream, encoding)))
        }
        .boxed()
    }
}
