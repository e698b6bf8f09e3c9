/// Relay queue between peer connections and the backend
///
/// Wire handlers push decoded frames into a bounded queue without ever
/// blocking on a slow consumer; the backend drains it at its own pace.

use crate::record::NodeId;
use onionp2p_common::protocol::MAX_FRAME_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

/// A message received from a peer, waiting to be relayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub peer: NodeId,
    pub code: u64,
    pub payload: Vec<u8>,
}

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay queue full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("Relay queue closed")]
    Closed,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame too small: {size} bytes (min {min})")]
    FrameTooSmall { size: usize, min: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Producer side of the relay queue
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayMessage>,
    capacity: usize,
}

/// Consumer side of the relay queue
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayMessage>,
}

/// Create a queue holding at most `capacity` messages
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn relay_queue(capacity: usize) -> (RelayHandle, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelayHandle { tx, capacity }, RelayReceiver { rx })
}

impl RelayHandle {
    /// Enqueue without waiting
    pub fn try_enqueue(&self, message: RelayMessage) -> Result<(), RelayError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => RelayError::Closed,
        })
    }

    /// Enqueue, waiting for room if the queue is full
    pub async fn enqueue(&self, message: RelayMessage) -> Result<(), RelayError> {
        self.tx.send(message).await.map_err(|_| RelayError::Closed)
    }

    /// Messages currently queued
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RelayReceiver {
    /// Next message, or `None` once every handle is dropped and the queue is empty
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RelayMessage> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new messages; queued ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Length of the message code that opens every frame body
const CODE_LEN: usize = 8;

/// Write one frame: `u32` LE length, `u64` LE code, payload
pub async fn write_frame<W>(writer: &mut W, code: u64, payload: &[u8]) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let size = CODE_LEN + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(size as u32).to_le_bytes()).await?;
    writer.write_all(&code.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(u64, Vec<u8>)>, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("Stream closed");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_le_bytes(len_buf) as usize;
    if size < CODE_LEN {
        return Err(RelayError::FrameTooSmall {
            size,
            min: CODE_LEN,
        });
    }
    if size > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut code_buf = [0u8; 8];
    reader.read_exact(&mut code_buf).await?;
    let mut payload = vec![0u8; size - CODE_LEN];
    reader.read_exact(&mut payload).await?;

    Ok(Some((u64::from_le_bytes(code_buf), payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(code: u64) -> RelayMessage {
        RelayMessage {
            peer: NodeId::from_bytes([1u8; 32]),
            code,
            payload: vec![code as u8],
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (handle, mut receiver) = relay_queue(4);
        handle.try_enqueue(message(1)).unwrap();
        handle.enqueue(message(2)).await.unwrap();
        assert_eq!(handle.len(), 2);

        assert_eq!(receiver.recv().await.unwrap().code, 1);
        assert_eq!(receiver.recv().await.unwrap().code, 2);
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast() {
        let (handle, _receiver) = relay_queue(2);
        handle.try_enqueue(message(1)).unwrap();
        handle.try_enqueue(message(2)).unwrap();

        let err = handle.try_enqueue(message(3)).unwrap_err();
        assert!(matches!(err, RelayError::QueueFull { capacity: 2 }));
        assert_eq!(handle.capacity(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (handle, receiver) = relay_queue(2);
        drop(receiver);

        assert!(handle.is_closed());
        assert!(matches!(handle.try_enqueue(message(1)), Err(RelayError::Closed)));
        assert!(matches!(handle.enqueue(message(1)).await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn test_receiver_ends_when_handles_dropped() {
        let (handle, mut receiver) = relay_queue(2);
        let clone = handle.clone();
        clone.try_enqueue(message(9)).unwrap();
        drop(handle);
        drop(clone);

        assert_eq!(receiver.recv().await.unwrap().code, 9);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_over_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, 0x10, b"hello").await.unwrap();
        write_frame(&mut a, 0x11, b"").await.unwrap();
        drop(a);

        assert_eq!(
            read_frame(&mut b).await.unwrap(),
            Some((0x10, b"hello".to_vec()))
        );
        assert_eq!(read_frame(&mut b).await.unwrap(), Some((0x11, Vec::new())));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(u32::MAX).to_le_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut b).await,
            Err(RelayError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_length_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_le_bytes()).await.unwrap();
        a.write_all(&[0u8; 3]).await.unwrap();

        assert!(matches!(
            read_frame(&mut b).await,
            Err(RelayError::FrameTooSmall { size: 3, min: 8 })
        ));
    }
}
