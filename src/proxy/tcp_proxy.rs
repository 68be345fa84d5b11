//! TCP splice implementation.
//!
//! Provides bidirectional data transfer between client and backend.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// Size of the per-direction copy buffer.
const BUFFER_SIZE: usize = 16 * 1024;

/// How a splice ended.
#[derive(Debug)]
pub enum SpliceEnd {
    /// The client closed its side cleanly.
    ClientClosed,
    /// The backend closed its side cleanly.
    BackendClosed,
    /// Reading from or writing to the client failed.
    ClientError(io::Error),
    /// Reading from or writing to the backend failed.
    BackendError(io::Error),
}

/// Result of a splice.
#[derive(Debug)]
pub struct SpliceResult {
    /// Bytes sent from client to backend.
    pub bytes_to_backend: u64,
    /// Bytes sent from backend to client.
    pub bytes_to_client: u64,
    /// Which side ended the session.
    pub end: SpliceEnd,
    /// The client sent bytes that the backend had not answered yet.
    pub reply_pending: bool,
}

impl SpliceResult {
    /// Whether the backend socket can go back to the pool.
    ///
    /// Requires a clean client close and a backend that spoke last (or a
    /// session where nothing was sent). A reply still on its way would
    /// otherwise reach whichever client gets the socket next.
    pub fn backend_reusable(&self) -> bool {
        matches!(self.end, SpliceEnd::ClientClosed) && !self.reply_pending
    }
}

/// Failure of one copy direction.
enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy bytes from `reader` to `writer` until EOF, counting as it goes.
///
/// After every write `pending` is set to `marks_pending`, so it ends up
/// describing whichever direction moved data last.
async fn copy_counted<R, W>(
    reader: &mut R,
    writer: &mut W,
    transferred: &mut u64,
    pending: &AtomicBool,
    marks_pending: bool,
) -> Result<(), CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(CopyError::Read)?;
        if n == 0 {
            writer.flush().await.map_err(CopyError::Write)?;
            return Ok(());
        }
        if marks_pending {
            // Set before the write so a reply can never be observed first
            pending.store(true, Ordering::Release);
        }
        writer.write_all(&buf[..n]).await.map_err(CopyError::Write)?;
        if !marks_pending {
            pending.store(false, Ordering::Release);
        }
        *transferred += n as u64;
    }
}

/// Splice two streams together.
///
/// Both directions are copied concurrently. The first direction to reach
/// EOF or an error ends the whole session: the other direction is
/// cancelled, so half-closed connections are not kept open. Neither stream
/// is closed here; the caller owns both and decides what to do with them.
#[instrument(skip_all)]
pub async fn splice<C, B>(client: &mut C, backend: &mut B) -> SpliceResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let mut bytes_to_backend = 0u64;
    let mut bytes_to_client = 0u64;
    let reply_pending = AtomicBool::new(false);

    let end = tokio::select! {
        result = copy_counted(&mut client_read, &mut backend_write, &mut bytes_to_backend, &reply_pending, true) => {
            match result {
                Ok(()) => SpliceEnd::ClientClosed,
                Err(CopyError::Read(e)) => SpliceEnd::ClientError(e),
                Err(CopyError::Write(e)) => SpliceEnd::BackendError(e),
            }
        }
        result = copy_counted(&mut backend_read, &mut client_write, &mut bytes_to_client, &reply_pending, false) => {
            match result {
                Ok(()) => SpliceEnd::BackendClosed,
                Err(CopyError::Read(e)) => SpliceEnd::BackendError(e),
                Err(CopyError::Write(e)) => SpliceEnd::ClientError(e),
            }
        }
    };

    let reply_pending = reply_pending.into_inner();

    debug!(
        bytes_to_backend = bytes_to_backend,
        bytes_to_client = bytes_to_client,
        end = ?end,
        reply_pending,
        "splice completed"
    );

    SpliceResult {
        bytes_to_backend,
        bytes_to_client,
        end,
        reply_pending,
    }
}
