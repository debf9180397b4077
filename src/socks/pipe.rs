//! Bidirectional relay between the client and the destination
//!
//! A [`Pipe`] owns both streams and runs one copy loop per direction. When a
//! direction reaches EOF it shuts down the opposite write side and the other
//! direction keeps relaying until its own EOF. It is cancelled only once it
//! has moved no bytes for `half_close_timeout`. An I/O error in either
//! direction cancels the other at once. Both streams are dropped, and so
//! closed, on every exit path.
//!
//! [`PipeInitializer`]s run before the relay starts and may replace either
//! stream with a wrapper, e.g. for auditing or traffic shaping.

use super::consts::DEFAULT_BUFFER_SIZE;
use std::fmt::{self, Debug};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default idle time allowed to the remaining direction after a half-close
pub const DEFAULT_HALF_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A byte stream the pipe can relay
pub trait PipeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PipeStream for T {}

/// Boxed stream held by a [`Pipe`]
pub type BoxedStream = Box<dyn PipeStream>;

/// Relay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// Source (client) to destination
    Upstream,
    /// Destination to source (client)
    Downstream,
}

impl fmt::Display for PipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeDirection::Upstream => write!(f, "upstream"),
            PipeDirection::Downstream => write!(f, "downstream"),
        }
    }
}

/// Why a pipe stopped
#[derive(Debug)]
pub enum PipeCloseCause {
    /// Both directions ended without an I/O error
    PeerClosed,
    /// The remaining direction went idle for the drain window after a half-close
    DrainTimeout {
        /// Direction that was cancelled
        direction: PipeDirection,
    },
    /// First I/O error seen on either direction
    Error {
        /// Direction that failed
        direction: PipeDirection,
        /// The error
        error: io::Error,
    },
}

impl PipeCloseCause {
    /// Whether the pipe stopped because of an error
    pub fn is_error(&self) -> bool {
        matches!(self, PipeCloseCause::Error { .. })
    }
}

impl fmt::Display for PipeCloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeCloseCause::PeerClosed => write!(f, "peer closed"),
            PipeCloseCause::DrainTimeout { direction } => {
                write!(f, "{} idle after half-close", direction)
            }
            PipeCloseCause::Error { direction, error } => write!(f, "{} error: {}", direction, error),
        }
    }
}

/// Live counters of a pipe, shared with instrumentation
#[derive(Debug, Default)]
pub struct PipeStats {
    running: AtomicBool,
    upstream_bytes: AtomicU64,
    downstream_bytes: AtomicU64,
}

impl PipeStats {
    /// Whether the relay is currently moving bytes
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Bytes copied from source to destination so far
    pub fn upstream_bytes(&self) -> u64 {
        self.upstream_bytes.load(Ordering::Relaxed)
    }

    /// Bytes copied from destination to source so far
    pub fn downstream_bytes(&self) -> u64 {
        self.downstream_bytes.load(Ordering::Relaxed)
    }

    fn counter(&self, direction: PipeDirection) -> &AtomicU64 {
        match direction {
            PipeDirection::Upstream => &self.upstream_bytes,
            PipeDirection::Downstream => &self.downstream_bytes,
        }
    }
}

/// Result of a finished pipe
#[derive(Debug)]
pub struct PipeSummary {
    /// Bytes copied from source to destination
    pub upstream_bytes: u64,
    /// Bytes copied from destination to source
    pub downstream_bytes: u64,
    /// Termination cause
    pub cause: PipeCloseCause,
}

/// Hook run on every pipe before it starts
pub trait PipeInitializer: Send + Sync + Debug {
    /// Return the pipe to run, usually `pipe` with wrapped streams
    fn initialize(&self, pipe: Pipe) -> Pipe;
}

/// Relay between a source (client) and a destination stream
pub struct Pipe {
    source: BoxedStream,
    destination: BoxedStream,
    buffer_size: usize,
    half_close_timeout: Duration,
    stats: Arc<PipeStats>,
}

impl Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("buffer_size", &self.buffer_size)
            .field("half_close_timeout", &self.half_close_timeout)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Pipe {
    /// Create a pipe with default buffer size and half-close timeout
    pub fn new<S, D>(source: S, destination: D) -> Self
    where
        S: PipeStream + 'static,
        D: PipeStream + 'static,
    {
        Pipe {
            source: Box::new(source),
            destination: Box::new(destination),
            buffer_size: DEFAULT_BUFFER_SIZE,
            half_close_timeout: DEFAULT_HALF_CLOSE_TIMEOUT,
            stats: Arc::new(PipeStats::default()),
        }
    }

    /// Set the per-direction buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set how long the remaining direction may stay idle after a half-close
    pub fn with_half_close_timeout(mut self, timeout: Duration) -> Self {
        self.half_close_timeout = timeout;
        self
    }

    /// Per-direction buffer size
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Idle drain window after a half-close
    pub fn half_close_timeout(&self) -> Duration {
        self.half_close_timeout
    }

    /// Shared live counters
    pub fn stats(&self) -> Arc<PipeStats> {
        self.stats.clone()
    }

    /// Replace the source stream with `wrap(source)`
    pub fn wrap_source<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(BoxedStream) -> BoxedStream,
    {
        self.source = wrap(self.source);
        self
    }

    /// Replace the destination stream with `wrap(destination)`
    pub fn wrap_destination<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(BoxedStream) -> BoxedStream,
    {
        self.destination = wrap(self.destination);
        self
    }

    /// Relay until both directions have finished
    pub async fn run(self) -> PipeSummary {
        let Pipe {
            source,
            destination,
            buffer_size,
            half_close_timeout,
            stats,
        } = self;

        stats.running.store(true, Ordering::Relaxed);

        let (mut source_read, mut source_write) = tokio::io::split(source);
        let (mut dest_read, mut dest_write) = tokio::io::split(destination);

        let cause = {
            let upstream = copy_direction(
                &mut source_read,
                &mut dest_write,
                buffer_size,
                stats.counter(PipeDirection::Upstream),
            );
            let downstream = copy_direction(
                &mut dest_read,
                &mut source_write,
                buffer_size,
                stats.counter(PipeDirection::Downstream),
            );
            tokio::pin!(upstream);
            tokio::pin!(downstream);

            let (first, direction) = tokio::select! {
                result = &mut upstream => (result, PipeDirection::Upstream),
                result = &mut downstream => (result, PipeDirection::Downstream),
            };
            let (mut remaining, other) = match direction {
                PipeDirection::Upstream => (downstream, PipeDirection::Downstream),
                PipeDirection::Downstream => (upstream, PipeDirection::Upstream),
            };

            match first {
                Err(error) => {
                    debug!(%direction, "Relay error, cancelling {}: {}", other, error);
                    PipeCloseCause::Error { direction, error }
                }
                Ok(()) => {
                    let progress = stats.counter(other);
                    let mut seen = progress.load(Ordering::Relaxed);
                    loop {
                        tokio::select! {
                            result = &mut remaining => break match result {
                                Ok(()) => PipeCloseCause::PeerClosed,
                                Err(error) => PipeCloseCause::Error {
                                    direction: other,
                                    error,
                                },
                            },
                            _ = tokio::time::sleep(half_close_timeout) => {
                                let now = progress.load(Ordering::Relaxed);
                                if now == seen {
                                    debug!(%other, "Half-close drain idle, cancelling");
                                    break PipeCloseCause::DrainTimeout { direction: other };
                                }
                                seen = now;
                            }
                        }
                    }
                }
            }
        };

        stats.running.store(false, Ordering::Relaxed);

        PipeSummary {
            upstream_bytes: stats.upstream_bytes(),
            downstream_bytes: stats.downstream_bytes(),
            cause,
        }
    }
}

/// Copy `reader` into `writer` until EOF, then shut `writer` down
async fn copy_direction<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    counter: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    // The peer may already be gone
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown after EOF failed: {}", e);
    }
    Ok(())
}
