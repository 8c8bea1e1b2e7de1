// src/process/ipc.rs

//! Shutdown-request channel between the supervisor and an app process.
//!
//! The protocol has a single message, written as one line on the child's
//! stdin:
//!
//! ```text
//! shutdown 1b4e28ba-2fa1-11d2-883f-0016d3cca427
//! ```
//!
//! There is no reply message. The acknowledgement is the process exiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ChannelError;
use crate::process::BoxFuture;

/// Value apps can check (in `ROLLD_SHUTDOWN_PROTOCOL`) to know they will be
/// asked to stop over stdin.
pub const SHUTDOWN_PROTOCOL: &str = "stdin-v1";

const SHUTDOWN_VERB: &str = "shutdown";

/// One close attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    pub request_id: Uuid,
    /// When the supervisor stops waiting and kills the process.
    pub deadline: Instant,
}

impl ShutdownRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn to_wire(&self) -> String {
        format!("{SHUTDOWN_VERB} {}\n", self.request_id)
    }

    /// Parse one wire line, returning the request id.
    pub fn parse_wire(line: &str) -> Option<Uuid> {
        let mut parts = line.split_whitespace();
        if parts.next()? != SHUTDOWN_VERB {
            return None;
        }
        let id = Uuid::parse_str(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(id)
    }
}

/// Duplex channel used for the shutdown handshake.
pub trait IpcChannel: Send + Sync + fmt::Debug {
    /// Deliver a shutdown request. Fails if the peer is unreachable.
    fn send<'a>(&'a self, request: &'a ShutdownRequest) -> BoxFuture<'a, Result<(), ChannelError>>;

    /// Release the channel. Always safe to call, any number of times.
    fn disconnect(&self) -> BoxFuture<'_, ()>;
}

/// Slot holding a child's stdin, shared by the process handle (which fills it
/// on spawn and empties it on exit) and the [`PipeChannel`].
pub type StdinSlot = Arc<Mutex<Option<ChildStdin>>>;

/// [`IpcChannel`] over the child's stdin pipe.
#[derive(Clone)]
pub struct PipeChannel {
    slot: StdinSlot,
}

impl fmt::Debug for PipeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeChannel").finish_non_exhaustive()
    }
}

impl PipeChannel {
    pub fn new(slot: StdinSlot) -> Self {
        Self { slot }
    }

    async fn write_request(&self, request: &ShutdownRequest) -> Result<(), ChannelError> {
        let mut slot = self.slot.lock().await;
        let stdin = slot.as_mut().ok_or(ChannelError::Disconnected)?;

        let line = request.to_wire();
        let result = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            // A broken pipe means the peer is gone; stop pretending otherwise.
            slot.take();
            return Err(ChannelError::Io(e));
        }

        debug!(request_id = %request.request_id, "shutdown request written to stdin");
        Ok(())
    }
}

impl IpcChannel for PipeChannel {
    fn send<'a>(&'a self, request: &'a ShutdownRequest) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(self.write_request(request))
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // Dropping stdin closes the pipe; the child sees EOF.
            self.slot.lock().await.take();
        })
    }
}
