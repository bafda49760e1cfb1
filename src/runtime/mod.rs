//! Tokio driver for [`Controller`].
//!
//! The controller is moved into a single task. Callers talk to it through a
//! cloneable [`ControllerHandle`] and read results from an [`EventReceiver`].
//! The task sleeps until the controller's next deadline, so timeouts fire
//! without polling.
//!
//! # Example
//!
//! ```ignore
//! let controller = Controller::new(config, storage, radio)?;
//! let (handle, mut events, task) = zwave_controller::runtime::spawn(controller);
//!
//! let token = handle.submit(TxRequest::new(vec![0x25, 0x01, 0xff], NodeId(5)).secure()).await??;
//! // radio driver reports back
//! handle.transmission_result(true, 0).await?;
//!
//! while let Some(event) = events.recv().await {
//!     // ...
//! }
//! ```

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::controller::{Controller, ControllerEvent, TxRequest};
use crate::core::{
    ControllerError, ControllerStorage, NodeId, RadioLink, RxOptions, SecurityError, SessionToken,
    TxError,
};
use crate::security::InclusionState;
use crate::transport::TxState;

/// Commands buffered before callers wait.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Snapshot of the controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Scheduler state.
    pub tx_state: TxState,
    /// Inclusion progress.
    pub inclusion: InclusionState,
    /// Entries waiting in the queue.
    pub queued: usize,
    /// A flushed frame is still held by the radio.
    pub flush_ongoing: bool,
}

enum Command {
    Submit {
        request: TxRequest,
        reply: oneshot::Sender<Result<SessionToken, TxError>>,
    },
    Abort,
    Cancel {
        token: SessionToken,
        reply: oneshot::Sender<bool>,
    },
    Flush,
    ExpectFrames(u8),
    StartInclusion {
        node: NodeId,
        reply: oneshot::Sender<Result<(), SecurityError>>,
    },
    AbortInclusion,
    FrameReceived {
        raw: Vec<u8>,
        source: NodeId,
        rx: RxOptions,
    },
    TransmissionResult {
        success: bool,
        retry_count: u8,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    LogState,
    Shutdown,
}

/// Handle to a running controller task.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Queue a request. The inner result is the synchronous enqueue outcome.
    pub async fn submit(&self, request: TxRequest) -> Result<Result<SessionToken, TxError>, ControllerError> {
        self.call(|reply| Command::Submit { request, reply }).await
    }

    /// Abort the frame in flight.
    pub async fn abort_transmission(&self) -> Result<(), ControllerError> {
        self.send(Command::Abort).await
    }

    /// Abort or remove one frame.
    pub async fn cancel(&self, token: SessionToken) -> Result<bool, ControllerError> {
        self.call(|reply| Command::Cancel { token, reply }).await
    }

    /// Abort the frame in flight and cancel everything pending.
    pub async fn flush_queue(&self) -> Result<(), ControllerError> {
        self.send(Command::Flush).await
    }

    /// Announce `count` more frames from the last destination.
    pub async fn set_expected_additional_frames(&self, count: u8) -> Result<(), ControllerError> {
        self.send(Command::ExpectFrames(count)).await
    }

    /// Begin S0 inclusion of `node`.
    pub async fn start_s0_inclusion(&self, node: NodeId) -> Result<(), ControllerError> {
        let result = self.call(|reply| Command::StartInclusion { node, reply }).await?;
        result.map_err(ControllerError::from)
    }

    /// Abort the running S0 inclusion.
    pub async fn abort_s0_inclusion(&self) -> Result<(), ControllerError> {
        self.send(Command::AbortInclusion).await
    }

    /// Feed an inbound frame from the radio.
    pub async fn frame_received(&self, raw: Vec<u8>, source: NodeId, rx: RxOptions) -> Result<(), ControllerError> {
        self.send(Command::FrameReceived { raw, source, rx }).await
    }

    /// Feed the link-layer result of the frame in flight.
    pub async fn transmission_result(&self, success: bool, retry_count: u8) -> Result<(), ControllerError> {
        self.send(Command::TransmissionResult { success, retry_count }).await
    }

    /// Current state.
    pub async fn status(&self) -> Result<ControllerStatus, ControllerError> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Log scheduler and inclusion state.
    pub async fn log_state(&self) -> Result<(), ControllerError> {
        self.send(Command::LogState).await
    }

    /// Stop the task. Pending work is dropped.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), ControllerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ControllerError::ChannelClosed)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| ControllerError::ChannelClosed)
    }
}

/// Results from a running controller task.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl EventReceiver {
    /// Next event. `None` once the task stopped.
    pub async fn recv(&mut self) -> Option<ControllerEvent> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ControllerEvent> {
        self.rx.try_recv().ok()
    }
}

/// Move `controller` into a new task.
pub fn spawn<S, R>(controller: Controller<S, R>) -> (ControllerHandle, EventReceiver, JoinHandle<()>)
where
    S: ControllerStorage + 'static,
    R: RadioLink + Send + 'static,
{
    let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(controller, commands, events_tx));
    (ControllerHandle { tx }, EventReceiver { rx: events_rx }, task)
}

/// Current time on the tokio clock, so paused test time drives timeouts.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn run<S, R>(
    mut controller: Controller<S, R>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ControllerEvent>,
) where
    S: ControllerStorage,
    R: RadioLink,
{
    debug!(node = %controller.node_id(), "controller task started");

    loop {
        let deadline = controller.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(command) => handle(&mut controller, command),
            },
            _ = sleep_until(deadline) => {
                trace!("deadline reached");
                controller.on_timeout(now());
            }
        }

        while let Some(event) = controller.poll_event() {
            if events.send(event).is_err() {
                trace!("event receiver dropped");
            }
        }
    }

    debug!("controller task stopped");
}

fn handle<S, R>(controller: &mut Controller<S, R>, command: Command)
where
    S: ControllerStorage,
    R: RadioLink,
{
    let now = now();
    match command {
        Command::Submit { request, reply } => {
            let _ = reply.send(controller.submit(request, now));
        }
        Command::Abort => controller.abort_transmission(now),
        Command::Cancel { token, reply } => {
            let _ = reply.send(controller.cancel(token, now));
        }
        Command::Flush => controller.flush_queue(now),
        Command::ExpectFrames(count) => controller.set_expected_additional_frames(count, now),
        Command::StartInclusion { node, reply } => {
            let _ = reply.send(controller.start_s0_inclusion(node, now));
        }
        Command::AbortInclusion => controller.abort_s0_inclusion(now),
        Command::FrameReceived { raw, source, rx } => controller.on_frame_received(&raw, source, rx, now),
        Command::TransmissionResult { success, retry_count } => {
            controller.on_transmission_result(success, retry_count, now)
        }
        Command::Status { reply } => {
            let _ = reply.send(ControllerStatus {
                tx_state: controller.state(),
                inclusion: controller.inclusion_state(),
                queued: controller.tx().queue().len(),
                flush_ongoing: controller.is_queue_flush_ongoing(),
            });
        }
        Command::LogState => controller.log_state(),
        Command::Shutdown => {}
    }
}
