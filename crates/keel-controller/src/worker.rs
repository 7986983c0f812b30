//! Event handler loop
//!
//! TigerStyle: One thread, one FIFO queue, one optional deadline.

use crate::attempt::AttemptId;
use crate::channel::ControllerRegistrationResponse;
use crate::error::ChannelResult;
use crate::state::{RegistrationState, RegistrationStats};
use keel_core::io::TimeProvider;
use keel_metadata::{ControllerId, LoaderManifest, MetadataDelta, MetadataImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

/// Tasks processed by the event handler, in arrival order
pub(crate) enum Command {
    /// A new image was published
    MetadataUpdate {
        delta: MetadataDelta,
        image: Arc<MetadataImage>,
        manifest: LoaderManifest,
    },
    /// A dispatched request completed
    Completion {
        attempt_id: AttemptId,
        result: ChannelResult<ControllerRegistrationResponse>,
    },
    /// Read the state from outside the worker
    Inspect {
        reply_tx: oneshot::Sender<RegistrationStats>,
    },
    /// Stop after everything queued before this command
    Shutdown,
}

pub(crate) struct Worker {
    controller_id: ControllerId,
    state: Box<RegistrationState>,
    commands: mpsc::UnboundedReceiver<Command>,
    time: Arc<dyn TimeProvider>,
    closing: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(
        controller_id: ControllerId,
        state: Box<RegistrationState>,
        commands: mpsc::UnboundedReceiver<Command>,
        time: Arc<dyn TimeProvider>,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller_id,
            state,
            commands,
            time,
            closing,
        }
    }

    #[instrument(skip(self), fields(controller_id = %self.controller_id))]
    pub(crate) async fn run(mut self) {
        info!("Registration event handler starting");

        // First task after start: register if the pre-start images require it
        self.state.maybe_send();

        loop {
            let deadline_ms = self.state.retry_deadline_ms();
            let time = self.time.clone();

            tokio::select! {
                biased;

                _ = time.sleep_until_ms(deadline_ms.unwrap_or(0)), if deadline_ms.is_some() => {
                    if self.closing.load(Ordering::SeqCst) {
                        debug!("Dropping registration retry: manager closing");
                        self.state.cancel_retry();
                    } else {
                        self.state.on_retry_timer();
                    }
                }

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
            }
        }

        self.state.release_channel();
        info!("Registration event handler stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::MetadataUpdate {
                delta,
                image,
                manifest,
            } => self.state.on_metadata_update(&delta, &image, &manifest),
            Command::Completion { attempt_id, result } => {
                self.state.on_response(attempt_id, result)
            }
            Command::Inspect { reply_tx } => {
                // Requester may have given up waiting
                let _ = reply_tx.send(self.state.stats());
            }
            Command::Shutdown => {}
        }
    }
}
