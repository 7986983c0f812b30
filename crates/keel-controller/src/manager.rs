//! Controller registration manager
//!
//! TigerStyle: Explicit lifecycle, single-writer state, no locks on the hot
//! path.
//!
//! ```text
//!   created ──start()──▶ running ──close()──▶ stopped
//!      │                                        ▲
//!      └───────────────close()──────────────────┘
//! ```
//!
//! Once running, every input (metadata updates, RPC completions, retry
//! timers, stats reads) is a task on one FIFO queue drained by a dedicated
//! thread named `{prefix}controller-registration-manager-event-handler`.

use crate::channel::ControllerChannel;
use crate::state::{EpochSupplier, RegistrationState, RegistrationStats};
use crate::worker::{Command, Worker};
use keel_core::config::RegistrationConfig;
use keel_core::error::{Error, Result};
use keel_core::io::IoContext;
use keel_metadata::{
    ControllerId, ControllerIdentity, IncarnationId, LoaderManifest, MetadataDelta, MetadataImage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "controller registration manager";

enum Lifecycle {
    /// Not started; state is owned here and mutated under the lock
    Created(Box<RegistrationState>),
    /// State lives on the event handler thread
    Running(EventHandler),
    Stopped,
}

struct EventHandler {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

enum StatsReply {
    Ready(RegistrationStats),
    Queued(oneshot::Receiver<RegistrationStats>),
}

/// Keeps this controller's registration reflected in the metadata log
pub struct RegistrationManager {
    controller_id: ControllerId,
    incarnation_id: IncarnationId,
    thread_name: String,
    io: IoContext,
    lifecycle: Mutex<Lifecycle>,
    closing: Arc<AtomicBool>,
}

impl RegistrationManager {
    /// Create a manager in the `created` state
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if `config` fails validation.
    pub fn new(
        identity: ControllerIdentity,
        config: RegistrationConfig,
        io: IoContext,
        epoch_supplier: EpochSupplier,
    ) -> Result<Self> {
        config.validate()?;

        let identity = Arc::new(identity);
        let state = RegistrationState::new(identity.clone(), &config, io.clone(), epoch_supplier);

        Ok(Self {
            controller_id: identity.controller_id(),
            incarnation_id: identity.incarnation_id(),
            thread_name: config.thread_name(),
            io,
            lifecycle: Mutex::new(Lifecycle::Created(Box::new(state))),
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn controller_id(&self) -> ControllerId {
        self.controller_id
    }

    pub fn incarnation_id(&self) -> IncarnationId {
        self.incarnation_id
    }

    /// Name of the event handler thread
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        // State behind the lock is only swapped, never left half-written
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the event handler and attach the controller channel
    ///
    /// # Errors
    /// `AlreadyStarted` if running, `ManagerClosed` after close, and
    /// `WorkerSpawnFailed` if the thread or its runtime cannot be created
    /// (the manager stays in `created` and `start` may be retried).
    pub fn start(&self, channel: Arc<dyn ControllerChannel>) -> Result<()> {
        let mut lifecycle = self.lifecycle();

        let mut state = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Created(state) => state,
            Lifecycle::Running(handler) => {
                *lifecycle = Lifecycle::Running(handler);
                return Err(Error::already_started(COMPONENT));
            }
            Lifecycle::Stopped => return Err(Error::closed(COMPONENT)),
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                *lifecycle = Lifecycle::Created(state);
                return Err(Error::WorkerSpawnFailed {
                    thread_name: self.thread_name.clone(),
                    reason: format!("failed to build runtime: {}", e),
                });
            }
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        // State is handed over only once the thread exists
        let (state_tx, state_rx) = oneshot::channel::<Box<RegistrationState>>();

        let controller_id = self.controller_id;
        let time = self.io.time.clone();
        let closing = self.closing.clone();

        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let Ok(state) = state_rx.blocking_recv() else {
                    return;
                };
                let worker = Worker::new(controller_id, state, commands_rx, time, closing);
                runtime.block_on(worker.run());
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                *lifecycle = Lifecycle::Created(state);
                return Err(Error::WorkerSpawnFailed {
                    thread_name: self.thread_name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        state.install_channel(channel, commands_tx.clone());
        if state_tx.send(state).is_err() {
            // Receiver only drops if the thread died before its first line
            *lifecycle = Lifecycle::Stopped;
            return Err(Error::WorkerPanicked {
                thread_name: self.thread_name.clone(),
            });
        }

        *lifecycle = Lifecycle::Running(EventHandler {
            commands: commands_tx,
            thread,
        });

        info!(
            controller_id = %self.controller_id,
            incarnation_id = %self.incarnation_id,
            thread_name = %self.thread_name,
            "Controller registration manager started"
        );
        Ok(())
    }

    /// Deliver a newly published metadata image
    ///
    /// Never fails. Before `start` the update is applied in place; after
    /// `close` it is dropped.
    pub fn on_metadata_update(
        &self,
        delta: MetadataDelta,
        image: Arc<MetadataImage>,
        manifest: LoaderManifest,
    ) {
        match &mut *self.lifecycle() {
            Lifecycle::Created(state) => state.on_metadata_update(&delta, &image, &manifest),
            Lifecycle::Running(handler) => {
                let command = Command::MetadataUpdate {
                    delta,
                    image,
                    manifest,
                };
                if handler.commands.send(command).is_err() {
                    debug!(
                        controller_id = %self.controller_id,
                        "Dropping metadata update: event handler stopped"
                    );
                }
            }
            Lifecycle::Stopped => debug!(
                controller_id = %self.controller_id,
                "Dropping metadata update after close"
            ),
        }
    }

    fn request_stats(&self) -> Result<StatsReply> {
        match &*self.lifecycle() {
            Lifecycle::Created(state) => Ok(StatsReply::Ready(state.stats())),
            Lifecycle::Running(handler) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                handler
                    .commands
                    .send(Command::Inspect { reply_tx })
                    .map_err(|_| Error::closed(COMPONENT))?;
                Ok(StatsReply::Queued(reply_rx))
            }
            Lifecycle::Stopped => Err(Error::closed(COMPONENT)),
        }
    }

    /// Read the current stats through the event queue
    ///
    /// # Errors
    /// `ManagerClosed` once closed.
    pub async fn stats(&self) -> Result<RegistrationStats> {
        match self.request_stats()? {
            StatsReply::Ready(stats) => Ok(stats),
            StatsReply::Queued(reply_rx) => {
                reply_rx.await.map_err(|_| Error::closed(COMPONENT))
            }
        }
    }

    /// Blocking variant of [`stats`](Self::stats)
    ///
    /// # Panics
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_stats(&self) -> Result<RegistrationStats> {
        match self.request_stats()? {
            StatsReply::Ready(stats) => Ok(stats),
            StatsReply::Queued(reply_rx) => reply_rx
                .blocking_recv()
                .map_err(|_| Error::closed(COMPONENT)),
        }
    }

    /// Stop the manager
    ///
    /// Idempotent and safe before `start`. Tasks queued before this call are
    /// processed, later ones are dropped, and any armed retry is cancelled.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped);

        match previous {
            Lifecycle::Created(_) => info!(
                controller_id = %self.controller_id,
                "Controller registration manager closed before start"
            ),
            Lifecycle::Running(handler) => {
                self.closing.store(true, Ordering::SeqCst);
                // Fails only if the thread already exited
                let _ = handler.commands.send(Command::Shutdown);
                drop(handler.commands);

                if handler.thread.thread().id() == std::thread::current().id() {
                    warn!(
                        controller_id = %self.controller_id,
                        "close() called from the event handler; not joining"
                    );
                } else if handler.thread.join().is_err() {
                    error!(
                        controller_id = %self.controller_id,
                        thread_name = %self.thread_name,
                        "Registration event handler panicked"
                    );
                }

                info!(
                    controller_id = %self.controller_id,
                    "Controller registration manager closed"
                );
            }
            Lifecycle::Stopped => {}
        }
    }
}

impl Drop for RegistrationManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match &*self.lifecycle() {
            Lifecycle::Created(_) => "created",
            Lifecycle::Running(_) => "running",
            Lifecycle::Stopped => "stopped",
        };
        f.debug_struct("RegistrationManager")
            .field("controller_id", &self.controller_id)
            .field("incarnation_id", &self.incarnation_id)
            .field("phase", &phase)
            .finish()
    }
}
