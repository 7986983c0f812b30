//! Keel Controller
//!
//! Controller registration manager for Keel controllers.
//!
//! # Overview
//!
//! Every controller must appear in the metadata log with a registration
//! record for its current incarnation. The registration manager:
//! - Watches published metadata images for our record
//! - Sends `ControllerRegistrationRequest` to the active controller when the
//!   record is missing or stale
//! - Retries failed attempts with exponential backoff
//! - Pauses after `UNSUPPORTED_VERSION` until metadata changes
//!
//! # TigerStyle
//! - Single-threaded event handler (one writer for all state)
//! - At most one request in flight
//! - Registration belief derived only from the log, never from responses

pub mod attempt;
pub mod backoff;
pub mod channel;
pub mod error;
pub mod manager;
pub mod state;
pub mod tracker;
pub mod transport;

mod worker;

pub use attempt::{AttemptController, AttemptId, RegistrationOutcome};
pub use backoff::ExponentialBackoff;
pub use channel::{
    ApiError, ControllerChannel, ControllerNode, ControllerRegistrationRequest,
    ControllerRegistrationResponse, RequestFeature, RequestListener, ResponseHandler,
};
pub use error::{ChannelError, ChannelResult};
pub use manager::RegistrationManager;
pub use state::{EpochSupplier, RegistrationStats};
pub use tracker::RegistrationTracker;
pub use transport::{LeaderTracker, RegistrationTransport, TransportChannel};
