//! Instrumented network primitives for censorship measurement.
//!
//! Every operation (resolve, connect, TLS and QUIC handshakes, DNS and
//! HTTP round trips, socket I/O) can be wrapped so that it records
//! start/done events into a shared [`Saver`], and every error it returns
//! maps onto a small portable [`FailureCode`] vocabulary.

pub mod bogon;
pub mod config;
pub mod context;
pub mod failure;
pub mod logging;
pub mod netx;
pub mod session;
pub mod trace;

pub use bogon::{is_bogon, BogonResolver};
pub use config::MeasurementConfig;
pub use context::{Context, ContextError};
pub use failure::{classify, classify_or_unknown, FailureCode};
pub use netx::BoxError;
pub use session::{EndpointOutcome, MeasurementSession, Primitives};
pub use trace::{Event, EventName, EventValue, Saver};
