//! Anchor data acquisition
//!
//! Each anchor exposes an HTTP endpoint returning a JSON array of Kismet
//! device records. [`HttpAnchorSource`] polls one endpoint and turns the
//! records into tagged [`Measurement`](crate::types::Measurement)s.

mod http_poller;
pub mod kismet;

pub use http_poller::{backoff_delay, millis, AnchorPollStats, HttpAnchorSource};
pub use kismet::{decode_batch, AcquisitionError, KismetRecord};
