pub mod circonus;

use anyhow::Result;

use crate::result::Measurement;

pub use circonus::HttpTrapSink;

/// Sink receives validated measurements from the result consumer.
pub trait Sink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Deliver one measurement. Called by a single consumer task, in queue
    /// order.
    fn push(&self, m: &Measurement) -> impl std::future::Future<Output = Result<()>> + Send;
}
