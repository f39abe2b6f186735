//! Background aggregation worker.
//!
//! One dedicated thread evaluates [`crate::aggregation::AggregationRequest`]s
//! received over a channel. It holds no state between messages.

pub mod host;
pub mod protocol;

pub use host::{handle_request, WorkerClient};
pub use protocol::{RequestId, ResponsePayload, WorkerRequest, WorkerResponse};
