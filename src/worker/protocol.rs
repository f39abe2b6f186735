//! Envelopes exchanged with the aggregation worker thread.
//!
//! Every request carries an id assigned by the coordinator and the full input
//! it needs; the worker keeps no state between messages. The single response
//! to a request echoes its id.

use crate::aggregation::{AggregationKind, AggregationOutput, AggregationRequest};

pub type RequestId = u64;

#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub request_id: RequestId,
    pub payload: AggregationRequest,
}

impl WorkerRequest {
    pub fn kind(&self) -> AggregationKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Complete(AggregationOutput),
    Error {
        kind: AggregationKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub request_id: RequestId,
    pub payload: ResponsePayload,
}

impl WorkerResponse {
    pub fn kind(&self) -> AggregationKind {
        match &self.payload {
            ResponsePayload::Complete(output) => output.kind(),
            ResponsePayload::Error { kind, .. } => *kind,
        }
    }
}
