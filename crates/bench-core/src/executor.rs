use crate::protocol::{self, DecodeError, EncodeError};
use crate::sampler::Transaction;
use crate::transport::{AttemptFailure, RetryingTransport, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Failure classes a request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Encode,
    Transport,
    RetryableStatus,
    Status,
    Decode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Success { score: f64, is_fraud: bool },
    Failure { kind: ErrorKind, message: String },
}

/// Result of one logical request, retries included.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub encode_time: Duration,
    /// Network-visible time: every attempt plus backoff sleeps
    pub inference_time: Duration,
    pub total_time: Duration,
    pub attempts: u32,
    pub status: OutcomeStatus,
    pub completed_at: DateTime<Utc>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            OutcomeStatus::Failure { kind, .. } => Some(*kind),
            OutcomeStatus::Success { .. } => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match &self.status {
            OutcomeStatus::Success { score, .. } => Some(*score),
            OutcomeStatus::Failure { .. } => None,
        }
    }

    pub fn is_fraud(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { is_fraud: true, .. })
    }
}

impl From<&EncodeError> for ErrorKind {
    fn from(_: &EncodeError) -> Self {
        ErrorKind::Encode
    }
}

impl From<&DecodeError> for ErrorKind {
    fn from(_: &DecodeError) -> Self {
        ErrorKind::Decode
    }
}

impl From<&TransportError> for ErrorKind {
    fn from(e: &TransportError) -> Self {
        match e.failure {
            AttemptFailure::RetryableStatus(_) => ErrorKind::RetryableStatus,
            AttemptFailure::Status(_) => ErrorKind::Status,
            AttemptFailure::Timeout
            | AttemptFailure::Connect(_)
            | AttemptFailure::Body { .. }
            | AttemptFailure::Request(_) => ErrorKind::Transport,
        }
    }
}

/// Runs the encode → send → decode lifecycle for one transaction.
///
/// Every failure ends up inside the returned [`Outcome`]; nothing is
/// propagated to the caller.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: RetryingTransport,
}

impl RequestExecutor {
    pub fn new(transport: RetryingTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &RetryingTransport {
        &self.transport
    }

    pub async fn execute(&self, tx: &Transaction) -> Outcome {
        let t0 = Instant::now();

        let body = match protocol::encode_body(tx) {
            Ok(body) => body,
            Err(e) => {
                let t1 = Instant::now();
                return failed(t1 - t0, Duration::ZERO, t0, 0, (&e).into(), e.to_string());
            }
        };
        let t1 = Instant::now();
        let encode_time = t1 - t0;

        let sent = self.transport.send(&body).await;
        let t2 = Instant::now();

        let delivered = match sent {
            Ok(delivered) => delivered,
            Err(e) => {
                let inference_time = if e.saw_response { t2 - t1 } else { Duration::ZERO };
                return failed(
                    encode_time,
                    inference_time,
                    t0,
                    e.attempts,
                    (&e).into(),
                    e.to_string(),
                );
            }
        };

        let status = match protocol::decode(&delivered.body) {
            Ok(score) => OutcomeStatus::Success {
                score,
                is_fraud: protocol::is_fraud(score),
            },
            Err(e) => OutcomeStatus::Failure {
                kind: (&e).into(),
                message: e.to_string(),
            },
        };
        let t3 = Instant::now();

        Outcome {
            encode_time,
            inference_time: t2 - t1,
            total_time: t3 - t0,
            attempts: delivered.attempts,
            status,
            completed_at: Utc::now(),
        }
    }
}

fn failed(
    encode_time: Duration,
    inference_time: Duration,
    t0: Instant,
    attempts: u32,
    kind: ErrorKind,
    message: String,
) -> Outcome {
    Outcome {
        encode_time,
        inference_time,
        total_time: t0.elapsed(),
        attempts,
        status: OutcomeStatus::Failure { kind, message },
        completed_at: Utc::now(),
    }
}
