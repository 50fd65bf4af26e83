//! Tensor-inference (KServe V2) request/response schema.

use crate::sampler::{Transaction, FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INPUT_TENSOR_NAME: &str = "float_input";
pub const INPUT_DATATYPE: &str = "FP32";

/// Scores strictly above this are classified as fraud.
pub const FRAUD_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    pub inputs: Vec<InputTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTensor {
    pub name: String,
    pub shape: [usize; 2],
    pub datatype: String,
    pub data: Vec<[f32; FEATURE_COUNT]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferResponse {
    pub outputs: Vec<OutputTensor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputTensor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    #[serde(default)]
    pub datatype: Option<String>,
    /// Left untyped: only the first element of the first tensor is read,
    /// other tensors may carry BYTES or nulls.
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("feature '{name}' is not finite: {value}")]
    NonFinite { name: &'static str, value: f32 },
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("response has no output tensors")]
    MissingOutput,
    #[error("output tensor '{0}' has no data")]
    EmptyData(String),
    #[error("score is not a number: {0}")]
    NonNumeric(serde_json::Value),
    #[error("score is not finite: {0}")]
    NonFinite(f64),
}

/// Build the single-row request for one transaction.
pub fn encode(tx: &Transaction) -> InferRequest {
    InferRequest {
        inputs: vec![InputTensor {
            name: INPUT_TENSOR_NAME.to_string(),
            shape: [1, FEATURE_COUNT],
            datatype: INPUT_DATATYPE.to_string(),
            data: vec![tx.features()],
        }],
    }
}

/// Encode straight to the JSON body sent on the wire.
pub fn encode_body(tx: &Transaction) -> Result<Vec<u8>, EncodeError> {
    let request = encode(tx);
    for row in request.inputs.iter().flat_map(|t| t.data.iter()) {
        for (name, value) in FEATURE_NAMES.iter().zip(row.iter()) {
            if !value.is_finite() {
                return Err(EncodeError::NonFinite {
                    name,
                    value: *value,
                });
            }
        }
    }
    Ok(serde_json::to_vec(&request)?)
}

/// Extract the score: first element of the first output tensor.
pub fn decode(body: &[u8]) -> Result<f64, DecodeError> {
    let response: InferResponse = serde_json::from_slice(body)?;
    let output = response.outputs.first().ok_or(DecodeError::MissingOutput)?;
    let first = output
        .data
        .first()
        .ok_or_else(|| DecodeError::EmptyData(output.name.clone().unwrap_or_default()))?;
    let score = first
        .as_f64()
        .ok_or_else(|| DecodeError::NonNumeric(first.clone()))?;
    if !score.is_finite() {
        return Err(DecodeError::NonFinite(score));
    }
    Ok(score)
}

pub fn is_fraud(score: f64) -> bool {
    score > FRAUD_THRESHOLD
}
