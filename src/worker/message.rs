//! Queue message decoding and validation.

use crate::error::{Error, Result, ValidationError};
use crate::types::{JobId, JobParameters, parse_br_date};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Parameters that must be present and non-empty
const REQUIRED_PARAMETERS: &[&str] = &[
    "stores",
    "document_type",
    "start_date",
    "end_date",
    "gms_login_url",
];

/// A decoded job request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobMessage {
    /// Identifier assigned by the producer
    pub job_id: JobId,
    /// Export filter and session settings
    pub parameters: JobParameters,
}

/// Build the wire form of a job request from raw parameters
///
/// The parameters are embedded as given so that fields which are never
/// serialized back out (the password) still reach the worker.
pub fn encode_message(job_id: &JobId, parameters: Value) -> Result<Vec<u8>> {
    let body = serde_json::json!({
        "job_id": job_id,
        "parameters": parameters,
    });
    Ok(serde_json::to_vec(&body)?)
}

/// Decode and validate a queue message body
///
/// Undecodable bodies are [`ValidationError::Malformed`]; absent or empty
/// required fields are reported together as [`ValidationError::MissingFields`].
pub fn decode_message(body: &[u8]) -> Result<JobMessage> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(ValidationError::Malformed(e.to_string())))?;
    let Value::Object(root) = &value else {
        return Err(Error::Validation(ValidationError::Malformed(
            "message is not a JSON object".to_string(),
        )));
    };

    let mut missing = Vec::new();
    if !is_present(root.get("job_id")) {
        missing.push("job_id".to_string());
    }

    match root.get("parameters") {
        Some(Value::Object(params)) => {
            for field in REQUIRED_PARAMETERS {
                if !is_present(params.get(*field)) {
                    missing.push((*field).to_string());
                }
            }
        }
        Some(Value::Null) | None => {
            missing.push("parameters".to_string());
        }
        Some(_) => {
            return Err(Error::Validation(ValidationError::Malformed(
                "parameters is not a JSON object".to_string(),
            )));
        }
    }

    if !missing.is_empty() {
        return Err(Error::Validation(ValidationError::MissingFields(missing)));
    }

    if let Some(Value::Object(params)) = root.get("parameters") {
        for field in ["start_date", "end_date"] {
            if let Some(Value::String(raw)) = params.get(field)
                && parse_br_date(raw).is_none()
            {
                return Err(Error::Validation(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: format!("'{raw}' is not a DD/MM/YYYY date"),
                }));
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Validation(ValidationError::Malformed(e.to_string())))
}

/// Best-effort job id of a body that failed validation, for reporting
pub fn peek_job_id(body: &[u8]) -> Option<JobId> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("job_id")? {
        Value::String(s) if !s.trim().is_empty() => Some(JobId::new(s.clone())),
        Value::Number(n) => Some(JobId::new(n.to_string())),
        _ => None,
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}
