//! Messages exchanged between the dispatcher and the inference worker.
//!
//! Responses use the `{type, payload}` envelope on the wire. The in-process
//! worker passes them as values; `encode`/`decode` are the codec for
//! external workers attached through `WorkerHandle::from_wire`. Requests move
//! their frame into the worker and therefore only expose a JSON description
//! for logging.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capture::Frame;
use crate::detector::DetectionResult;

/// One frame submitted for inference.
#[derive(Debug)]
pub struct DetectionRequest {
    pub request_id: u64,
    pub frame: Frame,
}

/// Message from the dispatcher to the worker.
#[derive(Debug)]
pub enum Request {
    Init,
    Detect(DetectionRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::Detect(_) => "detect",
        }
    }

    /// Wire-shaped description of the request, with the image summarized.
    pub fn envelope(&self) -> Value {
        match self {
            Request::Init => json!({ "type": "init" }),
            Request::Detect(request) => json!({
                "type": "detect",
                "payload": {
                    "requestId": request.request_id,
                    "image": {
                        "sequence": request.frame.meta.sequence,
                        "width": request.frame.meta.width,
                        "height": request.frame.meta.height,
                        "timestampMs": request.frame.timestamp_ms,
                    },
                },
            }),
        }
    }
}

/// Message from the worker back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Response {
    Init(InitPayload),
    Detect(DetectPayload),
    /// The worker was already processing a request.
    Rejected(RejectedPayload),
    /// The detector failed on this frame; the worker stays usable.
    Failed(FailedPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectPayload {
    pub request_id: u64,
    pub result: DetectionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPayload {
    pub request_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub request_id: u64,
    pub error: String,
}

const KNOWN_TYPES: [&str; 4] = ["init", "detect", "rejected", "failed"];

impl Response {
    pub fn init_ok() -> Self {
        Response::Init(InitPayload {
            is_success: true,
            error: None,
        })
    }

    pub fn init_failed(error: impl Into<String>) -> Self {
        Response::Init(InitPayload {
            is_success: false,
            error: Some(error.into()),
        })
    }

    /// Request this response answers, if it answers a detect.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Response::Init(_) => None,
            Response::Detect(p) => Some(p.request_id),
            Response::Rejected(p) => Some(p.request_id),
            Response::Failed(p) => Some(p.request_id),
        }
    }

    /// Decode a wire message. Unrecognized message types yield `Ok(None)`
    /// and are meant to be ignored by the receiver.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| KNOWN_TYPES.contains(&t));
        if !known {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Landmark;

    #[test]
    fn init_success_omits_error() {
        let json: Value = serde_json::from_str(&Response::init_ok().encode().unwrap()).unwrap();
        assert_eq!(json, json!({ "type": "init", "payload": { "isSuccess": true } }));
    }

    #[test]
    fn init_failure_carries_reason() {
        let decoded = Response::decode(
            r#"{"type":"init","payload":{"isSuccess":false,"error":"model missing"}}"#,
        )
        .unwrap();
        assert_eq!(decoded, Some(Response::init_failed("model missing")));
    }

    #[test]
    fn detect_payload_shape() {
        let response = Response::Detect(DetectPayload {
            request_id: 7,
            result: DetectionResult {
                timestamp_ms: 33.0,
                landmarks: vec![vec![Landmark {
                    x: 0.5,
                    y: 0.25,
                    z: -0.1,
                    visibility: 0.9,
                    presence: 1.0,
                }]],
            },
        });
        let json: Value = serde_json::from_str(&response.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "detect");
        assert_eq!(json["payload"]["requestId"], 7);
        assert_eq!(json["payload"]["result"]["timestampMs"], 33.0);
        assert_eq!(json["payload"]["result"]["landmarks"][0][0]["y"], 0.25);
        assert_eq!(response.request_id(), Some(7));
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert_eq!(Response::decode(r#"{"type":"progress","payload":{"pct":50}}"#).unwrap(), None);
        assert_eq!(Response::decode(r#"{"payload":{}}"#).unwrap(), None);
        assert!(Response::decode("not json").is_err());
    }
}
