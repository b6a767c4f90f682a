//! CloudEvents v1.0 envelope codec with W3C trace-context extensions
//! (`spec.md` §4.1, §6.1).

use crate::error::EnvelopeError;
use crate::tracing_facade::is_well_formed_traceparent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const SPEC_VERSION: &str = "1.0";
const DATA_CONTENT_TYPE: &str = "application/json";

/// The wire shape of a CloudEvents envelope, structured-content mode.
/// Never persisted in this form — ephemeral, built by the publisher and
/// consumed by the dispatcher (`spec.md` §3.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub specversion: String,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Value,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub traceparent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tracestate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlationid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sendtimestamp: Option<i64>,
}

/// Parameters for [`encode`] — kept as a struct rather than a long
/// positional argument list, since every field is independently optional or
/// independently meaningful.
pub struct EncodeParams<'a, T: Serialize> {
    pub id: Uuid,
    pub event_type: &'a str,
    pub source: &'a str,
    pub payload: &'a T,
    pub correlation_id: Option<Uuid>,
    pub traceparent: Option<String>,
    pub tracestate: Option<String>,
    pub send_timestamp: DateTime<Utc>,
}

/// Build a CloudEvents envelope for `payload`.
///
/// `data` is always JSON; if `payload` cannot be JSON-encoded (its schema
/// drifted in a way `serde_json` rejects), the codec falls back to the
/// payload's `Debug` representation as a JSON string rather than raising —
/// forward compatibility matters more than round-trip fidelity here
/// (`spec.md` §4.1).
pub fn encode<T>(params: EncodeParams<'_, T>) -> Envelope
where
    T: Serialize + std::fmt::Debug,
{
    let data = serde_json::to_value(params.payload)
        .unwrap_or_else(|_| Value::String(format!("{:?}", params.payload)));

    Envelope {
        specversion: SPEC_VERSION.to_string(),
        id: params.id,
        event_type: params.event_type.to_string(),
        source: params.source.to_string(),
        time: params.send_timestamp,
        datacontenttype: DATA_CONTENT_TYPE.to_string(),
        data,
        traceparent: params.traceparent,
        tracestate: params.tracestate,
        correlationid: params.correlation_id,
        sendtimestamp: Some(params.send_timestamp.timestamp_millis()),
    }
}

/// Decode raw bytes into an [`Envelope`], validating required CloudEvents
/// fields and dropping a malformed `traceparent` rather than failing the
/// whole decode (`spec.md` §4.1).
///
/// Returns the envelope plus `true` if a `traceparent` extension was
/// present but malformed and therefore dropped, so the caller can log the
/// warning the spec calls for.
pub fn decode(bytes: &[u8]) -> Result<(Envelope, bool), EnvelopeError> {
    let mut envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| EnvelopeError::Malformed(format!("invalid JSON: {e}")))?;

    if envelope.specversion != SPEC_VERSION {
        return Err(EnvelopeError::Malformed(format!(
            "unsupported specversion {:?}",
            envelope.specversion
        )));
    }
    if envelope.event_type.is_empty() {
        return Err(EnvelopeError::Malformed("missing type".to_string()));
    }
    if envelope.source.is_empty() {
        return Err(EnvelopeError::Malformed("missing source".to_string()));
    }

    let mut dropped_traceparent = false;
    if let Some(tp) = &envelope.traceparent {
        if !is_well_formed_traceparent(tp) {
            envelope.traceparent = None;
            envelope.tracestate = None;
            dropped_traceparent = true;
        }
    }

    Ok((envelope, dropped_traceparent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize)]
    struct Payload {
        wallet_id: String,
    }

    fn sample_params(payload: &Payload) -> EncodeParams<'_, Payload> {
        EncodeParams {
            id: Uuid::nil(),
            event_type: "walletCreatedEventProducer",
            source: "/wallet-hub",
            payload,
            correlation_id: Some(Uuid::nil()),
            traceparent: Some(
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
            ),
            tracestate: None,
            send_timestamp: Utc::now(),
        }
    }

    #[test]
    fn round_trips_a_well_formed_envelope() {
        let payload = Payload {
            wallet_id: "W1".to_string(),
        };
        let envelope = encode(sample_params(&payload));
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let (decoded, dropped) = decode(&bytes).unwrap();
        assert!(!dropped);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn rejects_missing_specversion() {
        let bytes = json!({
            "id": Uuid::nil(),
            "type": "walletCreatedEventProducer",
            "source": "/wallet-hub",
            "time": Utc::now(),
            "datacontenttype": "application/json",
            "data": {}
        })
        .to_string();
        assert!(decode(bytes.as_bytes()).is_err());
    }

    #[test]
    fn drops_malformed_traceparent_without_failing_decode() {
        let payload = Payload {
            wallet_id: "W1".to_string(),
        };
        let mut envelope = encode(sample_params(&payload));
        envelope.traceparent = Some("not-a-traceparent".to_string());
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let (decoded, dropped) = decode(&bytes).unwrap();
        assert!(dropped);
        assert_eq!(decoded.traceparent, None);
    }

    #[test]
    fn falls_back_to_debug_text_when_payload_not_json_encodable() {
        struct Unencodable;
        impl std::fmt::Debug for Unencodable {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "Unencodable")
            }
        }
        impl Serialize for Unencodable {
            fn serialize<S>(&self, _s: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                Err(serde::ser::Error::custom("cannot encode"))
            }
        }

        let params = EncodeParams {
            id: Uuid::nil(),
            event_type: "walletCreatedEventProducer",
            source: "/wallet-hub",
            payload: &Unencodable,
            correlation_id: None,
            traceparent: None,
            tracestate: None,
            send_timestamp: Utc::now(),
        };
        let envelope = encode(params);
        assert_eq!(envelope.datacontenttype, "application/json");
        assert_eq!(envelope.data, Value::String("Unencodable".to_string()));
    }

    #[test]
    fn absent_extensions_are_omitted_not_empty_strings() {
        let params = EncodeParams {
            id: Uuid::nil(),
            event_type: "walletCreatedEventProducer",
            source: "/wallet-hub",
            payload: &Payload {
                wallet_id: "W1".to_string(),
            },
            correlation_id: None,
            traceparent: None,
            tracestate: None,
            send_timestamp: Utc::now(),
        };
        let envelope = encode(params);
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("traceparent").is_none());
        assert!(json.get("tracestate").is_none());
        assert!(json.get("correlationid").is_none());
    }
}
