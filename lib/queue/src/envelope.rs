//! Versioned envelope for queued payloads.
//!
//! Everything written to a stream or bucket is wrapped so that workers and
//! schedulers running different releases can tell payload versions apart.

use serde::{Deserialize, Serialize};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Payload format version.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps `payload` at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not an envelope of `T`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// An envelope whose payload has not been decoded yet.
///
/// Used to reject unknown versions before attempting a typed decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub version: u32,
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Decodes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(
        self,
    ) -> Result<Envelope<T>, serde_json::Error> {
        let payload: T = serde_json::from_value(self.payload)?;
        Ok(Envelope {
            version: self.version,
            payload,
        })
    }

    /// Parses the outer envelope only.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not an envelope.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Marker {
        execution_id: String,
        attempts: u32,
    }

    #[test]
    fn version_sits_beside_payload() {
        let envelope = Envelope::new(Marker {
            execution_id: "abc".to_string(),
            attempts: 2,
        });
        let value = serde_json::to_value(&envelope).expect("to_value");

        assert_eq!(value["version"], CURRENT_VERSION);
        assert_eq!(value["payload"]["execution_id"], "abc");
    }

    #[test]
    fn raw_envelope_checks_version_before_decode() {
        let bytes = serde_json::to_vec(&json!({
            "version": 7,
            "payload": { "execution_id": "abc", "attempts": 1 }
        }))
        .expect("serialize");

        let raw = RawEnvelope::from_json_bytes(&bytes).expect("raw");
        assert_ne!(raw.version, CURRENT_VERSION);

        let typed: Envelope<Marker> = raw.deserialize_payload().expect("payload");
        assert!(!typed.is_current_version());
        assert_eq!(typed.payload().attempts, 1);
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let bytes = br#"{"version":1,"payload":{"unexpected":true}}"#;
        assert!(Envelope::<Marker>::from_json_bytes(bytes).is_err());
    }
}
