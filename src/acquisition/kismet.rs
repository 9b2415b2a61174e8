//! Kismet record decoding.
//!
//! Record fields used:
//! - `kismet.device.base.last_time`: record timestamp (also the poll cursor)
//! - `kismet.device.base.macaddr`: device key
//! - `distancia_senal_mediana_f2`: estimated distance to the anchor
//! - `minute_vec_signal_med`: median signal strength

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AnchorIndex, Measurement};

/// Anchor acquisition errors. All of them are recoverable per source.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Anchor returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One anchor record. Missing fields default so a sparse record degrades to
/// an empty key or an absent distance instead of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KismetRecord {
    #[serde(rename = "kismet.device.base.last_time", default)]
    pub last_time: String,
    #[serde(rename = "kismet.device.base.macaddr", default)]
    pub macaddr: String,
    #[serde(rename = "distancia_senal_mediana_f2", default)]
    pub distance: f64,
    #[serde(rename = "minute_vec_signal_med", default)]
    pub signal_intensity: f64,
}

impl KismetRecord {
    pub fn into_measurement(self, anchor: AnchorIndex) -> Measurement {
        Measurement::new(self.macaddr, anchor, self.distance, self.last_time)
            .with_signal_intensity(self.signal_intensity)
    }
}

/// Decode a response body (a JSON array of records) into measurements tagged
/// with `anchor`.
pub fn decode_batch(body: &[u8], anchor: AnchorIndex) -> Result<Vec<Measurement>, AcquisitionError> {
    let records: Vec<KismetRecord> = serde_json::from_slice(body)?;
    Ok(records
        .into_iter()
        .map(|r| r.into_measurement(anchor))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_anchor_records() {
        let body = br#"[
            {"kismet.device.base.last_time":"1579618060","kismet.device.base.macaddr":"00:08:22:27:75:8A",
             "distancia_senal_mediana_f2":5.83,"minute_vec_signal_med":-61.5,"kismet.device.base.channel":"6"},
            {"kismet.device.base.last_time":"1579618061","kismet.device.base.macaddr":"A4:D9:31:CC:9B:62",
             "distancia_senal_mediana_f2":7.0,"minute_vec_signal_med":-70}
        ]"#;

        let batch = decode_batch(body, AnchorIndex::SECOND).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].device_key, "00:08:22:27:75:8A");
        assert_eq!(batch[0].anchor_index, 2);
        assert!((batch[0].distance - 5.83).abs() < 1e-12);
        assert!((batch[0].signal_intensity + 61.5).abs() < 1e-12);
        assert_eq!(batch[0].timestamp, "1579618060");
        assert_eq!(batch[1].timestamp, "1579618061");
    }

    #[test]
    fn missing_fields_default() {
        let batch = decode_batch(br#"[{"kismet.device.base.last_time":"t"}]"#, AnchorIndex::FIRST).unwrap();
        assert!(!batch[0].has_device_key());
        assert_eq!(batch[0].distance, 0.0);
    }

    #[test]
    fn empty_array_is_an_empty_batch() {
        assert!(decode_batch(b"[]", AnchorIndex::THIRD).unwrap().is_empty());
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = decode_batch(b"<html>502</html>", AnchorIndex::FIRST).unwrap_err();
        assert!(matches!(err, AcquisitionError::Decode(_)));
        let err = decode_batch(br#"{"not":"an array"}"#, AnchorIndex::FIRST).unwrap_err();
        assert!(matches!(err, AcquisitionError::Decode(_)));
    }
}
