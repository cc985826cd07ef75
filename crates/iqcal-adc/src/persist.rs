//! Persisted register snapshots.
//!
//! The whole register file serializes to a flat JSON document so a session
//! can restore the exact configuration that was last measured. Loading is
//! strict in both directions: a document missing any required key is
//! rejected (`IncompleteSnapshot`) instead of silently defaulting, and a
//! document carrying a key this model version does not know is rejected
//! (`UnknownField`) to catch schema drift between saved state and the code.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{AdcError, AdcResult};

/// Flat, order-independent mapping of register field names to values.
///
/// `zdok` identifies the ADC card slot the snapshot was taken from; the
/// remaining keys mirror the register model fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub zdok: u8,
    /// Packed control word
    pub control: u16,
    pub offset_vi: f64,
    pub offset_vq: f64,
    pub analogue_gain_vi: u8,
    pub analogue_gain_vq: u8,
    pub gain_compensation_vi: i8,
    pub gain_compensation_vq: i8,
    pub timing_skew_vi: i8,
    pub timing_skew_vq: i8,
    pub drda_vi: u8,
    pub drda_vq: u8,
    pub isa_vi: u8,
    pub isa_vq: u8,
}

/// Every key a snapshot document must carry, and the only keys it may carry.
pub const SNAPSHOT_FIELDS: [&str; 14] = [
    "zdok",
    "control",
    "offset_vi",
    "offset_vq",
    "analogue_gain_vi",
    "analogue_gain_vq",
    "gain_compensation_vi",
    "gain_compensation_vq",
    "timing_skew_vi",
    "timing_skew_vq",
    "drda_vi",
    "drda_vq",
    "isa_vi",
    "isa_vq",
];

impl RegisterSnapshot {
    /// Serialize to a pretty-printed JSON document.
    pub fn to_json(&self) -> AdcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> AdcResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let map = value.as_object().ok_or(AdcError::FieldType {
            field: "<document>".to_string(),
            expected: "a JSON object",
        })?;

        for field in SNAPSHOT_FIELDS {
            if !map.contains_key(field) {
                return Err(AdcError::IncompleteSnapshot(field.to_string()));
            }
        }
        for key in map.keys() {
            if !SNAPSHOT_FIELDS.contains(&key.as_str()) {
                return Err(AdcError::UnknownField(key.clone()));
            }
        }

        Ok(Self {
            zdok: get_u8(map, "zdok")?,
            control: get_u16(map, "control")?,
            offset_vi: get_f64(map, "offset_vi")?,
            offset_vq: get_f64(map, "offset_vq")?,
            analogue_gain_vi: get_u8(map, "analogue_gain_vi")?,
            analogue_gain_vq: get_u8(map, "analogue_gain_vq")?,
            gain_compensation_vi: get_i8(map, "gain_compensation_vi")?,
            gain_compensation_vq: get_i8(map, "gain_compensation_vq")?,
            timing_skew_vi: get_i8(map, "timing_skew_vi")?,
            timing_skew_vq: get_i8(map, "timing_skew_vq")?,
            drda_vi: get_u8(map, "drda_vi")?,
            drda_vq: get_u8(map, "drda_vq")?,
            isa_vi: get_u8(map, "isa_vi")?,
            isa_vq: get_u8(map, "isa_vq")?,
        })
    }

    /// Write the snapshot to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AdcResult<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        info!(path = %path.as_ref().display(), zdok = self.zdok, "register snapshot saved");
        Ok(())
    }

    /// Read and validate a snapshot file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AdcResult<Self> {
        let snapshot = Self::from_json(&fs::read_to_string(path.as_ref())?)?;
        info!(path = %path.as_ref().display(), zdok = snapshot.zdok, "register snapshot loaded");
        Ok(snapshot)
    }
}

type JsonMap = serde_json::Map<String, Value>;

fn get_f64(map: &JsonMap, field: &str) -> AdcResult<f64> {
    map[field].as_f64().ok_or_else(|| AdcError::FieldType {
        field: field.to_string(),
        expected: "a number",
    })
}

fn get_u16(map: &JsonMap, field: &str) -> AdcResult<u16> {
    map[field]
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| AdcError::FieldType {
            field: field.to_string(),
            expected: "an integer in 0..=65535",
        })
}

fn get_u8(map: &JsonMap, field: &str) -> AdcResult<u8> {
    map[field]
        .as_u64()
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| AdcError::FieldType {
            field: field.to_string(),
            expected: "an integer in 0..=255",
        })
}

fn get_i8(map: &JsonMap, field: &str) -> AdcResult<i8> {
    map[field]
        .as_i64()
        .and_then(|v| i8::try_from(v).ok())
        .ok_or_else(|| AdcError::FieldType {
            field: field.to_string(),
            expected: "an integer in -128..=127",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterSnapshot {
        RegisterSnapshot {
            zdok: 1,
            control: 0x70bc,
            offset_vi: -3.5,
            offset_vq: 12.25,
            analogue_gain_vi: 140,
            analogue_gain_vq: 117,
            gain_compensation_vi: 0,
            gain_compensation_vq: -20,
            timing_skew_vi: 5,
            timing_skew_vq: -2,
            drda_vi: 4,
            drda_vq: 4,
            isa_vi: 2,
            isa_vq: 2,
        }
    }

    #[test]
    fn test_json_round_trip() {
        let snap = sample();
        let text = snap.to_json().unwrap();
        assert_eq!(RegisterSnapshot::from_json(&text).unwrap(), snap);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let reordered = r#"{
            "isa_vq": 2, "isa_vi": 2, "drda_vq": 4, "drda_vi": 4,
            "timing_skew_vq": -2, "timing_skew_vi": 5,
            "gain_compensation_vq": -20, "gain_compensation_vi": 0,
            "analogue_gain_vq": 117, "analogue_gain_vi": 140,
            "offset_vq": 12.25, "offset_vi": -3.5,
            "control": 28860, "zdok": 1
        }"#;
        assert_eq!(RegisterSnapshot::from_json(reordered).unwrap(), sample());
    }

    #[test]
    fn test_missing_key_rejected() {
        let text = sample().to_json().unwrap();
        let mut doc: Value = serde_json::from_str(&text).unwrap();
        doc.as_object_mut().unwrap().remove("gain_compensation_vi");
        let err = RegisterSnapshot::from_json(&doc.to_string()).unwrap_err();
        match err {
            AdcError::IncompleteSnapshot(field) => assert_eq!(field, "gain_compensation_vi"),
            other => panic!("expected IncompleteSnapshot, got {other}"),
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = sample().to_json().unwrap();
        let mut doc: Value = serde_json::from_str(&text).unwrap();
        doc.as_object_mut()
            .unwrap()
            .insert("fisda_v".to_string(), Value::from(3));
        let err = RegisterSnapshot::from_json(&doc.to_string()).unwrap_err();
        match err {
            AdcError::UnknownField(field) => assert_eq!(field, "fisda_v"),
            other => panic!("expected UnknownField, got {other}"),
        }
    }

    #[test]
    fn test_wrong_value_shape_rejected() {
        let text = sample().to_json().unwrap();
        let mut doc: Value = serde_json::from_str(&text).unwrap();
        doc.as_object_mut()
            .unwrap()
            .insert("analogue_gain_vi".to_string(), Value::from(-7));
        assert!(matches!(
            RegisterSnapshot::from_json(&doc.to_string()),
            Err(AdcError::FieldType { .. })
        ));

        doc.as_object_mut()
            .unwrap()
            .insert("analogue_gain_vi".to_string(), Value::from("loud"));
        assert!(matches!(
            RegisterSnapshot::from_json(&doc.to_string()),
            Err(AdcError::FieldType { .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join("iqcal_registers_test.json");
        let snap = sample();
        snap.save_to_file(&path).unwrap();
        let loaded = RegisterSnapshot::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, snap);
    }
}
