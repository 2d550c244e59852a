use crate::envelope::RawReading;
use crate::error::ValidationError;
use crate::model::{Property, Reading};
use serde_json::Value;
use std::collections::BTreeMap;

/// Properties that are range-checked and coerced to decimal when present.
const RANGES: [(Property, f64, f64); 3] = [
    (Property::FillLevelPercentage, 0.0, 100.0),
    (Property::BatteryLevelPercentage, 0.0, 100.0),
    (Property::TemperatureCelsius, -40.0, 85.0),
];

/// Check and normalize a decoded mapping.
///
/// Unknown keys are dropped. Recognized properties other than the three
/// range-checked ones pass through untouched.
pub fn validate(raw: &RawReading) -> Result<Reading, ValidationError> {
    let bin_id = bin_id(raw.get("bin_id"))?;

    let mut fields = BTreeMap::new();
    for (key, value) in raw {
        if let Some(prop) = Property::from_name(key) {
            fields.insert(prop, value.clone());
        }
    }

    for (prop, min, max) in RANGES {
        if let Some(value) = fields.get_mut(&prop) {
            let v = to_decimal(value).ok_or_else(|| ValidationError::NotANumber {
                field: prop.name(),
                value: value.clone(),
            })?;
            if !(min..=max).contains(&v) {
                return Err(ValidationError::OutOfRange {
                    field: prop.name(),
                    value: v,
                    min,
                    max,
                });
            }
            *value = Value::from(v);
        }
    }

    Ok(Reading { bin_id, fields })
}

fn bin_id(value: Option<&Value>) -> Result<String, ValidationError> {
    let id = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingBinId),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(ValidationError::InvalidBinId(other.clone())),
    };
    if id.is_empty() {
        return Err(ValidationError::EmptyBinId);
    }
    Ok(id)
}

fn to_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
