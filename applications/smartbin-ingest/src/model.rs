use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Longest value accepted by the VARCHAR(20) status columns.
pub const MAX_TEXT_LEN: usize = 20;

/// The stored bin properties, excluding the `bin_id` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
    Latitude,
    Longitude,
    CollectionFrequencyPerMonth,
    AverageCollectionTimeDays,
    TiltStatus,
    FillLevelPercentage,
    TemperatureCelsius,
    Displacement,
    DaysSinceLastEmptied,
    CommunicationStatus,
    BatteryLevelPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Decimal,
    Integer,
    Text,
}

impl Property {
    pub const ALL: [Property; 11] = [
        Property::Latitude,
        Property::Longitude,
        Property::CollectionFrequencyPerMonth,
        Property::AverageCollectionTimeDays,
        Property::TiltStatus,
        Property::FillLevelPercentage,
        Property::TemperatureCelsius,
        Property::Displacement,
        Property::DaysSinceLastEmptied,
        Property::CommunicationStatus,
        Property::BatteryLevelPercentage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::Latitude => "latitude",
            Property::Longitude => "longitude",
            Property::CollectionFrequencyPerMonth => "collection_frequency_per_month",
            Property::AverageCollectionTimeDays => "average_collection_time_days",
            Property::TiltStatus => "tilt_status",
            Property::FillLevelPercentage => "fill_level_percentage",
            Property::TemperatureCelsius => "temperature_celsius",
            Property::Displacement => "displacement",
            Property::DaysSinceLastEmptied => "days_since_last_emptied",
            Property::CommunicationStatus => "communication_status",
            Property::BatteryLevelPercentage => "battery_level_percentage",
        }
    }

    pub fn from_name(name: &str) -> Option<Property> {
        Property::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Property::Latitude
            | Property::Longitude
            | Property::FillLevelPercentage
            | Property::TemperatureCelsius
            | Property::BatteryLevelPercentage => ColumnKind::Decimal,
            Property::CollectionFrequencyPerMonth
            | Property::AverageCollectionTimeDays
            | Property::DaysSinceLastEmptied => ColumnKind::Integer,
            Property::TiltStatus | Property::Displacement | Property::CommunicationStatus => {
                ColumnKind::Text
            }
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property value bound to its column type. `None` clears the column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Decimal(Option<f64>),
    Integer(Option<i32>),
    Text(Option<String>),
}

impl FieldValue {
    /// Bind a JSON value to the column type of `prop`.
    pub fn from_json(prop: Property, v: &Value) -> Result<FieldValue, AppError> {
        let invalid = |why: &str| {
            AppError::Persistence(format!("{} cannot store {}: {}", prop, v, why))
        };
        if v.is_null() {
            return Ok(match prop.kind() {
                ColumnKind::Decimal => FieldValue::Decimal(None),
                ColumnKind::Integer => FieldValue::Integer(None),
                ColumnKind::Text => FieldValue::Text(None),
            });
        }
        match prop.kind() {
            ColumnKind::Decimal => {
                let f = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid("expected a decimal"))?;
                Ok(FieldValue::Decimal(Some(f)))
            }
            ColumnKind::Integer => {
                let i = match v {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0)
                            .map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| invalid("expected an integer"))?;
                let i = i32::try_from(i).map_err(|_| invalid("integer out of range"))?;
                Ok(FieldValue::Integer(Some(i)))
            }
            ColumnKind::Text => {
                let s = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(invalid("expected text")),
                };
                if s.chars().count() > MAX_TEXT_LEN {
                    return Err(invalid("longer than 20 characters"));
                }
                Ok(FieldValue::Text(Some(s)))
            }
        }
    }
}

/// An accepted reading: a bin id plus the recognized properties the message
/// reported, values as they arrived (range-checked ones already coerced).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub bin_id: String,
    pub fields: BTreeMap<Property, Value>,
}

/// The column-typed change set for one upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct BinPatch {
    pub bin_id: String,
    pub fields: BTreeMap<Property, FieldValue>,
}

impl BinPatch {
    pub fn new(bin_id: impl Into<String>) -> Self {
        Self {
            bin_id: bin_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, prop: Property, value: FieldValue) -> Self {
        self.fields.insert(prop, value);
        self
    }
}

impl TryFrom<&Reading> for BinPatch {
    type Error = AppError;

    fn try_from(reading: &Reading) -> Result<Self, Self::Error> {
        let fields = reading
            .fields
            .iter()
            .map(|(prop, v)| FieldValue::from_json(*prop, v).map(|fv| (*prop, fv)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(BinPatch {
            bin_id: reading.bin_id.clone(),
            fields,
        })
    }
}

/// Current state of one bin, as stored and as served over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BinRecord {
    pub bin_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub collection_frequency_per_month: Option<i32>,
    pub average_collection_time_days: Option<i32>,
    pub tilt_status: Option<String>,
    pub fill_level_percentage: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub displacement: Option<String>,
    pub days_since_last_emptied: Option<i32>,
    pub communication_status: Option<String>,
    pub battery_level_percentage: Option<f64>,
}

impl BinRecord {
    pub fn new(bin_id: impl Into<String>) -> Self {
        Self {
            bin_id: bin_id.into(),
            latitude: None,
            longitude: None,
            collection_frequency_per_month: None,
            average_collection_time_days: None,
            tilt_status: None,
            fill_level_percentage: None,
            temperature_celsius: None,
            displacement: None,
            days_since_last_emptied: None,
            communication_status: None,
            battery_level_percentage: None,
        }
    }

    /// Overwrite exactly the properties carried by `patch`; everything else
    /// keeps its current value.
    pub fn apply(&mut self, patch: &BinPatch) {
        for (prop, value) in &patch.fields {
            match (prop, value.clone()) {
                (Property::Latitude, FieldValue::Decimal(v)) => self.latitude = v,
                (Property::Longitude, FieldValue::Decimal(v)) => self.longitude = v,
                (Property::FillLevelPercentage, FieldValue::Decimal(v)) => {
                    self.fill_level_percentage = v
                }
                (Property::TemperatureCelsius, FieldValue::Decimal(v)) => {
                    self.temperature_celsius = v
                }
                (Property::BatteryLevelPercentage, FieldValue::Decimal(v)) => {
                    self.battery_level_percentage = v
                }
                (Property::CollectionFrequencyPerMonth, FieldValue::Integer(v)) => {
                    self.collection_frequency_per_month = v
                }
                (Property::AverageCollectionTimeDays, FieldValue::Integer(v)) => {
                    self.average_collection_time_days = v
                }
                (Property::DaysSinceLastEmptied, FieldValue::Integer(v)) => {
                    self.days_since_last_emptied = v
                }
                (Property::TiltStatus, FieldValue::Text(v)) => self.tilt_status = v,
                (Property::Displacement, FieldValue::Text(v)) => self.displacement = v,
                (Property::CommunicationStatus, FieldValue::Text(v)) => {
                    self.communication_status = v
                }
                (prop, value) => {
                    tracing::warn!(property = %prop, ?value, "value kind does not match column; ignored")
                }
            }
        }
    }
}
