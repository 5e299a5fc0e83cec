use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Current value of a parameter. The portal reports numbers for most
/// parameters and free text for status fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Sensor,
    Number,
    Select,
    Switch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
            Platform::Number => "number",
            Platform::Select => "select",
            Platform::Switch => "switch",
        }
    }
}

/// Raw vendor `DataType` of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    /// `-1`: continuous numeric, written in half steps.
    Continuous,
    /// `0`: plain numeric value.
    Numeric,
    /// `1`: enumerated value.
    Enumerated,
    /// `2`: time program. Never exposed.
    Schedule,
    /// `3`: stepped numeric, written in whole steps.
    Stepped,
    Other(i64),
}

impl DataType {
    pub fn from_vendor(raw: i64) -> Self {
        match raw {
            -1 => DataType::Continuous,
            0 => DataType::Numeric,
            1 => DataType::Enumerated,
            2 => DataType::Schedule,
            3 => DataType::Stepped,
            other => DataType::Other(other),
        }
    }

    pub fn step(&self) -> f64 {
        match self {
            DataType::Stepped => 1.0,
            _ => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: f64,
    pub name: String,
}

/// Platform-specific part of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum EntityKind {
    Sensor,
    Number { min: f64, max: f64, step: f64 },
    Select { options: Vec<SelectOption> },
    Switch,
}

/// Module coordinates needed to write a parameter back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleAddress {
    pub index: i64,
    pub module_type: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub parameter_id: String,
    pub friendly_name: String,
    pub value: Value,
    pub unit: String,
    pub icon: &'static str,
    pub data_type: Option<DataType>,
    pub address: Option<ModuleAddress>,
    #[serde(flatten)]
    pub kind: EntityKind,
}

impl EntityRecord {
    pub fn platform(&self) -> Platform {
        match self.kind {
            EntityKind::Sensor => Platform::Sensor,
            EntityKind::Number { .. } => Platform::Number,
            EntityKind::Select { .. } => Platform::Select,
            EntityKind::Switch => Platform::Switch,
        }
    }

    pub fn is_writeable(&self) -> bool {
        !matches!(self.kind, EntityKind::Sensor)
    }

    /// Raw option values of a select, index-aligned with `option_names`.
    pub fn options(&self) -> Vec<f64> {
        match &self.kind {
            EntityKind::Select { options } => options.iter().map(|o| o.value).collect(),
            _ => Vec::new(),
        }
    }

    pub fn option_names(&self) -> Vec<&str> {
        match &self.kind {
            EntityKind::Select { options } => options.iter().map(|o| o.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Display name of the option matching the current value.
    pub fn current_option(&self) -> Option<&str> {
        let current = self.value.as_f64()?;
        match &self.kind {
            EntityKind::Select { options } => options
                .iter()
                .find(|o| o.value == current)
                .map(|o| o.name.as_str()),
            _ => None,
        }
    }
}

/// Vendor connection status value reported for a reachable device.
pub const CONNECTED: i64 = 0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub connection_status: i64,
    pub records: BTreeMap<String, EntityRecord>,
}

impl Device {
    pub fn new(id: impl Into<String>, connection_status: i64) -> Self {
        Self {
            id: id.into(),
            connection_status,
            records: BTreeMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == CONNECTED
    }

    pub fn record(&self, key: &str) -> Option<&EntityRecord> {
        self.records.get(key)
    }
}

/// Per-device mapping handed to consumers after each cycle.
pub type Snapshot = BTreeMap<String, Device>;

/// Events emitted when a cycle changes the snapshot.
#[derive(Debug, Clone)]
pub enum Event {
    RecordAdded { device_id: String, key: String, record: EntityRecord },
    ValueChanged { device_id: String, key: String, old: Value, new: Value },
    RecordRemoved { device_id: String, key: String },
    ConnectionChanged { device_id: String, connected: bool },
}
