use crate::types::Value;

pub const DEFAULT_ICON: &str = "mdi:flash";

/// Strings the portal shows for "nothing" or "off".
const OFF_SENTINELS: &[&str] = &["off", "Aus", "--", "Label ist null"];
const ON_SENTINELS: &[&str] = &["Ein"];

/// Rows ending in this label always report a percentage.
const POWER_DEMAND_SUFFIX: &str = "power_demand";

const SHORT_NAMES: &[(&str, &str)] = &[
    ("pp_beginn", "party_beginn"),
    ("pp_ende", "party_ende"),
    ("pp_funktion", "party_funktion"),
    ("pp_raumsoll", "party_raumsoll"),
    ("aktraumsoll", "raumsolltemperatur"),
    ("u_beginn", "urlaub_beginn"),
    ("u_ende", "urlaub_ende"),
    ("u_funktion", "urlaub_funktion"),
    ("u_raumsoll", "urlaub_raumsoll"),
    ("ww-push", "warmwasser_push"),
    ("ww-program", "warmwasser_program"),
    ("aktwwsoll", "warmwassersolltemperatur"),
    ("leistung", "wärmeleistung"),
];

const TRANSLATIONS_EN: &[(&str, &str)] = &[
    ("außentemperatur", "outside_temperature"),
    ("aussentemperatur", "outside_temperature"),
    ("raumtemperatur", "room_temperature"),
    ("warmwassertemperatur", "hot_water_temperature"),
    ("betriebsart", "operation_mode"),
    ("vorlauftemperatur", "flow_temperature"),
    ("anlagendruck", "system_pressure"),
    ("kollektortemperatur", "collector_temperature"),
    ("wärmeleistung", "heat_output"),
    ("raumsolltemperatur", "room_setpoint_temperature"),
    ("warmwassersolltemperatur", "hot_water_setpoint_temperature"),
    ("warmwasser_push", "hot_water_push"),
];

/// Maps vendor unit spellings to canonical tokens. Unknown units pass through.
pub fn normalize_unit(unit: &str) -> String {
    let trimmed = unit.trim();
    let canonical = match trimmed.to_lowercase().as_str() {
        "" => "",
        "w" => "W",
        "kw" => "kW",
        "kwh" => "kWh",
        "kw (w)" => "W",
        "kw (w)h" => "Wh",
        "h" => "h",
        "hz" => "Hz",
        _ => {
            if let Some(prefix) = trimmed.strip_suffix("m3/h") {
                return format!("{prefix}m³/h");
            }
            return trimmed.to_string();
        }
    };
    canonical.to_string()
}

pub fn icon_for_unit(unit: &str) -> &'static str {
    match unit {
        "°C" => "mdi:thermometer",
        "%" => "mdi:percent",
        "bar" => "mdi:gauge",
        "h" => "mdi:timer-outline",
        _ => DEFAULT_ICON,
    }
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

fn sentinel(raw: &str) -> Option<f64> {
    if OFF_SENTINELS.contains(&raw) {
        Some(0.0)
    } else if ON_SENTINELS.contains(&raw) {
        Some(1.0)
    } else {
        None
    }
}

/// Parses a dashboard cell such as `"12,5 °C"` into value and unit.
pub fn parse_scraped_value(raw: &str) -> (Value, String) {
    let raw = raw.trim();
    if let Some(v) = sentinel(raw) {
        return (Value::Number(v), String::new());
    }

    let (number, unit) = match raw.split_once(' ') {
        Some((number, unit)) => (number, unit.trim()),
        None => (raw, ""),
    };
    if let Some(v) = sentinel(number) {
        return (Value::Number(v), normalize_unit(unit));
    }
    match parse_decimal(number) {
        Some(v) => (Value::Number(v), normalize_unit(unit)),
        None => (Value::Text(raw.to_string()), String::new()),
    }
}

/// Interprets the `StringValue` of an API reading.
pub fn parse_api_string(raw: &str) -> Value {
    let raw = raw.trim();
    if OFF_SENTINELS.contains(&raw) {
        return Value::Number(0.0);
    }
    match parse_decimal(raw) {
        Some(v) => Value::Number(v),
        None => Value::Text(raw.to_string()),
    }
}

/// `"Heat pump"` -> `"heat_pump"`, following the portal's header quirks.
pub fn section_key(header: &str) -> String {
    header
        .trim()
        .replace("/#", "")
        .replace("  ", "")
        .replace(" - ", "_")
        .replace("/*+/*", "_")
        .replace(' ', "_")
        .to_lowercase()
}

pub fn row_key(label: &str) -> String {
    label.trim().replace("  ", "").replace(' ', "_").to_lowercase()
}

pub fn scraped_unit(name: &str, unit: String) -> String {
    if name.ends_with(POWER_DEMAND_SUFFIX) {
        "%".to_string()
    } else {
        unit
    }
}

fn lookup<'a>(table: &'a [(&str, &str)], key: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Friendly name for an API parameter id, in the selected language.
pub fn friendly_name(parameter_id: &str, language: &str) -> String {
    let folded = parameter_id.trim().to_lowercase();
    let expanded = lookup(SHORT_NAMES, &folded).unwrap_or(folded.as_str());
    let translated = match language {
        "en" => lookup(TRANSLATIONS_EN, expanded),
        _ => None,
    };
    translated.unwrap_or(expanded).to_string()
}
