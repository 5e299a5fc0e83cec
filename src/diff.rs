use serde_json::Value;

use crate::types::{Event, Snapshot};

/// Collects leaf-level changes between two JSON documents as
/// `(dotted.path, old, new)`.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    let path = if path_prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{path_prefix}.{key}")
                    };
                    changes.push((path, prev_val.clone(), Value::Null));
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Events describing how `current` differs from `previous`.
pub(crate) fn diff_devices(previous: &Snapshot, current: &Snapshot) -> Vec<Event> {
    let mut events = Vec::new();
    for (device_id, device) in current {
        let prev = previous.get(device_id);
        let was_connected = prev.map(|d| d.is_connected());
        if was_connected != Some(device.is_connected()) {
            events.push(Event::ConnectionChanged {
                device_id: device_id.clone(),
                connected: device.is_connected(),
            });
        }

        for (key, record) in &device.records {
            match prev.and_then(|d| d.records.get(key)) {
                None => events.push(Event::RecordAdded {
                    device_id: device_id.clone(),
                    key: key.clone(),
                    record: record.clone(),
                }),
                Some(old) if old.value != record.value => events.push(Event::ValueChanged {
                    device_id: device_id.clone(),
                    key: key.clone(),
                    old: old.value.clone(),
                    new: record.value.clone(),
                }),
                Some(_) => {}
            }
        }

        if let Some(prev) = prev {
            for key in prev.records.keys().filter(|k| !device.records.contains_key(*k)) {
                events.push(Event::RecordRemoved {
                    device_id: device_id.clone(),
                    key: key.clone(),
                });
            }
        }
    }

    for (device_id, device) in previous {
        if current.contains_key(device_id) {
            continue;
        }
        for key in device.records.keys() {
            events.push(Event::RecordRemoved {
                device_id: device_id.clone(),
                key: key.clone(),
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, EntityKind, EntityRecord, Value as RecordValue};
    use serde_json::json;

    fn sensor(value: f64) -> EntityRecord {
        EntityRecord {
            parameter_id: "heat_pump-outside_oat".into(),
            friendly_name: "heat_pump-outside_oat".into(),
            value: RecordValue::Number(value),
            unit: "°C".into(),
            icon: "mdi:thermometer",
            data_type: None,
            address: None,
            kind: EntityKind::Sensor,
        }
    }

    fn snapshot(records: &[(&str, f64)], status: i64) -> Snapshot {
        let mut device = Device::new("42", status);
        for (key, value) in records {
            device.records.insert(key.to_string(), sensor(*value));
        }
        Snapshot::from([("42".to_string(), device)])
    }

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"42": {"records": {"outside": 4.5}}});
        let curr = json!({"42": {"records": {"outside": 5.0}}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "42.records.outside");
        assert_eq!(changes[0].1, json!(4.5));
        assert_eq!(changes[0].2, json!(5.0));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"42": {"records": {"outside": 4.5, "flow": 31.0}}});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_and_removed_keys() {
        let prev = json!({"records": {"flow": 31.0}});
        let curr = json!({"records": {"outside": 4.5}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], ("records.outside".to_string(), json!(null), json!(4.5)));
        assert_eq!(changes[1], ("records.flow".to_string(), json!(31.0), json!(null)));
    }

    #[test]
    fn first_snapshot_adds_everything() {
        let events = diff_devices(&Snapshot::new(), &snapshot(&[("a", 1.0), ("b", 2.0)], 0));
        assert!(matches!(
            events[0],
            Event::ConnectionChanged { connected: true, .. }
        ));
        let added = events
            .iter()
            .filter(|e| matches!(e, Event::RecordAdded { .. }))
            .count();
        assert_eq!(added, 2);
    }

    #[test]
    fn value_changes_and_removals() {
        let prev = snapshot(&[("a", 1.0), ("b", 2.0)], 0);
        let curr = snapshot(&[("a", 1.5)], 0);
        let events = diff_devices(&prev, &curr);
        assert_eq!(events.len(), 2);
        match &events[0] {
            Event::ValueChanged { key, old, new, .. } => {
                assert_eq!(key, "a");
                assert_eq!(*old, RecordValue::Number(1.0));
                assert_eq!(*new, RecordValue::Number(1.5));
            }
            other => panic!("expected ValueChanged, got {other:?}"),
        }
        assert!(matches!(&events[1], Event::RecordRemoved { key, .. } if key == "b"));
    }

    #[test]
    fn connection_flip_is_reported() {
        let prev = snapshot(&[("a", 1.0)], 0);
        let curr = snapshot(&[("a", 1.0)], 1);
        let events = diff_devices(&prev, &curr);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Event::ConnectionChanged { connected: false, .. }
        ));
    }

    #[test]
    fn unchanged_snapshot_is_quiet() {
        let snap = snapshot(&[("a", 1.0)], 0);
        assert!(diff_devices(&snap, &snap).is_empty());
    }
}
