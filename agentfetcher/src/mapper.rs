use chrono::DateTime;
use serde_json::{json, Value};

use hstorage::models::{AttrMap, ChildSnapshot, Snapshot};

use crate::error::{AgentFetcherError, Result};
use crate::models::RawDevice;

/// Converts one raw device record into an engine snapshot.
///
/// A record without a device id, a tag without a key, or an interface
/// without a MAC cannot be keyed and is rejected as a whole.
pub fn device_to_snapshot(device: &RawDevice) -> Result<Snapshot> {
    let resource_id = device
        .device_id
        .clone()
        .ok_or(AgentFetcherError::MissingField("device_id"))?;

    let mut attrs = AttrMap::new();
    insert_opt(&mut attrs, "hostname", &device.hostname);
    insert_opt(&mut attrs, "platform", &device.platform);
    insert_opt(&mut attrs, "os_version", &device.os_version);
    insert_opt(&mut attrs, "agent_version", &device.agent_version);
    insert_opt(&mut attrs, "external_ip", &device.external_ip);
    if let Some(last_seen) = &device.last_seen {
        let parsed = DateTime::parse_from_rfc3339(last_seen).map_err(|err| {
            AgentFetcherError::ParseFailure(format!(
                "device '{resource_id}' has malformed last_seen '{last_seen}': {err}"
            ))
        })?;
        attrs.insert("last_seen".to_string(), json!(parsed.to_rfc3339()));
    }

    let mut tags = Vec::with_capacity(device.tags.len());
    for tag in &device.tags {
        let key = tag
            .key
            .clone()
            .ok_or(AgentFetcherError::MissingField("tag.key"))?;
        let mut tag_attrs = AttrMap::new();
        tag_attrs.insert("key".to_string(), Value::String(key));
        insert_opt(&mut tag_attrs, "value", &tag.value);
        tags.push(ChildSnapshot { attrs: tag_attrs });
    }

    let mut interfaces = Vec::with_capacity(device.interfaces.len());
    for interface in &device.interfaces {
        let mac = interface
            .mac
            .clone()
            .ok_or(AgentFetcherError::MissingField("interface.mac"))?;
        let mut if_attrs = AttrMap::new();
        if_attrs.insert("mac".to_string(), Value::String(mac));
        insert_opt(&mut if_attrs, "local_ip", &interface.local_ip);
        insert_opt(&mut if_attrs, "interface_alias", &interface.interface_alias);
        interfaces.push(ChildSnapshot { attrs: if_attrs });
    }

    Ok(Snapshot {
        resource_id,
        attrs,
        children: [
            ("tags".to_string(), tags),
            ("interfaces".to_string(), interfaces),
        ]
        .into_iter()
        .collect(),
    })
}

/// Maps a fetched page, skipping records that cannot be converted.
/// The skip policy is deliberate: a handful of malformed records from a
/// large multi-host listing should not abort the whole run, while
/// persistence failures later still do.
pub fn map_page(devices: &[RawDevice]) -> (Vec<Snapshot>, usize) {
    let mut snapshots = Vec::with_capacity(devices.len());
    let mut skipped = 0usize;
    for device in devices {
        match device_to_snapshot(device) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => {
                skipped += 1;
                log::warn!(
                    "Skipping unconvertible device record (id {:?}): {err}",
                    device.device_id
                );
            }
        }
    }
    (snapshots, skipped)
}

fn insert_opt(attrs: &mut AttrMap, field: &str, value: &Option<String>) {
    if let Some(value) = value {
        attrs.insert(field.to_string(), Value::String(value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawInterface, RawTag};

    fn sample_device() -> RawDevice {
        RawDevice {
            device_id: Some("dev-1".into()),
            hostname: Some("web-01".into()),
            platform: Some("linux".into()),
            os_version: Some("6.1".into()),
            agent_version: Some("7.3.0".into()),
            external_ip: Some("203.0.113.9".into()),
            last_seen: Some("2026-08-01T10:00:00+00:00".into()),
            tags: vec![RawTag {
                key: Some("env".into()),
                value: Some("prod".into()),
            }],
            interfaces: vec![RawInterface {
                mac: Some("aa:bb:cc:dd:ee:ff".into()),
                local_ip: Some("10.0.0.5".into()),
                interface_alias: None,
            }],
        }
    }

    #[test]
    fn maps_a_full_device() {
        let snapshot = device_to_snapshot(&sample_device()).unwrap();
        assert_eq!(snapshot.resource_id, "dev-1");
        assert_eq!(snapshot.attrs["hostname"], "web-01");
        assert_eq!(snapshot.children["tags"].len(), 1);
        assert_eq!(snapshot.children["interfaces"].len(), 1);
        assert_eq!(
            snapshot.children["interfaces"][0].attrs["mac"],
            "aa:bb:cc:dd:ee:ff"
        );
    }

    #[test]
    fn missing_device_id_is_rejected() {
        let mut device = sample_device();
        device.device_id = None;
        assert!(matches!(
            device_to_snapshot(&device),
            Err(AgentFetcherError::MissingField("device_id"))
        ));
    }

    #[test]
    fn keyless_tag_rejects_the_whole_record() {
        let mut device = sample_device();
        device.tags.push(RawTag {
            key: None,
            value: Some("orphan".into()),
        });
        assert!(device_to_snapshot(&device).is_err());
    }

    #[test]
    fn malformed_last_seen_is_rejected() {
        let mut device = sample_device();
        device.last_seen = Some("yesterday".into());
        assert!(matches!(
            device_to_snapshot(&device),
            Err(AgentFetcherError::ParseFailure(_))
        ));
    }

    #[test]
    fn map_page_skips_and_counts() {
        let mut bad = sample_device();
        bad.device_id = None;
        let (snapshots, skipped) = map_page(&[sample_device(), bad]);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(skipped, 1);
    }
}
