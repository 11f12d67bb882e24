use serde::Deserialize;

/// Raw device record as returned by the agent inventory API. Everything is
/// optional at the wire level; the mapper decides what a usable snapshot
/// requires.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDevice {
    pub device_id: Option<String>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub external_ip: Option<String>,
    pub last_seen: Option<String>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub interfaces: Vec<RawInterface>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInterface {
    pub mac: Option<String>,
    pub local_ip: Option<String>,
    pub interface_alias: Option<String>,
}

/// One page of the device listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicePage {
    #[serde(default)]
    pub devices: Vec<RawDevice>,
    pub next_cursor: Option<String>,
}
