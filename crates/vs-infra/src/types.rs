use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::net::IpAddr;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::VmDefaults;
use crate::{Error, Result};

// ── Ordered map ──────────────────────────────────────────────────────

/// String-keyed map that keeps insertion order and unique keys.
///
/// Disk unit numbers follow this order, so it must survive a round trip
/// through a stack file unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map with unique string keys")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if map.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key `{key}`")));
                    }
                    map.entries.push((key, value));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

// ── VM shape ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    Bios,
    #[default]
    Efi,
}

impl Firmware {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Efi => "efi",
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing for one guest interface. No static address means DHCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBinding {
    #[serde(rename = "interface")]
    pub interface_name: String,
    /// CIDR such as `10.102.11.111/24`. The literal `dhcp` is accepted as
    /// an explicit DHCP marker.
    #[serde(default, rename = "address", skip_serializing_if = "Option::is_none")]
    pub static_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, rename = "dns", skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,
}

impl NetworkBinding {
    pub fn dhcp(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            static_address: None,
            gateway: None,
            dns_servers: None,
        }
    }

    pub fn static_ip(interface_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            static_address: Some(address.into()),
            ..Self::dhcp(interface_name)
        }
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn with_dns<S: Into<String>>(mut self, servers: impl IntoIterator<Item = S>) -> Self {
        self.dns_servers = Some(servers.into_iter().map(Into::into).collect());
        self
    }

    /// The static CIDR, if this binding does not use DHCP.
    pub fn static_address(&self) -> Option<&str> {
        self.static_address
            .as_deref()
            .filter(|a| !a.eq_ignore_ascii_case("dhcp"))
    }

    pub fn is_dhcp(&self) -> bool {
        self.static_address().is_none()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.interface_name.trim().is_empty() {
            return Err("interface name is empty".into());
        }

        let Some(address) = self.static_address() else {
            if self.gateway.is_some() || self.dns_servers.as_ref().is_some_and(|d| !d.is_empty()) {
                return Err(format!(
                    "interface {} uses DHCP but sets a gateway or DNS servers",
                    self.interface_name
                ));
            }
            return Ok(());
        };

        parse_cidr(address)
            .map_err(|e| format!("interface {}: {e}", self.interface_name))?;

        if let Some(gateway) = &self.gateway {
            gateway.parse::<IpAddr>().map_err(|_| {
                format!("interface {}: invalid gateway `{gateway}`", self.interface_name)
            })?;
        }

        for server in self.dns_servers.iter().flatten() {
            server.parse::<IpAddr>().map_err(|_| {
                format!("interface {}: invalid DNS server `{server}`", self.interface_name)
            })?;
        }

        Ok(())
    }
}

fn parse_cidr(raw: &str) -> std::result::Result<(IpAddr, u8), String> {
    let (ip, prefix) = raw
        .split_once('/')
        .ok_or_else(|| format!("address `{raw}` is missing a prefix length"))?;
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| format!("address `{raw}` is not an IP address"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("address `{raw}` has an invalid prefix length"))?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("address `{raw}` has a prefix longer than {max}"));
    }
    Ok((ip, prefix))
}

/// Everything needed to declare one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmSpec {
    pub name: String,
    pub cpu_count: u32,
    pub memory_mb: u32,
    /// Label → size in GB. Position gives the disk's unit number.
    pub disks: OrderedMap<u32>,
    pub networks: OrderedMap<NetworkBinding>,
    pub template_name: String,
    /// Literal public key or path to one (`~` is expanded).
    pub ssh_key: String,
    pub user_data_path: Option<String>,
    pub firmware: Firmware,
    pub datacenter: String,
    pub cluster: String,
    pub datastore: String,
}

impl VmSpec {
    /// A VM with every field but the name taken from `defaults`.
    pub fn new(name: impl Into<String>, defaults: &VmDefaults) -> Self {
        Self {
            name: name.into(),
            cpu_count: defaults.cpus,
            memory_mb: defaults.memory,
            disks: defaults.disks.clone(),
            networks: defaults.networks.clone(),
            template_name: defaults.template.clone(),
            ssh_key: defaults.ssh_key.clone(),
            user_data_path: None,
            firmware: defaults.firmware,
            datacenter: defaults.datacenter.clone(),
            cluster: defaults.cluster.clone(),
            datastore: defaults.datastore.clone(),
        }
    }

    /// Check the shape invariants that can be verified without the platform.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidSpec {
            vm: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".into()));
        }
        if self.cpu_count == 0 {
            return Err(invalid("cpu count must be positive".into()));
        }
        if self.memory_mb == 0 {
            return Err(invalid("memory must be positive".into()));
        }
        if self.disks.is_empty() {
            return Err(invalid("at least one disk is required".into()));
        }
        if let Some((label, _)) = self.disks.iter().find(|(_, size)| **size == 0) {
            return Err(invalid(format!("disk {label} has zero size")));
        }
        if self.networks.is_empty() {
            return Err(invalid("at least one network is required".into()));
        }
        for (network, binding) in self.networks.iter() {
            binding
                .validate()
                .map_err(|e| invalid(format!("network {network}: {e}")))?;
        }
        for field in [
            ("template", &self.template_name),
            ("datacenter", &self.datacenter),
            ("cluster", &self.cluster),
            ("datastore", &self.datastore),
        ] {
            if field.1.trim().is_empty() {
                return Err(invalid(format!("{} name is empty", field.0)));
            }
        }
        Ok(())
    }
}

// ── Guest config payload ─────────────────────────────────────────────

pub const ENCODING_BASE64: &str = "base64";

/// Base64 guest configuration, ready to embed in the VM's extra config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGuestConfig {
    pub metadata_b64: String,
    pub metadata_encoding: &'static str,
    /// Empty when the VM has no user data.
    pub userdata_b64: String,
    pub userdata_encoding: &'static str,
}

impl EncodedGuestConfig {
    pub fn new(metadata_b64: String, userdata_b64: String) -> Self {
        Self {
            metadata_b64,
            metadata_encoding: ENCODING_BASE64,
            userdata_b64,
            userdata_encoding: ENCODING_BASE64,
        }
    }

    /// `guestinfo.*` keys read by the in-guest provisioning agent.
    pub fn extra_config(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("guestinfo.metadata".into(), self.metadata_b64.clone()),
            (
                "guestinfo.metadata.encoding".into(),
                self.metadata_encoding.into(),
            ),
            ("guestinfo.userdata".into(), self.userdata_b64.clone()),
            (
                "guestinfo.userdata.encoding".into(),
                self.userdata_encoding.into(),
            ),
        ])
    }
}
