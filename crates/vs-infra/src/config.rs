use std::fmt;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::types::{Firmware, NetworkBinding, OrderedMap};

/// vSphere endpoint credentials, read once per provisioning session.
///
/// Missing variables leave the field empty; the engine's own required-field
/// checks report them at plan time.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub user: String,
    pub password: String,
    pub server: String,
    pub allow_unverified_ssl: bool,
}

impl ProviderConfig {
    /// Create from env vars:
    ///
    /// - `VSPHERE_USER`
    /// - `VSPHERE_PASSWORD`
    /// - `VSPHERE_SERVER`
    /// - `VSPHERE_ALLOW_UNVERIFIED_SSL` (default: `true`)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ProviderConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let allow_unverified_ssl = match lookup("VSPHERE_ALLOW_UNVERIFIED_SSL") {
            None => true,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "VSPHERE_ALLOW_UNVERIFIED_SSL is not a boolean, using true");
                true
            }),
        };

        Self {
            user: lookup("VSPHERE_USER").unwrap_or_default(),
            password: lookup("VSPHERE_PASSWORD").unwrap_or_default(),
            server: lookup("VSPHERE_SERVER").unwrap_or_default(),
            allow_unverified_ssl,
        }
    }

    /// Attributes of the `provider "vsphere"` block.
    pub fn provider_block(&self) -> Value {
        json!({
            "user": self.user,
            "password": self.password,
            "vsphere_server": self.server,
            "allow_unverified_ssl": self.allow_unverified_ssl,
        })
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("allow_unverified_ssl", &self.allow_unverified_ssl)
            .finish()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Values a VM takes for every field the caller leaves unset.
///
/// Loaded once (built-ins, optionally overridden by a stack file) and passed
/// to [`crate::VmSpec::new`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmDefaults {
    pub datacenter: String,
    pub cluster: String,
    pub datastore: String,
    pub template: String,
    pub ssh_key: String,
    pub firmware: Firmware,
    pub cpus: u32,
    pub memory: u32,
    pub disks: OrderedMap<u32>,
    pub networks: OrderedMap<NetworkBinding>,
}

impl Default for VmDefaults {
    fn default() -> Self {
        Self {
            datacenter: "Datacenter".into(),
            cluster: "dell-cluster-1".into(),
            datastore: "nfs_default_1".into(),
            template: "rocky-9.2".into(),
            ssh_key: "~/.ssh/id_ed25519.pub".into(),
            firmware: Firmware::Efi,
            cpus: 1,
            memory: 512,
            disks: [("root", 20)].into_iter().collect(),
            networks: [("vm-lan-1", NetworkBinding::dhcp("ens192"))]
                .into_iter()
                .collect(),
        }
    }
}
