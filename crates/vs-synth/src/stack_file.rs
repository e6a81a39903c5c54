use std::path::Path;

use serde::Deserialize;
use vs_infra::{Firmware, NetworkBinding, OrderedMap, VmDefaults, VmSpec};

use crate::error::{Result, SynthError};

/// YAML description of one stack: optional defaults plus the VMs to create.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    pub stack: String,
    #[serde(default)]
    pub defaults: VmDefaults,
    #[serde(default)]
    pub vms: Vec<VmEntry>,
}

/// One VM; unset fields come from the stack's defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmEntry {
    pub name: String,
    pub cpus: Option<u32>,
    pub memory: Option<u32>,
    pub disks: Option<OrderedMap<u32>>,
    pub networks: Option<OrderedMap<NetworkBinding>>,
    pub template: Option<String>,
    pub ssh_key: Option<String>,
    pub user_data: Option<String>,
    pub firmware: Option<Firmware>,
    pub datacenter: Option<String>,
    pub cluster: Option<String>,
    pub datastore: Option<String>,
}

impl VmEntry {
    pub fn into_spec(self, defaults: &VmDefaults) -> VmSpec {
        let mut spec = VmSpec::new(self.name, defaults);
        if let Some(cpus) = self.cpus {
            spec.cpu_count = cpus;
        }
        if let Some(memory) = self.memory {
            spec.memory_mb = memory;
        }
        if let Some(disks) = self.disks {
            spec.disks = disks;
        }
        if let Some(networks) = self.networks {
            spec.networks = networks;
        }
        if let Some(template) = self.template {
            spec.template_name = template;
        }
        if let Some(ssh_key) = self.ssh_key {
            spec.ssh_key = ssh_key;
        }
        if let Some(firmware) = self.firmware {
            spec.firmware = firmware;
        }
        if let Some(datacenter) = self.datacenter {
            spec.datacenter = datacenter;
        }
        if let Some(cluster) = self.cluster {
            spec.cluster = cluster;
        }
        if let Some(datastore) = self.datastore {
            spec.datastore = datastore;
        }
        spec.user_data_path = self.user_data;
        spec
    }
}

impl StackFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SynthError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| SynthError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve every entry against the stack defaults.
    pub fn into_specs(self) -> (String, Vec<VmSpec>) {
        let defaults = self.defaults;
        let specs = self
            .vms
            .into_iter()
            .map(|vm| vm.into_spec(&defaults))
            .collect();
        (self.stack, specs)
    }
}
