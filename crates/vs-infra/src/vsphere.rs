//! Block kinds and attribute shapes of the `hashicorp/vsphere` provider.

use std::collections::BTreeMap;

use serde::Serialize;

pub const PROVIDER: &str = "vsphere";
pub const PROVIDER_SOURCE: &str = "hashicorp/vsphere";
pub const PROVIDER_VERSION: &str = "~> 2.6";

pub const DATACENTER: &str = "vsphere_datacenter";
pub const COMPUTE_CLUSTER: &str = "vsphere_compute_cluster";
pub const DATASTORE: &str = "vsphere_datastore";
pub const NETWORK: &str = "vsphere_network";
pub const TEMPLATE: &str = "vsphere_virtual_machine";
pub const VIRTUAL_MACHINE: &str = "vsphere_virtual_machine";

/// Attributes the platform rewrites on its own after the VM is created.
pub const PLATFORM_MANAGED_ATTRIBUTES: [&str; 2] = ["hv_mode", "ept_rvi_mode"];

// ── Lookups ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DatacenterLookup<'a> {
    pub name: &'a str,
}

/// Any lookup resolved by name inside a datacenter.
#[derive(Debug, Clone, Serialize)]
pub struct ScopedLookup<'a> {
    pub name: &'a str,
    pub datacenter_id: String,
}

// ── Virtual machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualMachine {
    pub name: String,
    pub resource_pool_id: String,
    pub datastore_id: String,
    pub num_cpus: u32,
    pub memory: u32,
    pub guest_id: String,
    pub firmware: String,
    pub disk: Vec<Disk>,
    pub network_interface: Vec<NetworkInterface>,
    pub clone: CloneSpec,
    pub extra_config: BTreeMap<String, String>,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub label: String,
    /// GB.
    pub size: u32,
    pub unit_number: u32,
    pub thin_provisioned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub network_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneSpec {
    pub template_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    pub ignore_changes: Vec<String>,
}
