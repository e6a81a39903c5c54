//! Assembles the lookups and the `vsphere_virtual_machine` resource for a VM.

use serde_json::json;
use tf_graph::{
    Address, Changeset, Declaration, Handle, Output, ResourceGraph, Stack, block_label,
};
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::guest_config::{GuestConfigService, TemplateRenderer};
use crate::types::{EncodedGuestConfig, NetworkBinding, OrderedMap, VmSpec};
use crate::vsphere::{self, CloneSpec, Disk, Lifecycle, NetworkInterface, VirtualMachine};
use crate::{Error, Result};

/// A VM that made it into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResource {
    pub name: String,
    pub handle: Handle,
    /// Name of the output carrying the VM's IP address.
    pub ip_output: String,
}

/// Handles of the named objects one VM is placed against.
struct ResolvedDependencies {
    cluster: Handle,
    datastore: Handle,
    networks: Vec<Handle>,
    template: Handle,
}

impl ResolvedDependencies {
    fn handles(&self) -> impl Iterator<Item = &Handle> {
        [&self.cluster, &self.datastore]
            .into_iter()
            .chain(self.networks.iter())
            .chain(std::iter::once(&self.template))
    }
}

// ── Pure building blocks ─────────────────────────────────────────────

/// Name of the output exposing a VM's IP address.
pub fn ip_output_name(vm_name: &str) -> String {
    format!("{}_vm_ip", block_label(&[vm_name]))
}

pub fn datacenter_lookup(name: &str) -> Result<Declaration> {
    Ok(Declaration::from_serialize(
        Address::data(vsphere::DATACENTER, name),
        &vsphere::DatacenterLookup { name },
    )?)
}

/// Lookup of `name` scoped to `datacenter`.
///
/// Two VMs naming the same object in the same datacenter get the same
/// address, and therefore share one lookup.
pub fn scoped_lookup(
    kind: &str,
    datacenter_name: &str,
    datacenter: &Handle,
    name: &str,
) -> Result<Declaration> {
    let lookup = vsphere::ScopedLookup {
        name,
        datacenter_id: datacenter.id(),
    };
    Ok(Declaration::from_serialize(
        Address::data_in(kind, datacenter_name, name),
        &lookup,
    )?
    .depends_on([datacenter]))
}

/// One network lookup per network name, in binding order.
pub fn network_lookups(
    datacenter_name: &str,
    datacenter: &Handle,
    networks: &OrderedMap<NetworkBinding>,
) -> Result<Vec<(String, Declaration)>> {
    networks
        .keys()
        .map(|network| {
            scoped_lookup(vsphere::NETWORK, datacenter_name, datacenter, network)
                .map(|decl| (network.to_string(), decl))
        })
        .collect()
}

/// Disk descriptors; unit numbers follow the disks' insertion order.
pub fn disk_descriptors(disks: &OrderedMap<u32>) -> Vec<Disk> {
    disks
        .iter()
        .zip(0u32..)
        .map(|((label, &size), unit_number)| Disk {
            label: label.to_string(),
            size,
            unit_number,
            thin_provisioned: true,
        })
        .collect()
}

fn virtual_machine(
    spec: &VmSpec,
    deps: &ResolvedDependencies,
    guest: &EncodedGuestConfig,
) -> VirtualMachine {
    VirtualMachine {
        name: spec.name.clone(),
        resource_pool_id: deps.cluster.attr("resource_pool_id"),
        datastore_id: deps.datastore.id(),
        num_cpus: spec.cpu_count,
        memory: spec.memory_mb,
        guest_id: deps.template.attr("guest_id"),
        firmware: spec.firmware.to_string(),
        disk: disk_descriptors(&spec.disks),
        network_interface: deps
            .networks
            .iter()
            .map(|network| NetworkInterface {
                network_id: network.id(),
            })
            .collect(),
        clone: CloneSpec {
            template_uuid: deps.template.id(),
        },
        extra_config: guest.extra_config(),
        lifecycle: Lifecycle {
            ignore_changes: vsphere::PLATFORM_MANAGED_ATTRIBUTES
                .iter()
                .map(|a| a.to_string())
                .collect(),
        },
    }
}

// ── Composition ──────────────────────────────────────────────────────

/// Declare everything one VM needs on `graph`.
///
/// The VM is validated and the guest configuration built first. All
/// declarations and the IP output then go to the graph as one changeset,
/// so a failing VM leaves nothing behind.
pub fn compose_vm<G, R>(
    graph: &mut G,
    spec: &VmSpec,
    guest: &GuestConfigService<R>,
) -> Result<VmResource>
where
    G: ResourceGraph,
    R: TemplateRenderer,
{
    spec.validate()?;
    let guest_config = guest.build_guest_config(spec)?;

    let mut changes = Changeset::new();
    let datacenter = changes.declare(datacenter_lookup(&spec.datacenter)?);
    let cluster = changes.declare(scoped_lookup(
        vsphere::COMPUTE_CLUSTER,
        &spec.datacenter,
        &datacenter,
        &spec.cluster,
    )?);
    let datastore = changes.declare(scoped_lookup(
        vsphere::DATASTORE,
        &spec.datacenter,
        &datacenter,
        &spec.datastore,
    )?);
    let networks = network_lookups(&spec.datacenter, &datacenter, &spec.networks)?
        .into_iter()
        .map(|(_, decl)| changes.declare(decl))
        .collect();
    let template = changes.declare(scoped_lookup(
        vsphere::TEMPLATE,
        &spec.datacenter,
        &datacenter,
        &spec.template_name,
    )?);

    let deps = ResolvedDependencies {
        cluster,
        datastore,
        networks,
        template,
    };

    let vm = virtual_machine(spec, &deps, &guest_config);
    let handle = changes.declare(
        Declaration::from_serialize(Address::managed(vsphere::VIRTUAL_MACHINE, &spec.name), &vm)?
            .depends_on(deps.handles()),
    );

    let ip_output = ip_output_name(&spec.name);
    changes.output(
        ip_output.clone(),
        Output {
            value: json!(handle.attr("default_ip_address")),
            description: Some(format!("IP address of {}", spec.name)),
        },
    );

    graph.apply(changes)?;

    info!(
        vm = %spec.name,
        address = %handle.address(),
        disks = spec.disks.len(),
        networks = spec.networks.len(),
        "compose: vm declared"
    );

    Ok(VmResource {
        name: spec.name.clone(),
        handle,
        ip_output,
    })
}

/// A VM that could not be composed.
#[derive(Debug)]
pub struct VmFailure {
    pub vm: String,
    pub error: Error,
}

/// Result of composing a whole stack.
#[derive(Debug)]
pub struct StackOutcome {
    pub stack: Stack,
    pub composed: Vec<VmResource>,
    pub failures: Vec<VmFailure>,
}

impl StackOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compose every VM into a fresh stack configured for `provider`.
///
/// A VM that fails is reported in [`StackOutcome::failures`] and does not
/// affect the others.
pub fn compose_stack<R: TemplateRenderer>(
    name: &str,
    provider: &ProviderConfig,
    vms: &[VmSpec],
    guest: &GuestConfigService<R>,
) -> StackOutcome {
    let mut stack = Stack::new(name);
    stack.require_provider(
        vsphere::PROVIDER,
        vsphere::PROVIDER_SOURCE,
        vsphere::PROVIDER_VERSION,
    );
    stack.configure_provider(vsphere::PROVIDER, provider.provider_block());

    let mut composed = Vec::new();
    let mut failures = Vec::new();

    for spec in vms {
        match compose_vm(&mut stack, spec, guest) {
            Ok(vm) => composed.push(vm),
            Err(error) => {
                warn!(vm = %spec.name, %error, "compose: vm skipped");
                failures.push(VmFailure {
                    vm: spec.name.clone(),
                    error,
                });
            }
        }
    }

    info!(
        stack = name,
        composed = composed.len(),
        failed = failures.len(),
        declarations = stack.declarations().len(),
        "compose: stack done"
    );

    StackOutcome {
        stack,
        composed,
        failures,
    }
}
