use std::fs;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tempfile::TempDir;
use tf_graph::{Address, Changeset, Declaration, Handle, Mode, Output, ResourceGraph, Stack};
use vs_infra::{
    Error, GuestConfigService, KeyOrigin, NetworkBinding, OrderedMap, ProviderConfig, VmDefaults,
    VmSpec, compose_stack, compose_vm,
};

const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBx7u2gTestOnlyKeyMaterial0000000000000 ops@bastion";

fn service() -> GuestConfigService {
    GuestConfigService::with_builtin_template().unwrap()
}

fn provider() -> ProviderConfig {
    ProviderConfig {
        user: "administrator@vsphere.local".into(),
        password: "secret".into(),
        server: "vcenter.lab".into(),
        allow_unverified_ssl: true,
    }
}

fn spec(name: &str) -> VmSpec {
    let mut spec = VmSpec::new(name, &VmDefaults::default());
    spec.ssh_key = KEY.to_string();
    spec
}

fn vm_block<'a>(doc: &'a Value, name: &str) -> &'a Value {
    &doc["resource"]["vsphere_virtual_machine"][name]
}

#[test]
fn single_vm_end_to_end() {
    let outcome = compose_stack("stack-1", &provider(), &[spec("my-vm-1")], &service());
    assert!(outcome.is_success());

    let stack = &outcome.stack;
    assert_eq!(stack.count(Mode::Data, "vsphere_datacenter"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_compute_cluster"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_datastore"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_network"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_virtual_machine"), 1);
    assert_eq!(stack.count(Mode::Managed, "vsphere_virtual_machine"), 1);
    assert_eq!(stack.declarations().len(), 6);

    assert_eq!(outcome.composed.len(), 1);
    assert_eq!(outcome.composed[0].ip_output, "my-vm-1_vm_ip");
    assert_eq!(
        stack.outputs().keys().collect::<Vec<_>>(),
        ["my-vm-1_vm_ip"]
    );

    let doc = stack.synth();
    assert_eq!(
        doc["output"]["my-vm-1_vm_ip"]["value"],
        "${vsphere_virtual_machine.my-vm-1.default_ip_address}"
    );
    assert_eq!(doc["provider"]["vsphere"][0]["vsphere_server"], "vcenter.lab");
    assert_eq!(
        doc["terraform"]["required_providers"]["vsphere"]["source"],
        "hashicorp/vsphere"
    );
}

#[test]
fn vm_resource_wires_every_dependency() {
    let outcome = compose_stack("stack-1", &provider(), &[spec("my-vm-1")], &service());
    let doc = outcome.stack.synth();
    let vm = vm_block(&doc, "my-vm-1");

    assert_eq!(vm["name"], "my-vm-1");
    assert_eq!(vm["num_cpus"], 1);
    assert_eq!(vm["memory"], 512);
    assert_eq!(vm["firmware"], "efi");
    assert_eq!(
        vm["resource_pool_id"],
        "${data.vsphere_compute_cluster.Datacenter_dell-cluster-1.resource_pool_id}"
    );
    assert_eq!(
        vm["datastore_id"],
        "${data.vsphere_datastore.Datacenter_nfs_default_1.id}"
    );
    assert_eq!(
        vm["guest_id"],
        "${data.vsphere_virtual_machine.Datacenter_rocky-9_2_999bb3d0.guest_id}"
    );
    assert_eq!(
        vm["clone"]["template_uuid"],
        "${data.vsphere_virtual_machine.Datacenter_rocky-9_2_999bb3d0.id}"
    );
    assert_eq!(
        vm["network_interface"],
        json!([{ "network_id": "${data.vsphere_network.Datacenter_vm-lan-1.id}" }])
    );
    assert_eq!(
        vm["disk"],
        json!([{ "label": "root", "size": 20, "unit_number": 0, "thin_provisioned": true }])
    );
    assert_eq!(
        vm["lifecycle"]["ignore_changes"],
        json!(["hv_mode", "ept_rvi_mode"])
    );

    let extra = &vm["extra_config"];
    assert_eq!(extra["guestinfo.metadata.encoding"], "base64");
    assert_eq!(extra["guestinfo.userdata"], "");
    assert_eq!(extra["guestinfo.userdata.encoding"], "base64");
    let metadata = BASE64
        .decode(extra["guestinfo.metadata"].as_str().unwrap())
        .unwrap();
    let metadata = String::from_utf8(metadata).unwrap();
    assert!(metadata.contains("local-hostname: \"my-vm-1\""));
    assert!(metadata.contains(KEY));

    let template = &doc["data"]["vsphere_virtual_machine"]["Datacenter_rocky-9_2_999bb3d0"];
    assert_eq!(template["name"], "rocky-9.2");
    assert_eq!(
        template["datacenter_id"],
        "${data.vsphere_datacenter.Datacenter.id}"
    );
}

#[test]
fn vm_depends_on_its_lookups() {
    let outcome = compose_stack("stack-1", &provider(), &[spec("my-vm-1")], &service());
    let vm = Address::managed("vsphere_virtual_machine", "my-vm-1");
    let deps: Vec<String> = outcome
        .stack
        .dependencies_of(&vm)
        .iter()
        .map(ToString::to_string)
        .collect();

    assert_eq!(
        deps,
        [
            "data.vsphere_compute_cluster.Datacenter_dell-cluster-1",
            "data.vsphere_datastore.Datacenter_nfs_default_1",
            "data.vsphere_network.Datacenter_vm-lan-1",
            "data.vsphere_virtual_machine.Datacenter_rocky-9_2_999bb3d0",
        ]
    );
}

#[test]
fn shared_cluster_is_declared_once() {
    let mut second = spec("my-vm-2");
    second.cpu_count = 2;
    second.memory_mb = 4096;

    let outcome = compose_stack("stack-1", &provider(), &[spec("my-vm-1"), second], &service());
    assert!(outcome.is_success());

    let stack = &outcome.stack;
    assert_eq!(stack.count(Mode::Data, "vsphere_compute_cluster"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_datacenter"), 1);
    assert_eq!(stack.count(Mode::Data, "vsphere_network"), 1);
    assert_eq!(stack.count(Mode::Managed, "vsphere_virtual_machine"), 2);

    let cluster = Address::data_in("vsphere_compute_cluster", "Datacenter", "dell-cluster-1");
    let dependents: Vec<String> = stack
        .dependents_of(&cluster)
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        dependents,
        [
            "vsphere_virtual_machine.my-vm-1",
            "vsphere_virtual_machine.my-vm-2",
        ]
    );
}

#[test]
fn distinct_networks_get_their_own_lookup() {
    let mut first = spec("my-vm-1");
    first
        .networks
        .insert("vm-lan-2", NetworkBinding::dhcp("ens224"));
    let mut second = spec("my-vm-2");
    second.networks.insert(
        "vm-lan-1",
        NetworkBinding::static_ip("ens192", "10.102.11.111/24"),
    );

    let outcome = compose_stack("stack-1", &provider(), &[first, second], &service());
    assert!(outcome.is_success());
    assert_eq!(outcome.stack.count(Mode::Data, "vsphere_network"), 2);

    let doc = outcome.stack.synth();
    assert_eq!(
        vm_block(&doc, "my-vm-1")["network_interface"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn disk_unit_numbers_follow_spec_order() {
    let mut vm = spec("my-vm-2");
    vm.disks = [("data", 40), ("root", 30)].into_iter().collect();

    let outcome = compose_stack("stack-1", &provider(), &[vm], &service());
    let doc = outcome.stack.synth();
    let disks = &vm_block(&doc, "my-vm-2")["disk"];

    assert_eq!(disks[0]["label"], "data");
    assert_eq!(disks[0]["unit_number"], 0);
    assert_eq!(disks[1]["label"], "root");
    assert_eq!(disks[1]["unit_number"], 1);
}

#[test]
fn user_data_is_embedded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("userdata.yaml");
    fs::write(&path, "#cloud-config\npackages: [htop]\n").unwrap();

    let mut vm = spec("my-vm-2");
    vm.user_data_path = Some(path.to_str().unwrap().to_string());

    let outcome = compose_stack("stack-1", &provider(), &[vm], &service());
    let doc = outcome.stack.synth();
    let encoded = vm_block(&doc, "my-vm-2")["extra_config"]["guestinfo.userdata"]
        .as_str()
        .unwrap()
        .to_string();

    assert_eq!(
        BASE64.decode(encoded).unwrap(),
        b"#cloud-config\npackages: [htop]"
    );
}

#[test]
fn guest_config_failure_declares_nothing() {
    let mut vm = spec("my-vm-1");
    vm.ssh_key = String::new();

    let mut stack = Stack::new("stack-1");
    let err = compose_vm(&mut stack, &vm, &service()).unwrap_err();

    assert!(matches!(err, Error::InvalidKeyFormat(KeyOrigin::Direct)));
    assert!(stack.declarations().is_empty());
    assert!(stack.outputs().is_empty());
}

#[test]
fn invalid_spec_declares_nothing() {
    let mut vm = spec("my-vm-1");
    vm.disks = Default::default();

    let mut stack = Stack::new("stack-1");
    let err = compose_vm(&mut stack, &vm, &service()).unwrap_err();

    assert!(matches!(err, Error::InvalidSpec { .. }));
    assert!(stack.declarations().is_empty());
}

#[test]
fn failing_vm_does_not_affect_others() {
    let mut broken = spec("broken");
    broken.user_data_path = Some("/nonexistent/userdata.yaml".into());

    let outcome = compose_stack(
        "stack-1",
        &provider(),
        &[broken, spec("my-vm-1")],
        &service(),
    );

    assert!(!outcome.is_success());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].vm, "broken");
    assert!(matches!(outcome.failures[0].error, Error::FileNotFound(_)));

    assert_eq!(outcome.composed.len(), 1);
    let stack = &outcome.stack;
    assert!(stack
        .get(&Address::managed("vsphere_virtual_machine", "broken"))
        .is_none());
    assert!(stack
        .get(&Address::managed("vsphere_virtual_machine", "my-vm-1"))
        .is_some());
    assert_eq!(stack.outputs().len(), 1);
}

#[test]
fn duplicate_vm_names_are_rejected_by_the_graph() {
    let outcome = compose_stack(
        "stack-1",
        &provider(),
        &[spec("my-vm-1"), spec("my-vm-1")],
        &service(),
    );

    assert_eq!(outcome.composed.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        Error::Graph(tf_graph::Error::DuplicateAddress(_))
    ));
    assert_eq!(outcome.stack.count(Mode::Managed, "vsphere_virtual_machine"), 1);
}

#[test]
fn rejected_vm_leaves_no_lookups_behind() {
    let mut again = spec("dup");
    again.cluster = "other-cluster".into();

    let outcome = compose_stack("stack-1", &provider(), &[spec("dup"), again], &service());

    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        Error::Graph(tf_graph::Error::DuplicateAddress(_))
    ));
    let stack = &outcome.stack;
    assert_eq!(stack.count(Mode::Data, "vsphere_compute_cluster"), 1);
    assert!(stack
        .get(&Address::data_in("vsphere_compute_cluster", "Datacenter", "other-cluster"))
        .is_none());
    assert_eq!(stack.declarations().len(), 6);
    assert_eq!(stack.outputs().len(), 1);
}

#[test]
fn vm_names_differing_only_in_punctuation_both_compose() {
    let outcome = compose_stack(
        "stack-1",
        &provider(),
        &[spec("web.01"), spec("web_01")],
        &service(),
    );

    assert!(outcome.is_success());
    assert_eq!(outcome.stack.count(Mode::Managed, "vsphere_virtual_machine"), 2);
    assert_eq!(outcome.stack.outputs().len(), 2);
    assert_ne!(outcome.composed[0].handle, outcome.composed[1].handle);
}

#[test]
fn network_names_differing_only_in_punctuation_get_separate_lookups() {
    let mut first = spec("a");
    first.networks = [("VM Network", NetworkBinding::dhcp("ens192"))]
        .into_iter()
        .collect::<OrderedMap<_>>();
    let mut second = spec("b");
    second.networks = [("VM_Network", NetworkBinding::dhcp("ens192"))]
        .into_iter()
        .collect::<OrderedMap<_>>();

    let outcome = compose_stack("stack-1", &provider(), &[first, second], &service());

    assert!(outcome.is_success());
    assert_eq!(outcome.stack.count(Mode::Data, "vsphere_network"), 2);
}

#[test]
fn datacenter_and_cluster_names_cannot_run_together() {
    let mut first = spec("a");
    first.datacenter = "dc_east".into();
    first.cluster = "c1".into();
    let mut second = spec("b");
    second.datacenter = "dc".into();
    second.cluster = "east_c1".into();

    let outcome = compose_stack("stack-1", &provider(), &[first, second], &service());

    assert!(outcome.is_success());
    assert_eq!(outcome.stack.count(Mode::Data, "vsphere_datacenter"), 2);
    assert_eq!(outcome.stack.count(Mode::Data, "vsphere_compute_cluster"), 2);
}

/// Graph that records the order of declarations.
#[derive(Default)]
struct Recorder {
    declared: Vec<String>,
    outputs: Vec<String>,
}

impl ResourceGraph for Recorder {
    fn declare(&mut self, decl: Declaration) -> tf_graph::Result<Handle> {
        self.declared.push(decl.address.to_string());
        Ok(Handle::new(decl.address))
    }

    fn output(&mut self, name: &str, _output: Output) -> tf_graph::Result<()> {
        self.outputs.push(name.to_string());
        Ok(())
    }

    fn apply(&mut self, changes: Changeset) -> tf_graph::Result<Vec<Handle>> {
        let handles = changes
            .declarations()
            .iter()
            .map(|decl| self.declare(decl.clone()))
            .collect::<tf_graph::Result<Vec<_>>>()?;
        for (name, output) in changes.outputs() {
            self.output(name, output.clone())?;
        }
        Ok(handles)
    }
}

#[test]
fn declarations_follow_dependency_order() {
    let mut vm = spec("my-vm-1");
    vm.networks.insert("vm-lan-2", NetworkBinding::dhcp("ens224"));

    let mut graph = Recorder::default();
    let resource = compose_vm(&mut graph, &vm, &service()).unwrap();

    assert_eq!(
        graph.declared,
        [
            "data.vsphere_datacenter.Datacenter",
            "data.vsphere_compute_cluster.Datacenter_dell-cluster-1",
            "data.vsphere_datastore.Datacenter_nfs_default_1",
            "data.vsphere_network.Datacenter_vm-lan-1",
            "data.vsphere_network.Datacenter_vm-lan-2",
            "data.vsphere_virtual_machine.Datacenter_rocky-9_2_999bb3d0",
            "vsphere_virtual_machine.my-vm-1",
        ]
    );
    assert_eq!(graph.outputs, ["my-vm-1_vm_ip"]);
    assert_eq!(resource.handle.address().to_string(), "vsphere_virtual_machine.my-vm-1");
}
