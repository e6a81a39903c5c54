//! vSphere VM composition.
//!
//! Turns [`VmSpec`]s into declarations on a [`tf_graph::ResourceGraph`]:
//! the datacenter/cluster/datastore/network/template lookups a VM needs,
//! the `vsphere_virtual_machine` resource itself with its embedded
//! cloud-init guest configuration, and an output carrying the VM's IP.

pub mod composer;
pub mod config;
pub mod guest_config;
pub mod types;
pub mod vsphere;

use std::fmt;
use std::path::PathBuf;

pub use composer::{StackOutcome, VmFailure, VmResource, compose_stack, compose_vm};
pub use config::{ProviderConfig, VmDefaults};
pub use guest_config::{GuestConfigService, TemplateRenderer, TeraRenderer};
pub use types::{EncodedGuestConfig, Firmware, NetworkBinding, OrderedMap, VmSpec};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid SSH key format {0}")]
    InvalidKeyFormat(KeyOrigin),

    #[error("user data file {0} not found")]
    FileNotFound(String),

    #[error("error reading file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid spec for vm {vm}: {reason}")]
    InvalidSpec { vm: String, reason: String },

    #[error("metadata render error: {0}")]
    Render(String),

    #[error("resource graph error: {0}")]
    Graph(#[from] tf_graph::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where rejected SSH key material came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    File(PathBuf),
    Direct,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "in {}", path.display()),
            Self::Direct => f.write_str("provided directly"),
        }
    }
}
