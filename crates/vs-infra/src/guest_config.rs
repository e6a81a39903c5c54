//! Guest configuration payload: SSH key and user-data resolution, metadata
//! rendering and base64 encoding for the `guestinfo.*` extra config keys.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};
use tracing::debug;

use crate::types::{EncodedGuestConfig, NetworkBinding, OrderedMap, VmSpec};
use crate::{Error, KeyOrigin, Result};

/// Name the built-in metadata template is registered under.
pub const METADATA_TEMPLATE: &str = "metadata.yaml";

const METADATA_TEMPLATE_SOURCE: &str = include_str!("../templates/metadata.yaml");

static SSH_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ssh-rsa|ssh-dss|ssh-ed25519|ecdsa-sha2-nistp256) [A-Za-z0-9+/]+[=]{0,3}( .+)?$")
        .expect("SSH key pattern is a valid regex")
});

// ── Inputs ───────────────────────────────────────────────────────────

/// Whether `key` is a single-line OpenSSH public key of an accepted type.
pub fn validate_ssh_key(key: &str) -> bool {
    SSH_KEY_PATTERN.is_match(key)
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => None,
        Some(rest) if rest.starts_with('/') => Some(&rest[1..]),
        _ => return PathBuf::from(path),
    };
    match (dirs::home_dir(), rest) {
        (Some(home), Some(rest)) => home.join(rest),
        (Some(home), None) => home,
        (None, _) => PathBuf::from(path),
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|content| content.trim().to_string())
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Resolve an SSH public key given either as a file path or literally.
///
/// An existing file is read and its trimmed content validated; a file with
/// bad content is reported against that file. Anything else is trimmed and
/// validated as literal key material.
pub fn resolve_ssh_key(key_or_path: &str) -> Result<String> {
    let path = expand_home(key_or_path);
    if path.is_file() {
        let key = read_trimmed(&path)?;
        if !validate_ssh_key(&key) {
            return Err(Error::InvalidKeyFormat(KeyOrigin::File(path)));
        }
        debug!(path = %path.display(), "guest: ssh key read from file");
        return Ok(key);
    }

    let literal = key_or_path.trim();
    if validate_ssh_key(literal) {
        return Ok(literal.to_string());
    }
    Err(Error::InvalidKeyFormat(KeyOrigin::Direct))
}

/// Read a cloud-init user-data file, trimmed.
pub fn resolve_user_data(path: &str) -> Result<String> {
    let expanded = expand_home(path);
    if !expanded.is_file() {
        return Err(Error::FileNotFound(path.to_string()));
    }
    read_trimmed(&expanded)
}

/// Standard base64 of the UTF-8 bytes, unwrapped.
pub fn encode(text: &str) -> String {
    BASE64.encode(text.as_bytes())
}

// ── Rendering ────────────────────────────────────────────────────────

/// Text templating engine used for the guest metadata document.
pub trait TemplateRenderer {
    /// Render `template` with `variables`, a JSON object.
    fn render(&self, template: &str, variables: &Value) -> Result<String>;
}

/// [`TemplateRenderer`] backed by Tera, with the metadata template built in.
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(METADATA_TEMPLATE, METADATA_TEMPLATE_SOURCE)
            .map_err(|e| Error::Render(format!("failed to add template: {}", error_chain(&e))))?;
        Ok(Self { tera })
    }

    /// Register an additional template, or replace the built-in one.
    pub fn with_template(mut self, name: &str, source: &str) -> Result<Self> {
        self.tera
            .add_raw_template(name, source)
            .map_err(|e| Error::Render(format!("failed to add template {name}: {}", error_chain(&e))))?;
        Ok(self)
    }
}

impl TemplateRenderer for TeraRenderer {
    fn render(&self, template: &str, variables: &Value) -> Result<String> {
        let context = Context::from_value(variables.clone())
            .map_err(|e| Error::Render(format!("invalid template variables: {e}")))?;
        self.tera
            .render(template, &context)
            .map_err(|e| Error::Render(format!("failed to render {template}: {}", error_chain(&e))))
    }
}

/// Tera nests the useful part of its errors in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Serialize)]
struct MetadataVars<'a> {
    name: &'a str,
    ssh_key: &'a str,
    networks: Vec<NetworkVars<'a>>,
}

#[derive(Serialize)]
struct NetworkVars<'a> {
    name: &'a str,
    interface: &'a str,
    dhcp: bool,
    address: Option<&'a str>,
    gateway: Option<&'a str>,
    dns: &'a [String],
}

// ── Service ──────────────────────────────────────────────────────────

/// Builds the encoded guest configuration for a VM.
pub struct GuestConfigService<R = TeraRenderer> {
    renderer: R,
    template: String,
}

impl GuestConfigService<TeraRenderer> {
    /// Service using the built-in Tera metadata template.
    pub fn with_builtin_template() -> Result<Self> {
        Ok(Self::new(TeraRenderer::new()?))
    }
}

impl<R: TemplateRenderer> GuestConfigService<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            template: METADATA_TEMPLATE.to_string(),
        }
    }

    /// Render metadata with a different registered template.
    pub fn with_template_name(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Render the guest metadata document: hostname, authorized key and one
    /// network stanza per binding, in order.
    pub fn render_metadata(
        &self,
        vm_name: &str,
        ssh_key: &str,
        networks: &OrderedMap<NetworkBinding>,
    ) -> Result<String> {
        let vars = MetadataVars {
            name: vm_name,
            ssh_key,
            networks: networks
                .iter()
                .map(|(name, binding)| NetworkVars {
                    name,
                    interface: &binding.interface_name,
                    dhcp: binding.is_dhcp(),
                    address: binding.static_address(),
                    gateway: binding.gateway.as_deref(),
                    dns: binding.dns_servers.as_deref().unwrap_or_default(),
                })
                .collect(),
        };
        let vars = serde_json::to_value(&vars)
            .map_err(|e| Error::Render(format!("invalid template variables: {e}")))?;
        self.renderer.render(&self.template, &vars)
    }

    /// Resolve, render and encode everything the guest needs at first boot.
    pub fn build_guest_config(&self, spec: &VmSpec) -> Result<EncodedGuestConfig> {
        let ssh_key = resolve_ssh_key(&spec.ssh_key)?;
        let metadata = self.render_metadata(&spec.name, &ssh_key, &spec.networks)?;

        let userdata = match &spec.user_data_path {
            Some(path) => encode(&resolve_user_data(path)?),
            None => String::new(),
        };

        debug!(
            vm = %spec.name,
            metadata_bytes = metadata.len(),
            has_userdata = spec.user_data_path.is_some(),
            "guest: config built"
        );
        Ok(EncodedGuestConfig::new(encode(&metadata), userdata))
    }
}
