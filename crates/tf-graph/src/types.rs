use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ── Addresses ────────────────────────────────────────────────────────

/// Whether a block is a read-only lookup or a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Data,
    Managed,
}

impl Mode {
    /// Top-level key of the block in Terraform JSON.
    pub fn block_key(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Managed => "resource",
        }
    }
}

/// Fully qualified address of a block, e.g. `data.vsphere_datacenter.dc1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub mode: Mode,
    pub kind: String,
    pub name: String,
}

impl Address {
    /// Lookup address labelled with [`block_label`] of `name`.
    pub fn data(kind: impl Into<String>, name: &str) -> Self {
        Self {
            mode: Mode::Data,
            kind: kind.into(),
            name: block_label(&[name]),
        }
    }

    /// Lookup address for `name` inside `scope`, e.g. a cluster in a datacenter.
    pub fn data_in(kind: impl Into<String>, scope: &str, name: &str) -> Self {
        Self {
            mode: Mode::Data,
            kind: kind.into(),
            name: block_label(&[scope, name]),
        }
    }

    /// Managed resource address labelled with [`block_label`] of `name`.
    pub fn managed(kind: impl Into<String>, name: &str) -> Self {
        Self {
            mode: Mode::Managed,
            kind: kind.into(),
            name: block_label(&[name]),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Data => write!(f, "data.{}.{}", self.kind, self.name),
            Mode::Managed => write!(f, "{}.{}", self.kind, self.name),
        }
    }
}

/// Turn an arbitrary logical name into a valid Terraform block label.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`, and names that would start
/// with a digit or dash get a `_` prefix. An empty input stays empty and is
/// rejected when declared.
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-')
    {
        name.insert(0, '_');
    }
    name
}

const HASH_SUFFIX_LEN: usize = 8;

/// Block label for a logical name made of `parts` (outermost scope first).
///
/// The parts are joined with `_` and sanitized. Distinct inputs always get
/// distinct labels: when the joined text alone could also stand for other
/// input (sanitizing rewrote it, a scope part contains `_`, or it already
/// ends like a hash suffix) `_` plus a short hash of the raw parts is
/// appended.
pub fn block_label(parts: &[&str]) -> String {
    let joined = parts.join("_");
    let label = sanitize_name(&joined);

    let scope_is_ambiguous = parts
        .split_last()
        .is_some_and(|(_, scope)| scope.iter().any(|p| p.contains('_')));

    if label == joined && !scope_is_ambiguous && !has_hash_suffix(&label) {
        return label;
    }
    format!("{label}_{}", short_hash(parts))
}

fn has_hash_suffix(label: &str) -> bool {
    let bytes = label.as_bytes();
    bytes.len() > HASH_SUFFIX_LEN
        && bytes[bytes.len() - HASH_SUFFIX_LEN - 1] == b'_'
        && bytes[bytes.len() - HASH_SUFFIX_LEN..]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize()[..HASH_SUFFIX_LEN / 2]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ── Declarations ─────────────────────────────────────────────────────

/// Intent to have the engine read or create one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub address: Address,
    pub attributes: Map<String, Value>,
    pub depends_on: Vec<Address>,
}

impl Declaration {
    /// Build a declaration from a JSON object. Non-object values yield no attributes.
    pub fn new(address: Address, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            address,
            attributes,
            depends_on: Vec::new(),
        }
    }

    /// Build a declaration from any serializable attribute struct.
    pub fn from_serialize<T: Serialize>(address: Address, attributes: &T) -> crate::Result<Self> {
        Ok(Self::new(address, serde_json::to_value(attributes)?))
    }

    pub fn depends_on<'a>(mut self, handles: impl IntoIterator<Item = &'a Handle>) -> Self {
        self.depends_on
            .extend(handles.into_iter().map(|h| h.address().clone()));
        self
    }
}

/// Reference to a declared block. Attribute values are only known after
/// the engine applies the graph, so handles hand out interpolation
/// expressions rather than values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    address: Address,
}

impl Handle {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// `${<address>.<attr>}` expression for one of the block's attributes.
    pub fn attr(&self, attr: &str) -> String {
        format!("${{{}.{attr}}}", self.address)
    }

    /// Shorthand for `attr("id")`.
    pub fn id(&self) -> String {
        self.attr("id")
    }
}

/// A named output value exposed after apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Entry of the `terraform.required_providers` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRequirement {
    pub source: String,
    pub version: String,
}
