//! In-memory Terraform resource graph.
//!
//! Callers declare lookups (`data` blocks), managed resources and outputs;
//! the [`Stack`] records them, deduplicates identical lookups and
//! synthesizes the whole graph as Terraform JSON configuration. Nothing
//! here talks to a provider: values only exist once the engine applies the
//! synthesized document.

mod types;

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value, json};
use tracing::debug;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{address} depends on undeclared {dependency}")]
    UnknownDependency {
        address: Address,
        dependency: Address,
    },

    #[error("{0} is already declared")]
    DuplicateAddress(Address),

    #[error("{0} is already declared with different attributes")]
    ConflictingLookup(Address),

    #[error("output {0} is already declared")]
    DuplicateOutput(String),

    #[error("empty name for {0} block")]
    InvalidName(String),

    #[error("failed to serialize stack: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Declaration interface of the infrastructure engine.
///
/// Declaring returns a [`Handle`] immediately; the handle only yields
/// interpolation expressions, never concrete values.
pub trait ResourceGraph {
    /// Declare a lookup or managed resource.
    fn declare(&mut self, decl: Declaration) -> Result<Handle>;

    /// Expose a value as a named output.
    fn output(&mut self, name: &str, output: Output) -> Result<()>;

    /// Apply a whole changeset, or nothing of it.
    ///
    /// On error the graph is left exactly as it was before the call.
    fn apply(&mut self, changes: Changeset) -> Result<Vec<Handle>>;
}

/// Declarations and outputs staged for one [`ResourceGraph::apply`].
///
/// Staging hands out handles up front, so later declarations can reference
/// earlier ones before anything reaches the graph.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    declarations: Vec<Declaration>,
    outputs: Vec<(String, Output)>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: Declaration) -> Handle {
        let handle = Handle::new(decl.address.clone());
        self.declarations.push(decl);
        handle
    }

    pub fn output(&mut self, name: impl Into<String>, output: Output) {
        self.outputs.push((name.into(), output));
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn outputs(&self) -> &[(String, Output)] {
        &self.outputs
    }
}

/// A single synthesizable stack.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    name: String,
    required_providers: BTreeMap<String, ProviderRequirement>,
    providers: BTreeMap<String, Vec<Map<String, Value>>>,
    declarations: Vec<Declaration>,
    index: HashMap<Address, usize>,
    outputs: BTreeMap<String, Output>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pin a provider plugin in `terraform.required_providers`.
    pub fn require_provider(&mut self, name: &str, source: &str, version: &str) {
        self.required_providers.insert(
            name.to_string(),
            ProviderRequirement {
                source: source.to_string(),
                version: version.to_string(),
            },
        );
    }

    /// Add a provider configuration block.
    pub fn configure_provider(&mut self, name: &str, config: Value) {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.providers
            .entry(name.to_string())
            .or_default()
            .push(config);
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// All declarations, in declaration order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn get(&self, address: &Address) -> Option<&Declaration> {
        self.index.get(address).map(|&i| &self.declarations[i])
    }

    /// Number of declared blocks of one mode and kind.
    pub fn count(&self, mode: Mode, kind: &str) -> usize {
        self.declarations
            .iter()
            .filter(|d| d.address.mode == mode && d.address.kind == kind)
            .count()
    }

    /// Direct dependencies of a block (empty if the block is unknown).
    pub fn dependencies_of(&self, address: &Address) -> &[Address] {
        self.get(address)
            .map(|d| d.depends_on.as_slice())
            .unwrap_or_default()
    }

    /// Blocks that directly depend on `address`.
    pub fn dependents_of(&self, address: &Address) -> Vec<&Address> {
        self.declarations
            .iter()
            .filter(|d| d.depends_on.contains(address))
            .map(|d| &d.address)
            .collect()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    // ── Synthesis ────────────────────────────────────────────────────

    /// Render the stack as a Terraform JSON configuration document.
    ///
    /// Dependency edges are not emitted as `depends_on`: every edge is also
    /// an interpolated reference inside the dependent's attributes, which is
    /// how the engine orders evaluation.
    pub fn synth(&self) -> Value {
        let mut doc = Map::new();

        if !self.required_providers.is_empty() {
            doc.insert(
                "terraform".into(),
                json!({ "required_providers": self.required_providers }),
            );
        }

        if !self.providers.is_empty() {
            doc.insert("provider".into(), json!(self.providers));
        }

        for mode in [Mode::Data, Mode::Managed] {
            let mut by_kind: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
            for decl in self.declarations.iter().filter(|d| d.address.mode == mode) {
                by_kind
                    .entry(decl.address.kind.as_str())
                    .or_default()
                    .insert(
                        decl.address.name.clone(),
                        Value::Object(decl.attributes.clone()),
                    );
            }
            if !by_kind.is_empty() {
                doc.insert(mode.block_key().into(), json!(by_kind));
            }
        }

        if !self.outputs.is_empty() {
            doc.insert("output".into(), json!(self.outputs));
        }

        Value::Object(doc)
    }

    /// Pretty-printed [`Stack::synth`] output.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.synth())?)
    }

    fn apply_in_order(
        &mut self,
        changes: Changeset,
        added_outputs: &mut Vec<String>,
    ) -> Result<Vec<Handle>> {
        let handles = changes
            .declarations
            .into_iter()
            .map(|decl| self.declare(decl))
            .collect::<Result<Vec<_>>>()?;
        for (name, output) in changes.outputs {
            self.output(&name, output)?;
            added_outputs.push(name);
        }
        Ok(handles)
    }

    /// Drop every declaration past `mark` and the named outputs.
    fn rollback(&mut self, mark: usize, outputs: &[String]) {
        for decl in self.declarations.drain(mark..) {
            self.index.remove(&decl.address);
        }
        for name in outputs {
            self.outputs.remove(name);
        }
    }
}

impl ResourceGraph for Stack {
    fn declare(&mut self, decl: Declaration) -> Result<Handle> {
        if decl.address.name.is_empty() {
            return Err(Error::InvalidName(decl.address.kind.clone()));
        }

        if let Some(missing) = decl
            .depends_on
            .iter()
            .find(|dep| !self.index.contains_key(dep))
        {
            return Err(Error::UnknownDependency {
                address: decl.address.clone(),
                dependency: missing.clone(),
            });
        }

        if let Some(&existing) = self.index.get(&decl.address) {
            let existing = &self.declarations[existing];
            return match decl.address.mode {
                Mode::Data if existing.attributes == decl.attributes => {
                    debug!(address = %decl.address, "graph: reusing lookup");
                    Ok(Handle::new(decl.address))
                }
                Mode::Data => Err(Error::ConflictingLookup(decl.address)),
                Mode::Managed => Err(Error::DuplicateAddress(decl.address)),
            };
        }

        debug!(address = %decl.address, "graph: declared");
        let handle = Handle::new(decl.address.clone());
        self.index
            .insert(decl.address.clone(), self.declarations.len());
        self.declarations.push(decl);
        Ok(handle)
    }

    fn output(&mut self, name: &str, output: Output) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName("output".into()));
        }
        if self.outputs.contains_key(name) {
            return Err(Error::DuplicateOutput(name.to_string()));
        }
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    fn apply(&mut self, changes: Changeset) -> Result<Vec<Handle>> {
        let mark = self.declarations.len();
        let mut added_outputs = Vec::new();

        match self.apply_in_order(changes, &mut added_outputs) {
            Ok(handles) => Ok(handles),
            Err(e) => {
                debug!(
                    error = %e,
                    dropped = self.declarations.len() - mark,
                    "graph: changeset rolled back"
                );
                self.rollback(mark, &added_outputs);
                Err(e)
            }
        }
    }
}
