// Copyright 2024 yangd contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The schema facade. Nothing in this module or its children parses real
//! YANG; `toml_schema` loads a TOML description of a module's node tree
//! that stands in for the output a real schema library would hand back.
//! Everything above [`SchemaModule`] (the data manager, the edit engine,
//! the wire layer) only ever sees this crate's own [`NodeDef`]/[`Value`]
//! types, never a schema-library-specific representation.

pub mod toml_schema;
pub mod tree;
pub mod xpath;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use yangd_protocol::{RevisionInfo, SchemaInfo};

/// Shape of a schema node; mirrors the subset of YANG statements the
/// data manager actually needs to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Container,
    List,
    Leaf,
    LeafList,
}

/// The subset of YANG leaf types the wire protocol's `Value` enum can
/// carry. Kept separate from `Value` itself since a definition also
/// needs to carry type *constraints* (enum members, decimal64 digits)
/// that an instance value doesn't.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Decimal64 { digits: u8 },
    Bool,
    String,
    Binary,
    Bits(Vec<String>),
    Enum(Vec<String>),
    IdentityRef,
    Empty,
    LeafRef(String),
}

#[derive(Debug, Clone)]
pub struct NodeDef {
    pub name: String,
    pub kind: NodeKind,
    pub leaf_type: Option<LeafType>,
    /// Key leaf names, in order, for `List` nodes.
    pub keys: Vec<String>,
    /// Whether a `List`'s instances are user-ordered (enables `MoveItem`).
    pub user_ordered: bool,
    pub mandatory: bool,
    pub default: Option<yangd_protocol::Value>,
    /// `config false` nodes are state data: readable, never editable, and
    /// excluded from the running-datastore enablement walk.
    pub config: bool,
    /// The YANG `if-feature` names gating this node's presence, if any.
    pub if_features: Vec<String>,
    pub children: Vec<NodeDef>,
}

impl NodeDef {
    pub fn child(&self, name: &str) -> Option<&NodeDef> {
        self.children.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ModuleDef {
    pub name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: Option<String>,
    /// All features declared by the module, enabled or not.
    pub features: Vec<String>,
    pub nodes: Vec<NodeDef>,
}

impl ModuleDef {
    pub fn info(&self) -> SchemaInfo {
        SchemaInfo {
            module_name: self.name.clone(),
            namespace: self.namespace.clone(),
            prefix: self.prefix.clone(),
            revision: RevisionInfo {
                version: self.revision.clone(),
                yang_path: None,
                yin_path: None,
            },
            submodules: Vec::new(),
        }
    }

    pub fn top_level(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// A loaded schema module, as handed back by whatever backs the facade.
/// The only concrete implementation shipped here is [`toml_schema`]; a
/// real deployment would implement this trait against an actual YANG
/// compiler and nothing above this boundary would need to change.
pub trait SchemaModule: Send + Sync {
    fn def(&self) -> &ModuleDef;
}

/// Holds every loaded module and answers the schema-facing operations
/// (`list-schemas`, `get-schema`) plus the module/feature lookups the
/// data manager needs to validate edits and enforce `if-feature` gates.
pub struct Registry {
    modules: HashMap<String, Arc<dyn SchemaModule>>,
    enabled_features: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { modules: HashMap::new(), enabled_features: HashMap::new() }
    }

    /// Load every `*.toml` schema description file in `dir`.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut registry = Registry::new();
        if !dir.exists() {
            return Ok(registry);
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading schema dir {dir:?}"))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        entries.sort();
        for path in entries {
            let module = toml_schema::load(&path)
                .with_context(|| format!("loading schema file {path:?}"))?;
            registry.insert(Arc::new(module));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, module: Arc<dyn SchemaModule>) {
        let name = module.def().name.clone();
        self.enabled_features.entry(name.clone()).or_default();
        self.modules.insert(name, module);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SchemaModule>> {
        self.modules.get(name)
    }

    pub fn list(&self) -> Vec<SchemaInfo> {
        let mut infos: Vec<SchemaInfo> = self.modules.values().map(|m| m.def().info()).collect();
        infos.sort_by(|a, b| a.module_name.cmp(&b.module_name));
        infos
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_feature_enabled(&self, module: &str, feature: &str) -> bool {
        self.enabled_features.get(module).is_some_and(|fs| fs.iter().any(|f| f == feature))
    }

    pub fn set_feature_enabled(&mut self, module: &str, feature: &str, enable: bool) {
        let list = self.enabled_features.entry(module.to_string()).or_default();
        if enable {
            if !list.iter().any(|f| f == feature) {
                list.push(feature.to_string());
            }
        } else {
            list.retain(|f| f != feature);
        }
    }

    /// True if every `if-feature` name on `node` is enabled for `module`.
    pub fn node_is_active(&self, module: &str, node: &NodeDef) -> bool {
        node.if_features.iter().all(|f| self.is_feature_enabled(module, f))
    }

    pub fn remove_module(&mut self, name: &str) -> anyhow::Result<()> {
        if self.modules.remove(name).is_none() {
            return Err(anyhow!("no such module: {name}"));
        }
        self.enabled_features.remove(name);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
