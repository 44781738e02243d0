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

//! A minimal, explicitly non-YANG schema description format. Each module
//! is one TOML file; this is a stand-in for whatever a real schema
//! library would parse, not an attempt to model YANG itself. See
//! `schema::SchemaModule` for the boundary this sits behind.

use std::{fs, path::Path};

use anyhow::{anyhow, Context};
use serde_derive::Deserialize;

use super::{LeafType, ModuleDef, NodeDef, NodeKind, SchemaModule};

pub fn load(path: &Path) -> anyhow::Result<TomlSchemaModule> {
    let text = fs::read_to_string(path).context("reading schema file")?;
    let file: SchemaFile = toml::from_str(&text).context("parsing schema toml")?;
    let def = file.into_module_def()?;
    Ok(TomlSchemaModule { def })
}

pub struct TomlSchemaModule {
    def: ModuleDef,
}

impl SchemaModule for TomlSchemaModule {
    fn def(&self) -> &ModuleDef {
        &self.def
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    module: ModuleMeta,
    #[serde(default)]
    feature: Vec<String>,
    #[serde(default)]
    node: Vec<NodeSpec>,
}

#[derive(Deserialize)]
struct ModuleMeta {
    name: String,
    namespace: String,
    prefix: String,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Deserialize)]
struct NodeSpec {
    /// Dotted path from the module root, e.g. `"interfaces.interface.name"`.
    path: String,
    kind: String,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    digits: Option<u8>,
    #[serde(default)]
    enum_values: Vec<String>,
    #[serde(default)]
    bits: Vec<String>,
    #[serde(default)]
    leafref_target: Option<String>,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    user_ordered: bool,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    config: Option<bool>,
    #[serde(default)]
    if_features: Vec<String>,
}

impl SchemaFile {
    fn into_module_def(self) -> anyhow::Result<ModuleDef> {
        let mut root: Vec<NodeDef> = Vec::new();
        for spec in &self.node {
            let segments: Vec<&str> = spec.path.split('.').collect();
            insert_node(&mut root, &segments, spec)?;
        }
        Ok(ModuleDef {
            name: self.module.name,
            namespace: self.module.namespace,
            prefix: self.module.prefix,
            revision: self.module.revision,
            features: self.feature,
            nodes: root,
        })
    }
}

fn insert_node(siblings: &mut Vec<NodeDef>, segments: &[&str], spec: &NodeSpec) -> anyhow::Result<()> {
    let (head, rest) = segments.split_first().ok_or_else(|| anyhow!("empty node path"))?;
    if rest.is_empty() {
        if siblings.iter().any(|n| n.name == *head) {
            return Err(anyhow!("duplicate node path {}", spec.path));
        }
        siblings.push(node_spec_to_def(head, spec)?);
        return Ok(());
    }
    let idx = match siblings.iter().position(|n| n.name == *head) {
        Some(idx) => idx,
        None => {
            siblings.push(NodeDef {
                name: head.to_string(),
                kind: NodeKind::Container,
                leaf_type: None,
                keys: Vec::new(),
                user_ordered: false,
                mandatory: false,
                default: None,
                config: true,
                if_features: Vec::new(),
                children: Vec::new(),
            });
            siblings.len() - 1
        }
    };
    insert_node(&mut siblings[idx].children, rest, spec)
}

fn node_spec_to_def(name: &str, spec: &NodeSpec) -> anyhow::Result<NodeDef> {
    let kind = match spec.kind.as_str() {
        "container" => NodeKind::Container,
        "list" => NodeKind::List,
        "leaf" => NodeKind::Leaf,
        "leaf-list" => NodeKind::LeafList,
        other => return Err(anyhow!("unknown node kind {other} for {name}")),
    };

    let leaf_type = if matches!(kind, NodeKind::Leaf | NodeKind::LeafList) {
        Some(parse_leaf_type(spec)?)
    } else {
        None
    };

    if matches!(kind, NodeKind::List) && spec.keys.is_empty() {
        return Err(anyhow!("list {name} declares no keys"));
    }

    Ok(NodeDef {
        name: name.to_string(),
        kind,
        leaf_type,
        keys: spec.keys.clone(),
        user_ordered: spec.user_ordered,
        mandatory: spec.mandatory,
        default: None,
        config: spec.config.unwrap_or(true),
        if_features: spec.if_features.clone(),
        children: Vec::new(),
    })
}

fn parse_leaf_type(spec: &NodeSpec) -> anyhow::Result<LeafType> {
    let ty = spec.r#type.as_deref().ok_or_else(|| anyhow!("leaf missing `type`"))?;
    Ok(match ty {
        "int8" => LeafType::Int8,
        "int16" => LeafType::Int16,
        "int32" => LeafType::Int32,
        "int64" => LeafType::Int64,
        "uint8" => LeafType::UInt8,
        "uint16" => LeafType::UInt16,
        "uint32" => LeafType::UInt32,
        "uint64" => LeafType::UInt64,
        "decimal64" => LeafType::Decimal64 {
            digits: spec.digits.ok_or_else(|| anyhow!("decimal64 requires `digits`"))?,
        },
        "boolean" => LeafType::Bool,
        "string" => LeafType::String,
        "binary" => LeafType::Binary,
        "bits" => LeafType::Bits(spec.bits.clone()),
        "enumeration" => LeafType::Enum(spec.enum_values.clone()),
        "identityref" => LeafType::IdentityRef,
        "empty" => LeafType::Empty,
        "leafref" => LeafType::LeafRef(
            spec.leafref_target.clone().ok_or_else(|| anyhow!("leafref requires `leafref_target`"))?,
        ),
        other => return Err(anyhow!("unsupported leaf type {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_container_and_list() {
        let toml = r#"
            [module]
            name = "demo"
            namespace = "urn:demo"
            prefix = "demo"

            [[node]]
            path = "interfaces"
            kind = "container"

            [[node]]
            path = "interfaces.interface"
            kind = "list"
            keys = ["name"]

            [[node]]
            path = "interfaces.interface.name"
            kind = "leaf"
            type = "string"
            mandatory = true

            [[node]]
            path = "interfaces.interface.mtu"
            kind = "leaf"
            type = "uint16"
        "#;
        let file: SchemaFile = toml::from_str(toml).unwrap();
        let def = file.into_module_def().unwrap();
        let interfaces = def.top_level("interfaces").unwrap();
        let interface = interfaces.child("interface").unwrap();
        assert_eq!(interface.keys, vec!["name".to_string()]);
        assert!(interface.child("name").unwrap().mandatory);
        assert_eq!(interface.child("mtu").unwrap().leaf_type, Some(LeafType::UInt16));
    }

    #[test]
    fn list_without_keys_is_rejected() {
        let toml = r#"
            [module]
            name = "demo"
            namespace = "urn:demo"
            prefix = "demo"

            [[node]]
            path = "things"
            kind = "list"
        "#;
        let file: SchemaFile = toml::from_str(toml).unwrap();
        assert!(file.into_module_def().is_err());
    }
}
