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

//! The in-memory data tree a module's working copy and persisted
//! running/startup content are built from. Generic over any schema
//! shape; the data manager is responsible for checking a path against
//! the loaded [`super::ModuleDef`] before mutating the tree.

use serde_derive::{Deserialize, Serialize};
use yangd_protocol::Value;

use super::xpath::Step;

/// Per-node running-datastore enablement. Only meaningful on `running`;
/// `startup`/`candidate` copies ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Enablement {
    #[default]
    Disabled,
    Enabled,
    EnabledWithChildren,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeData {
    Leaf(Value),
    LeafList(Vec<Value>),
    /// Container children, or the fields of one list entry.
    Inner(Vec<Node>),
    /// A list's instances, each one a bag of fields.
    List(Vec<Node>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Key leaf values for a list entry, `(key_name, value_as_text)`.
    /// Empty for anything that isn't a list entry.
    pub keys: Vec<(String, String)>,
    pub data: NodeData,
    pub enablement: Enablement,
    pub default: bool,
}

impl Node {
    fn container(name: &str) -> Node {
        Node {
            name: name.to_string(),
            keys: Vec::new(),
            data: NodeData::Inner(Vec::new()),
            enablement: Enablement::Disabled,
            default: false,
        }
    }

    fn children_mut(&mut self) -> anyhow::Result<&mut Vec<Node>> {
        match &mut self.data {
            NodeData::Inner(children) => Ok(children),
            _ => Err(anyhow::anyhow!("{} is not a container", self.name)),
        }
    }

    fn list_entries_mut(&mut self) -> anyhow::Result<&mut Vec<Node>> {
        match &mut self.data {
            NodeData::List(entries) => Ok(entries),
            _ => Err(anyhow::anyhow!("{} is not a list", self.name)),
        }
    }

    fn matches_predicates(&self, predicates: &[(String, String)]) -> bool {
        predicates.iter().all(|(k, v)| self.keys.iter().any(|(nk, nv)| nk == k && nv == v))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTree {
    pub roots: Vec<Node>,
}

impl DataTree {
    pub fn new() -> Self {
        DataTree { roots: Vec::new() }
    }

    pub fn get(&self, steps: &[Step]) -> Option<&Node> {
        let (first, rest) = steps.split_first()?;
        let mut node = self.roots.iter().find(|n| n.name == first.name)?;
        for step in rest {
            node = descend(node, step)?;
        }
        Some(node)
    }

    /// Set the leaf/leaf-list value at `steps`, creating any missing
    /// intermediate containers and list entries along the way.
    pub fn set(&mut self, steps: &[Step], value: Value) -> anyhow::Result<()> {
        let target = self.ensure_path(steps)?;
        match &mut target.data {
            NodeData::Inner(children) if children.is_empty() => {
                target.data = NodeData::Leaf(value);
            }
            NodeData::Leaf(_) => target.data = NodeData::Leaf(value),
            _ => return Err(anyhow::anyhow!("cannot set a scalar value on a non-leaf node")),
        }
        target.default = false;
        Ok(())
    }

    pub fn delete(&mut self, steps: &[Step]) -> anyhow::Result<bool> {
        let (last, init) = steps.split_last().ok_or_else(|| anyhow::anyhow!("empty xpath"))?;
        if init.is_empty() {
            let before = self.roots.len();
            self.roots.retain(|n| !(n.name == last.name && n.matches_predicates(&last.predicates)));
            return Ok(self.roots.len() != before);
        }
        let Some(parent) = self.get_mut(init) else { return Ok(false) };
        match &mut parent.data {
            NodeData::Inner(children) => {
                let before = children.len();
                children
                    .retain(|n| !(n.name == last.name && n.matches_predicates(&last.predicates)));
                Ok(children.len() != before)
            }
            NodeData::List(entries) => {
                let before = entries.len();
                entries
                    .retain(|n| !(n.name == last.name && n.matches_predicates(&last.predicates)));
                Ok(entries.len() != before)
            }
            NodeData::LeafList(values) => {
                let before = values.len();
                values.retain(|v| v.to_string() != last.name);
                Ok(values.len() != before)
            }
            NodeData::Leaf(_) => Ok(false),
        }
    }

    /// True if the node at `steps` exists and has at least one child,
    /// list entry, or leaf-list value. A leaf is never considered to
    /// have children.
    pub fn has_children(&self, steps: &[Step]) -> bool {
        match self.get(steps) {
            Some(node) => match &node.data {
                NodeData::Inner(children) => !children.is_empty(),
                NodeData::List(entries) => !entries.is_empty(),
                NodeData::LeafList(values) => !values.is_empty(),
                NodeData::Leaf(_) => false,
            },
            None => false,
        }
    }

    /// Evaluate `steps` as a query rather than a single instance
    /// identifier: a list step with no predicates matches every instance
    /// at that level instead of exactly one. Returns every matching node
    /// along with the fully-resolved path (predicates filled in from the
    /// matched instance's own keys) that reached it.
    pub fn get_all(&self, steps: &[Step]) -> Vec<(Vec<Step>, &Node)> {
        let mut out = Vec::new();
        let Some((first, rest)) = steps.split_first() else { return out };
        for root in self
            .roots
            .iter()
            .filter(|n| n.name == first.name && (first.predicates.is_empty() || n.matches_predicates(&first.predicates)))
        {
            let mut path = vec![resolved_step(first, root)];
            collect_matches(root, rest, &mut path, &mut out);
        }
        out
    }

    pub fn get_mut(&mut self, steps: &[Step]) -> Option<&mut Node> {
        let (first, rest) = steps.split_first()?;
        let mut node = self.roots.iter_mut().find(|n| n.name == first.name)?;
        for step in rest {
            node = descend_mut(node, step)?;
        }
        Some(node)
    }

    /// Walk the tree from the root to `steps`, creating empty containers
    /// and list entries as needed, and return the final node.
    pub fn ensure_path(&mut self, steps: &[Step]) -> anyhow::Result<&mut Node> {
        let (first, rest) = steps.split_first().ok_or_else(|| anyhow::anyhow!("empty xpath"))?;
        if !self.roots.iter().any(|n| n.name == first.name && n.matches_predicates(&first.predicates))
        {
            let mut node = Node::container(&first.name);
            node.keys = first.predicates.clone();
            self.roots.push(node);
        }
        let mut node = self
            .roots
            .iter_mut()
            .find(|n| n.name == first.name && n.matches_predicates(&first.predicates))
            .unwrap();
        for step in rest {
            node = ensure_child(node, step)?;
        }
        Ok(node)
    }

    /// Set ancestors to `Enabled` and the target node (and everything
    /// under it) to `EnabledWithChildren`, so that reading any ancestor
    /// of a newly-set node finds it reachable.
    pub fn enable_path(&mut self, steps: &[Step]) -> anyhow::Result<()> {
        let (last, init) = steps.split_last().ok_or_else(|| anyhow::anyhow!("empty xpath"))?;
        let mut prefix = Vec::new();
        for step in init {
            prefix.push(step.clone());
            let node = self.ensure_path(&prefix)?;
            if node.enablement == Enablement::Disabled {
                node.enablement = Enablement::Enabled;
            }
        }
        prefix.push(last.clone());
        let node = self.ensure_path(&prefix)?;
        set_enabled_with_children(node);
        Ok(())
    }

    pub fn is_enabled(&self, steps: &[Step]) -> bool {
        let mut prefix = Vec::new();
        for step in steps {
            prefix.push(step.clone());
            match self.get(&prefix) {
                Some(node) => {
                    if node.enablement == Enablement::EnabledWithChildren {
                        return true;
                    }
                    if node.enablement == Enablement::Disabled {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// Reorder a user-ordered list entry relative to its siblings.
    pub fn move_entry(
        &mut self,
        steps: &[Step],
        direction: yangd_protocol::MoveDirection,
    ) -> anyhow::Result<()> {
        let (last, init) = steps.split_last().ok_or_else(|| anyhow::anyhow!("empty xpath"))?;
        let siblings = if init.is_empty() {
            &mut self.roots
        } else {
            let parent = self.get_mut(init).ok_or_else(|| anyhow::anyhow!("no such parent"))?;
            parent.list_entries_mut()?
        };
        let idx = siblings
            .iter()
            .position(|n| n.name == last.name && n.matches_predicates(&last.predicates))
            .ok_or_else(|| anyhow::anyhow!("no such list entry"))?;
        match direction {
            yangd_protocol::MoveDirection::Up if idx > 0 => siblings.swap(idx, idx - 1),
            yangd_protocol::MoveDirection::Down if idx + 1 < siblings.len() => {
                siblings.swap(idx, idx + 1)
            }
            _ => {}
        }
        Ok(())
    }
}

fn resolved_step(step: &Step, node: &Node) -> Step {
    let predicates = if step.predicates.is_empty() && !node.keys.is_empty() {
        node.keys.clone()
    } else {
        step.predicates.clone()
    };
    Step { module: step.module.clone(), name: step.name.clone(), predicates }
}

fn collect_matches<'a>(
    node: &'a Node,
    rest: &[Step],
    path: &mut Vec<Step>,
    out: &mut Vec<(Vec<Step>, &'a Node)>,
) {
    let Some((step, tail)) = rest.split_first() else {
        out.push((path.clone(), node));
        return;
    };
    let children: &[Node] = match &node.data {
        NodeData::Inner(children) => children,
        NodeData::List(entries) => entries,
        NodeData::Leaf(_) | NodeData::LeafList(_) => return,
    };
    for child in children
        .iter()
        .filter(|c| c.name == step.name && (step.predicates.is_empty() || c.matches_predicates(&step.predicates)))
    {
        path.push(resolved_step(step, child));
        collect_matches(child, tail, path, out);
        path.pop();
    }
}

fn set_enabled_with_children(node: &mut Node) {
    node.enablement = Enablement::EnabledWithChildren;
    match &mut node.data {
        NodeData::Inner(children) | NodeData::List(children) => {
            for child in children {
                set_enabled_with_children(child);
            }
        }
        NodeData::Leaf(_) | NodeData::LeafList(_) => {}
    }
}

fn descend<'a>(node: &'a Node, step: &Step) -> Option<&'a Node> {
    match &node.data {
        NodeData::Inner(children) => {
            children.iter().find(|n| n.name == step.name && n.matches_predicates(&step.predicates))
        }
        NodeData::List(entries) => {
            entries.iter().find(|n| n.name == step.name && n.matches_predicates(&step.predicates))
        }
        NodeData::Leaf(_) | NodeData::LeafList(_) => None,
    }
}

fn descend_mut<'a>(node: &'a mut Node, step: &Step) -> Option<&'a mut Node> {
    match &mut node.data {
        NodeData::Inner(children) => {
            children.iter_mut().find(|n| n.name == step.name && n.matches_predicates(&step.predicates))
        }
        NodeData::List(entries) => {
            entries.iter_mut().find(|n| n.name == step.name && n.matches_predicates(&step.predicates))
        }
        NodeData::Leaf(_) | NodeData::LeafList(_) => None,
    }
}

fn ensure_child<'a>(node: &'a mut Node, step: &Step) -> anyhow::Result<&'a mut Node> {
    let is_list_step = !step.predicates.is_empty();
    if is_list_step {
        if matches!(node.data, NodeData::Inner(ref c) if c.is_empty()) {
            node.data = NodeData::List(Vec::new());
        }
        let entries = node.list_entries_mut()?;
        if !entries.iter().any(|n| n.name == step.name && n.matches_predicates(&step.predicates)) {
            let mut entry = Node::container(&step.name);
            entry.keys = step.predicates.clone();
            entries.push(entry);
        }
        Ok(entries
            .iter_mut()
            .find(|n| n.name == step.name && n.matches_predicates(&step.predicates))
            .unwrap())
    } else {
        let children = node.children_mut()?;
        if !children.iter().any(|n| n.name == step.name) {
            children.push(Node::container(&step.name));
        }
        Ok(children.iter_mut().find(|n| n.name == step.name).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::xpath;

    #[test]
    fn set_then_get_leaf_value() {
        let mut tree = DataTree::new();
        let steps = xpath::parse("/m:interfaces/interface[name='eth0']/mtu").unwrap();
        tree.set(&steps, Value::UInt16(1500)).unwrap();
        let node = tree.get(&steps).unwrap();
        match &node.data {
            NodeData::Leaf(Value::UInt16(v)) => assert_eq!(*v, 1500),
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn delete_removes_list_entry() {
        let mut tree = DataTree::new();
        let steps = xpath::parse("/m:interfaces/interface[name='eth0']/mtu").unwrap();
        tree.set(&steps, Value::UInt16(1500)).unwrap();
        let entry_steps = xpath::parse("/m:interfaces/interface[name='eth0']").unwrap();
        assert!(tree.delete(&entry_steps).unwrap());
        assert!(tree.get(&entry_steps).is_none());
    }

    #[test]
    fn enable_path_enables_ancestors() {
        let mut tree = DataTree::new();
        let steps = xpath::parse("/m:interfaces/interface[name='eth0']/mtu").unwrap();
        tree.set(&steps, Value::UInt16(1500)).unwrap();
        tree.enable_path(&steps).unwrap();
        assert!(tree.is_enabled(&steps));

        let other = xpath::parse("/m:interfaces/interface[name='eth1']/mtu").unwrap();
        assert!(!tree.is_enabled(&other));
    }

    #[test]
    fn move_up_swaps_list_order() {
        let mut tree = DataTree::new();
        let a = xpath::parse("/m:l/e[k='a']/v").unwrap();
        let b = xpath::parse("/m:l/e[k='b']/v").unwrap();
        tree.set(&a, Value::String("a".into())).unwrap();
        tree.set(&b, Value::String("b".into())).unwrap();

        let b_entry = xpath::parse("/m:l/e[k='b']").unwrap();
        tree.move_entry(&b_entry, yangd_protocol::MoveDirection::Up).unwrap();

        let l = tree.roots.iter().find(|n| n.name == "l").unwrap();
        match &l.data {
            NodeData::List(entries) => {
                assert_eq!(entries[0].keys, vec![("k".to_string(), "b".to_string())]);
            }
            _ => panic!("expected list"),
        }
    }
}
