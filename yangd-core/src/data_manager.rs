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

//! The data manager. Owns the in-memory `running` cache for every
//! loaded module, hands each session its own working copy to edit
//! against, and runs the seven-phase commit pipeline that turns a
//! working copy's operation log into a durable change to `running`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};

use tracing::{info, instrument, warn};
use yangd_protocol::{Datastore, EditOptions, MoveDirection, Notification, Value};

use crate::{
    consts::{COMMIT_LOCK_RETRY_INTERVAL, COMMIT_LOCK_RETRY_TIMEOUT},
    error::{EngineError, EngineResult},
    notification,
    persistence,
    schema::{self, tree::DataTree, xpath, NodeDef, NodeKind},
};

#[derive(Debug, Clone)]
enum Op {
    Set { xpath: String, value: Value },
    Delete { xpath: String },
    Move { xpath: String, direction: MoveDirection },
}

struct WorkingCopy {
    tree: DataTree,
    op_log: Vec<Op>,
}

/// Key for a session's working copy: one per (session, module) pair, so
/// editing two modules in the same session never cross-contaminates
/// their operation logs.
type WcKey = (u32, String);

pub struct DataManager {
    persistence: persistence::Manager,
    schema: Arc<RwLock<schema::Registry>>,
    notification: Arc<notification::Processor>,
    running: Mutex<HashMap<String, DataTree>>,
    module_locks: Mutex<HashMap<String, u32>>,
    datastore_locks: Mutex<HashMap<Datastore, u32>>,
    commit_lock: Mutex<()>,
    working_copies: Mutex<HashMap<WcKey, WorkingCopy>>,
}

impl DataManager {
    pub fn new(
        persistence: persistence::Manager,
        schema: Arc<RwLock<schema::Registry>>,
        notification: Arc<notification::Processor>,
    ) -> Self {
        DataManager {
            persistence,
            schema,
            notification,
            running: Mutex::new(HashMap::new()),
            module_locks: Mutex::new(HashMap::new()),
            datastore_locks: Mutex::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            working_copies: Mutex::new(HashMap::new()),
        }
    }

    fn running_snapshot(&self, module: &str) -> anyhow::Result<DataTree> {
        let mut running = self.running.lock().unwrap();
        if let Some(tree) = running.get(module) {
            return Ok(tree.clone());
        }
        let tree = self.persistence.load_tree(module, Datastore::Running)?;
        running.insert(module.to_string(), tree.clone());
        Ok(tree)
    }

    fn module_of(&self, xpath: &str) -> EngineResult<String> {
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        let first = steps.first().ok_or_else(|| EngineError::BadElement(xpath.to_string()))?;
        first.module.clone().ok_or_else(|| EngineError::BadElement(xpath.to_string()))
    }

    fn node_def_for(&self, registry: &schema::Registry, steps: &[xpath::Step]) -> EngineResult<()> {
        self.node_def_at(registry, steps)?;
        Ok(())
    }

    /// Resolve `steps` to the `NodeDef` of its final step, confirming
    /// every step in between exists in the schema along the way.
    fn node_def_at<'a>(
        &self,
        registry: &'a schema::Registry,
        steps: &[xpath::Step],
    ) -> EngineResult<&'a NodeDef> {
        let module_name = steps[0].module.clone().unwrap();
        let module = registry
            .get(&module_name)
            .ok_or_else(|| EngineError::UnknownModel(module_name.clone()))?;
        let mut node: Option<&NodeDef> = module.def().top_level(&steps[0].name);
        if node.is_none() {
            return Err(EngineError::BadElement(steps[0].name.clone()));
        }
        for step in &steps[1..] {
            node = node.and_then(|n| n.child(&step.name));
            if node.is_none() {
                return Err(EngineError::BadElement(step.name.clone()));
            }
        }
        node.ok_or_else(|| EngineError::BadElement(steps[0].name.clone()))
    }

    /// Reject a set/delete whose final step names a list key leaf; keys
    /// are only ever modified as part of creating or deleting the whole
    /// list entry they identify.
    fn reject_key_step(&self, registry: &schema::Registry, steps: &[xpath::Step]) -> EngineResult<()> {
        if steps.len() < 2 {
            return Ok(());
        }
        let parent_steps = &steps[..steps.len() - 1];
        let last = &steps[steps.len() - 1];
        if let Ok(parent_def) = self.node_def_at(registry, parent_steps) {
            if parent_def.kind == NodeKind::List && parent_def.keys.iter().any(|k| k == &last.name) {
                return Err(EngineError::InvalidArg(format!(
                    "{} is a list key and cannot be modified directly",
                    last.name
                )));
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn ensure_working_copy(&self, session_id: u32, module: &str, datastore: Datastore) -> anyhow::Result<()> {
        let mut wcs = self.working_copies.lock().unwrap();
        let key = (session_id, module.to_string());
        if wcs.contains_key(&key) {
            return Ok(());
        }
        let tree = match datastore {
            Datastore::Running | Datastore::Candidate => self.running_snapshot(module)?,
            Datastore::Startup => self.persistence.load_tree(module, Datastore::Startup)?,
        };
        wcs.insert(key, WorkingCopy { tree, op_log: Vec::new() });
        Ok(())
    }

    #[instrument(skip(self, value))]
    pub fn set_item(
        &self,
        session_id: u32,
        datastore: Datastore,
        xpath: &str,
        value: Option<Value>,
        options: EditOptions,
    ) -> EngineResult<()> {
        let module = self.module_of(xpath)?;
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        {
            let registry = self.schema.read().unwrap();
            self.node_def_for(&registry, &steps)?;
            self.reject_key_step(&registry, &steps)?;
        }
        self.ensure_working_copy(session_id, &module, datastore)
            .map_err(EngineError::Other)?;

        let mut wcs = self.working_copies.lock().unwrap();
        let wc = wcs.get_mut(&(session_id, module.clone())).unwrap();

        if options.strict && wc.tree.get(&steps).is_some() {
            return Err(EngineError::DataExists(xpath.to_string()));
        }

        let value = value.ok_or_else(|| EngineError::InvalidArg("set-item requires a value".into()))?;
        wc.tree.set(&steps, value.clone()).map_err(EngineError::Other)?;
        if datastore == Datastore::Running {
            wc.tree.enable_path(&steps).map_err(EngineError::Other)?;
        }
        wc.op_log.push(Op::Set { xpath: xpath.to_string(), value });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_item(
        &self,
        session_id: u32,
        datastore: Datastore,
        xpath: &str,
        options: EditOptions,
    ) -> EngineResult<()> {
        let module = self.module_of(xpath)?;
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        {
            let registry = self.schema.read().unwrap();
            self.reject_key_step(&registry, &steps)?;
        }
        self.ensure_working_copy(session_id, &module, datastore)
            .map_err(EngineError::Other)?;

        let mut wcs = self.working_copies.lock().unwrap();
        let wc = wcs.get_mut(&(session_id, module.clone())).unwrap();

        if options.non_recursive && wc.tree.has_children(&steps) {
            return Err(EngineError::InvalidArg(format!(
                "{xpath} has children; non-recursive delete refused"
            )));
        }

        let existed = wc.tree.delete(&steps).map_err(EngineError::Other)?;
        if !existed && options.strict {
            return Err(EngineError::DataMissing(xpath.to_string()));
        }
        wc.op_log.push(Op::Delete { xpath: xpath.to_string() });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_item(
        &self,
        session_id: u32,
        datastore: Datastore,
        xpath: &str,
        direction: MoveDirection,
    ) -> EngineResult<()> {
        let module = self.module_of(xpath)?;
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        {
            let registry = self.schema.read().unwrap();
            let def = self.node_def_at(&registry, &steps)?;
            if def.kind != NodeKind::List || !def.user_ordered {
                return Err(EngineError::InvalidArg(format!(
                    "{xpath} does not name a user-ordered list entry"
                )));
            }
        }
        self.ensure_working_copy(session_id, &module, datastore)
            .map_err(EngineError::Other)?;

        let mut wcs = self.working_copies.lock().unwrap();
        let wc = wcs.get_mut(&(session_id, module.clone())).unwrap();
        wc.tree.move_entry(&steps, direction).map_err(EngineError::Other)?;
        wc.op_log.push(Op::Move { xpath: xpath.to_string(), direction });
        Ok(())
    }

    pub fn get_item(&self, session_id: u32, datastore: Datastore, xpath: &str) -> EngineResult<Value> {
        let module = self.module_of(xpath)?;
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        self.ensure_working_copy(session_id, &module, datastore)
            .map_err(EngineError::Other)?;

        let wcs = self.working_copies.lock().unwrap();
        let wc = wcs.get(&(session_id, module)).unwrap();
        if datastore == Datastore::Running && !wc.tree.is_enabled(&steps) {
            return Err(EngineError::NotFound(xpath.to_string()));
        }
        match &wc.tree.get(&steps).ok_or_else(|| EngineError::NotFound(xpath.to_string()))?.data {
            crate::schema::tree::NodeData::Leaf(v) => Ok(v.clone()),
            _ => Err(EngineError::BadElement(format!("{xpath} is not a leaf"))),
        }
    }

    /// Materialize matches for `xpath` under an offset/limit window,
    /// re-walking the working copy on every call rather than keeping a
    /// live cursor. Offsets past the end of the result set are clamped
    /// rather than treated as an error, and each call re-derives the
    /// set fresh -- there is no server-side iterator state to go stale
    /// between calls.
    pub fn get_items_iter(
        &self,
        session_id: u32,
        datastore: Datastore,
        xpath: &str,
        offset: u32,
        limit: u32,
    ) -> EngineResult<Vec<(String, Value)>> {
        let all = self.get_items(session_id, datastore, xpath)?;
        let offset = (offset as usize).min(all.len());
        let end = if limit == 0 { all.len() } else { (offset + limit as usize).min(all.len()) };
        Ok(all[offset..end].to_vec())
    }

    /// Evaluate `xpath` as a query (a list step with no key predicate
    /// matches every instance) and return every leaf it reaches, each
    /// labeled with its own fully-resolved path.
    pub fn get_items(
        &self,
        session_id: u32,
        datastore: Datastore,
        xpath: &str,
    ) -> EngineResult<Vec<(String, Value)>> {
        let module = self.module_of(xpath)?;
        let steps = xpath::parse(xpath).map_err(|e| EngineError::BadElement(e.to_string()))?;
        self.ensure_working_copy(session_id, &module, datastore)
            .map_err(EngineError::Other)?;

        let wcs = self.working_copies.lock().unwrap();
        let wc = wcs.get(&(session_id, module)).unwrap();

        let mut results = Vec::new();
        for (resolved, node) in wc.tree.get_all(&steps) {
            if datastore == Datastore::Running && !wc.tree.is_enabled(&resolved) {
                continue;
            }
            if let crate::schema::tree::NodeData::Leaf(v) = &node.data {
                results.push((xpath::to_xpath(&resolved), v.clone()));
            }
        }
        Ok(results)
    }

    pub fn discard_changes(&self, session_id: u32, module: &str) {
        self.working_copies.lock().unwrap().remove(&(session_id, module.to_string()));
    }

    pub fn discard_all(&self, session_id: u32) {
        self.working_copies.lock().unwrap().retain(|(sid, _), _| *sid != session_id);
    }

    #[instrument(skip(self))]
    pub fn validate(&self, session_id: u32, module: &str) -> EngineResult<()> {
        let wcs = self.working_copies.lock().unwrap();
        let Some(wc) = wcs.get(&(session_id, module.to_string())) else { return Ok(()) };
        let registry = self.schema.read().unwrap();
        let def = registry.get(module).ok_or_else(|| EngineError::UnknownModel(module.to_string()))?;
        let mut missing = Vec::new();
        check_mandatory(&def.def().nodes, &wc.tree.roots, "", &mut missing);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationFailed(
                missing.into_iter().map(|path| (path, "mandatory node missing".to_string())).collect(),
            ))
        }
    }

    /// Run the seven-phase commit pipeline for every module the session
    /// has a pending working copy for, returning the module-change
    /// notifications to dispatch.
    #[instrument(skip(self))]
    pub fn commit(&self, session_id: u32) -> EngineResult<Vec<Notification>> {
        let modules: Vec<String> = {
            let wcs = self.working_copies.lock().unwrap();
            wcs.keys().filter(|(sid, _)| *sid == session_id).map(|(_, m)| m.clone()).collect()
        };

        for module in &modules {
            self.validate(session_id, module)?;
        }

        let deadline = Instant::now() + COMMIT_LOCK_RETRY_TIMEOUT;
        let _commit_guard = loop {
            match self.commit_lock.try_lock() {
                Ok(guard) => break guard,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(COMMIT_LOCK_RETRY_INTERVAL);
                }
                Err(_) => return Err(EngineError::CommitFailed("commit lock busy".into())),
            }
        };

        // Phase 5: replay every module's operation log against a fresh
        // copy of its on-disk content and re-validate it. Nothing is
        // persisted in this loop, so a later module failing re-validation
        // never leaves an earlier module's on-disk content changed.
        let mut prepared = Vec::new();
        for module in &modules {
            let mut fresh = self.persistence.load_tree(module, Datastore::Running).map_err(EngineError::Other)?;

            let op_log = {
                let wcs = self.working_copies.lock().unwrap();
                wcs.get(&(session_id, module.clone())).unwrap().op_log.clone()
            };
            for op in &op_log {
                replay(&mut fresh, op).map_err(|e| EngineError::CommitFailed(e.to_string()))?;
            }

            {
                let registry = self.schema.read().unwrap();
                let def = registry
                    .get(module)
                    .ok_or_else(|| EngineError::UnknownModel(module.clone()))?;
                let mut missing = Vec::new();
                check_mandatory(&def.def().nodes, &fresh.roots, "", &mut missing);
                if !missing.is_empty() {
                    return Err(EngineError::ValidationFailed(
                        missing.into_iter().map(|path| (path, "mandatory node missing".to_string())).collect(),
                    ));
                }
            }

            prepared.push((module.clone(), fresh));
        }

        // Phase 6: every module passed re-validation; persist all of them.
        let mut notifications = Vec::new();
        for (module, fresh) in prepared {
            self.persistence
                .save_tree(&module, Datastore::Running, &fresh)
                .map_err(|e| EngineError::CommitFailed(e.to_string()))?;

            self.running.lock().unwrap().insert(module.clone(), fresh);
            notifications.extend(self.notification.module_change_notify(&module));
        }

        self.discard_all(session_id);
        info!(modules = ?modules, "commit complete");
        Ok(notifications)
    }

    pub fn lock_module(&self, session_id: u32, module: &str) -> EngineResult<()> {
        let mut locks = self.module_locks.lock().unwrap();
        match locks.get(module) {
            Some(holder) if *holder != session_id => Err(EngineError::Locked(*holder)),
            _ => {
                locks.insert(module.to_string(), session_id);
                Ok(())
            }
        }
    }

    pub fn unlock_module(&self, session_id: u32, module: &str) -> EngineResult<()> {
        let mut locks = self.module_locks.lock().unwrap();
        match locks.get(module) {
            Some(holder) if *holder == session_id => {
                locks.remove(module);
                Ok(())
            }
            Some(holder) => Err(EngineError::Locked(*holder)),
            None => Err(EngineError::NotFound(format!("module {module} is not locked"))),
        }
    }

    pub fn lock_datastore(&self, session_id: u32, datastore: Datastore) -> EngineResult<()> {
        let mut locks = self.datastore_locks.lock().unwrap();
        match locks.get(&datastore) {
            Some(holder) if *holder != session_id => Err(EngineError::Locked(*holder)),
            _ => {
                locks.insert(datastore, session_id);
                Ok(())
            }
        }
    }

    pub fn unlock_datastore(&self, session_id: u32, datastore: Datastore) -> EngineResult<()> {
        let mut locks = self.datastore_locks.lock().unwrap();
        match locks.get(&datastore) {
            Some(holder) if *holder == session_id => {
                locks.remove(&datastore);
                Ok(())
            }
            Some(holder) => Err(EngineError::Locked(*holder)),
            None => Err(EngineError::NotFound("datastore is not locked".into())),
        }
    }

    /// Release every lock a closing session held, rather than making
    /// every caller remember to unlock before disconnecting.
    pub fn release_session_locks(&self, session_id: u32) {
        let mut module_locks = self.module_locks.lock().unwrap();
        let released: Vec<String> = module_locks
            .iter()
            .filter(|(_, holder)| **holder == session_id)
            .map(|(m, _)| m.clone())
            .collect();
        module_locks.retain(|_, holder| *holder != session_id);
        drop(module_locks);

        self.datastore_locks.lock().unwrap().retain(|_, holder| *holder != session_id);

        if !released.is_empty() {
            warn!(session_id, ?released, "releasing module locks on session teardown");
        }
    }
}

fn replay(tree: &mut DataTree, op: &Op) -> anyhow::Result<()> {
    match op {
        Op::Set { xpath, value } => {
            let steps = xpath::parse(xpath)?;
            tree.set(&steps, value.clone())
        }
        Op::Delete { xpath } => {
            let steps = xpath::parse(xpath)?;
            tree.delete(&steps).map(|_| ())
        }
        Op::Move { xpath, direction } => {
            let steps = xpath::parse(xpath)?;
            tree.move_entry(&steps, *direction)
        }
    }
}

/// Walk schema + data in lockstep, accumulating the path of every
/// mandatory leaf that's missing a value rather than stopping at the
/// first one. List nodes are checked once per instance present in the
/// data; a schema-declared list with zero instances is vacuously valid
/// (YANG only requires the leaves *within* an instance, not that an
/// instance exists, unless `min-elements` is modeled -- out of scope
/// here).
fn check_mandatory(
    defs: &[NodeDef],
    nodes: &[crate::schema::tree::Node],
    prefix: &str,
    missing: &mut Vec<String>,
) {
    for def in defs {
        let path = if prefix.is_empty() { def.name.clone() } else { format!("{prefix}/{}", def.name) };
        if def.kind == NodeKind::List {
            for entry in nodes.iter().filter(|n| n.name == def.name) {
                if let crate::schema::tree::NodeData::Inner(children) = &entry.data {
                    check_mandatory(&def.children, children, &path, missing);
                }
            }
            continue;
        }
        let Some(node) = nodes.iter().find(|n| n.name == def.name) else {
            if def.mandatory {
                missing.push(path);
            }
            continue;
        };
        match (&def.leaf_type, &node.data) {
            (Some(_), crate::schema::tree::NodeData::Leaf(_)) => {}
            (None, crate::schema::tree::NodeData::Inner(children)) => {
                check_mandatory(&def.children, children, &path, missing);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn engine(dir: &std::path::Path) -> DataManager {
        let persistence = persistence::Manager::new(dir.to_path_buf()).unwrap();
        let mut registry = schema::Registry::new();
        registry.insert(Arc::new(demo_module()));
        DataManager::new(persistence, Arc::new(RwLock::new(registry)), Arc::new(notification::Processor::new()))
    }

    fn demo_module() -> schema::toml_schema::TomlSchemaModule {
        let toml = r#"
            [module]
            name = "m"
            namespace = "urn:m"
            prefix = "m"

            [[node]]
            path = "a"
            kind = "leaf"
            type = "uint16"
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.toml");
        std::fs::write(&path, toml).unwrap();
        let module = schema::toml_schema::load(&path).unwrap();
        std::mem::forget(dir);
        module
    }

    #[test]
    fn set_then_get_within_session_sees_uncommitted_edit() {
        let dir = tempfile::tempdir().unwrap();
        let dm = engine(dir.path());
        dm.set_item(1, Datastore::Candidate, "/m:a", Some(Value::UInt16(7)), EditOptions::default())
            .unwrap();
        let v = dm.get_item(1, Datastore::Candidate, "/m:a").unwrap();
        assert_eq!(v, Value::UInt16(7));
    }

    #[test]
    fn commit_persists_and_clears_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let dm = engine(dir.path());
        dm.set_item(1, Datastore::Candidate, "/m:a", Some(Value::UInt16(9)), EditOptions::default())
            .unwrap();
        dm.commit(1).unwrap();

        // A second session starting fresh should see the committed value.
        let v = dm.get_item(2, Datastore::Running, "/m:a").unwrap();
        assert_eq!(v, Value::UInt16(9));
    }

    #[test]
    fn module_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let dm = engine(dir.path());
        dm.lock_module(1, "m").unwrap();
        assert!(matches!(dm.lock_module(2, "m"), Err(EngineError::Locked(1))));
        dm.unlock_module(1, "m").unwrap();
        dm.lock_module(2, "m").unwrap();
    }

    #[test]
    fn sessions_do_not_see_each_others_uncommitted_edits() {
        let dir = tempfile::tempdir().unwrap();
        let dm = engine(dir.path());
        dm.set_item(1, Datastore::Candidate, "/m:a", Some(Value::UInt16(1)), EditOptions::default())
            .unwrap();
        let err = dm.get_item(2, Datastore::Running, "/m:a").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    fn geo_engine(dir: &std::path::Path) -> DataManager {
        let persistence = persistence::Manager::new(dir.to_path_buf()).unwrap();
        let mut registry = schema::Registry::new();
        registry.insert(Arc::new(geo_module()));
        DataManager::new(persistence, Arc::new(RwLock::new(registry)), Arc::new(notification::Processor::new()))
    }

    fn geo_module() -> schema::toml_schema::TomlSchemaModule {
        let toml = r#"
            [module]
            name = "g"
            namespace = "urn:g"
            prefix = "g"

            [[node]]
            path = "location"
            kind = "container"

            [[node]]
            path = "location.name"
            kind = "leaf"
            type = "string"

            [[node]]
            path = "location.latitude"
            kind = "leaf"
            type = "string"
            mandatory = true

            [[node]]
            path = "location.longitude"
            kind = "leaf"
            type = "string"
            mandatory = true

            [[node]]
            path = "items"
            kind = "list"
            keys = ["id"]
            user_ordered = true

            [[node]]
            path = "items.id"
            kind = "leaf"
            type = "string"
            mandatory = true

            [[node]]
            path = "items.val"
            kind = "leaf"
            type = "uint16"

            [[node]]
            path = "fixed"
            kind = "list"
            keys = ["id"]

            [[node]]
            path = "fixed.id"
            kind = "leaf"
            type = "string"
            mandatory = true
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.toml");
        std::fs::write(&path, toml).unwrap();
        let module = schema::toml_schema::load(&path).unwrap();
        std::mem::forget(dir);
        module
    }

    #[test]
    fn validate_reports_every_missing_mandatory_path() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:location/name",
            Some(Value::String("home".into())),
            EditOptions::default(),
        )
        .unwrap();

        let err = dm.validate(1, "g").unwrap_err();
        let EngineError::ValidationFailed(paths) = err else { panic!("expected ValidationFailed") };
        let paths: Vec<String> = paths.into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"location/latitude".to_string()));
        assert!(paths.contains(&"location/longitude".to_string()));
    }

    #[test]
    fn commit_fails_with_both_missing_paths_and_leaves_running_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:location/name",
            Some(Value::String("home".into())),
            EditOptions::default(),
        )
        .unwrap();

        let err = dm.commit(1).unwrap_err();
        let EngineError::ValidationFailed(paths) = err else { panic!("expected ValidationFailed") };
        assert_eq!(paths.len(), 2);

        let err2 = dm.get_item(2, Datastore::Running, "/g:location/name").unwrap_err();
        assert!(matches!(err2, EngineError::NotFound(_)));
    }

    #[test]
    fn move_item_rejects_non_user_ordered_list() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:fixed[id='a']/id",
            Some(Value::String("a".into())),
            EditOptions::default(),
        )
        .unwrap();
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:fixed[id='b']/id",
            Some(Value::String("b".into())),
            EditOptions::default(),
        )
        .unwrap();

        let err = dm.move_item(1, Datastore::Candidate, "/g:fixed[id='b']", MoveDirection::Up).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn move_item_rejects_non_list_path() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        let err =
            dm.move_item(1, Datastore::Candidate, "/g:location/name", MoveDirection::Up).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn delete_item_non_recursive_refuses_node_with_children() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:location/name",
            Some(Value::String("home".into())),
            EditOptions::default(),
        )
        .unwrap();

        let options = EditOptions { non_recursive: true, ..EditOptions::default() };
        let err = dm.delete_item(1, Datastore::Candidate, "/g:location", options).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn set_item_rejects_direct_write_to_list_key() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:items[id='a']/val",
            Some(Value::UInt16(1)),
            EditOptions::default(),
        )
        .unwrap();

        let err = dm
            .set_item(1, Datastore::Candidate, "/g:items[id='a']/id", Some(Value::String("z".into())), EditOptions::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn delete_item_rejects_direct_delete_of_list_key() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:items[id='a']/val",
            Some(Value::UInt16(1)),
            EditOptions::default(),
        )
        .unwrap();

        let err = dm.delete_item(1, Datastore::Candidate, "/g:items[id='a']/id", EditOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn get_items_returns_one_result_per_list_instance() {
        let dir = tempfile::tempdir().unwrap();
        let dm = geo_engine(dir.path());
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:items[id='a']/val",
            Some(Value::UInt16(1)),
            EditOptions::default(),
        )
        .unwrap();
        dm.set_item(
            1,
            Datastore::Candidate,
            "/g:items[id='b']/val",
            Some(Value::UInt16(2)),
            EditOptions::default(),
        )
        .unwrap();

        let results = dm.get_items(1, Datastore::Candidate, "/g:items/val").unwrap();
        assert_eq!(results.len(), 2);
        let values: Vec<Value> = results.into_iter().map(|(_, v)| v).collect();
        assert!(values.contains(&Value::UInt16(1)));
        assert!(values.contains(&Value::UInt16(2)));
    }
}
