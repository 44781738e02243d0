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

//! Ties the session manager, data manager, schema registry and
//! notification processor together behind one call:
//! [`Engine::dispatch`] takes a connection id and a wire [`Operation`]
//! and returns the body to put on the wire plus any notifications that
//! need fanning out. Everything socket/framing-specific lives in
//! [`crate::reactor`]; this module never touches a file descriptor.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, RwLock},
};

use tracing::instrument;
use yangd_protocol::{
    Notification, Operation, OperationKind, PathError, ResponseBody, SchemaInfo, ValueResult,
};

use crate::{
    data_manager::DataManager,
    error::{EngineError, EngineResult},
    notification,
    persistence,
    schema,
    session::{self, ConnectionKind},
    user::PeerCredentials,
};

pub struct Engine {
    sessions: Mutex<session::Manager>,
    data: DataManager,
    schema: Arc<RwLock<schema::Registry>>,
    notification: Arc<notification::Processor>,
    persistence: persistence::Manager,
    /// Destination addresses each connection has subscribed under, so
    /// a closing connection only drops the transient subscriptions it
    /// actually registered rather than every transient subscription in
    /// the process.
    connection_subscriptions: Mutex<HashMap<u32, Vec<String>>>,
}

impl Engine {
    pub fn new(schema_dir: PathBuf, data_dir: PathBuf) -> anyhow::Result<Self> {
        let registry = schema::Registry::load_dir(&schema_dir)?;
        let schema = Arc::new(RwLock::new(registry));
        let persistence = persistence::Manager::new(data_dir)?;
        let notification = Arc::new(load_subscriptions(&persistence, &schema));
        let data = DataManager::new(persistence.clone(), Arc::clone(&schema), Arc::clone(&notification));
        Ok(Engine {
            sessions: Mutex::new(session::Manager::new()),
            data,
            schema,
            notification,
            persistence,
            connection_subscriptions: Mutex::new(HashMap::new()),
        })
    }

    pub fn connection_start(
        &self,
        kind: ConnectionKind,
        peer: Option<PeerCredentials>,
    ) -> EngineResult<u32> {
        self.sessions.lock().unwrap().connection_start(kind, peer)
    }

    pub fn connection_close(&self, connection_id: u32) {
        self.sessions.lock().unwrap().connection_close(connection_id);
        if let Some(addrs) = self.connection_subscriptions.lock().unwrap().remove(&connection_id) {
            for addr in addrs {
                self.notification.unsubscribe_destination(&addr);
            }
        }
    }

    #[instrument(skip(self, operation))]
    pub fn dispatch(
        &self,
        connection_id: u32,
        session_id: u32,
        operation: Operation,
    ) -> EngineResult<(u32, ResponseBody, Vec<Notification>)> {
        let kind = operation.kind();
        let is_session_start = matches!(operation, Operation::SessionStart { .. });
        if !is_session_start {
            if let Ok(session) = self.sessions.lock().unwrap().session_mut(session_id) {
                session.sequencer.push(kind);
            }
        }

        let result = self.dispatch_inner(connection_id, session_id, operation);

        if !is_session_start {
            if let Ok(session) = self.sessions.lock().unwrap().session_mut(session_id) {
                session.sequencer.pop_expected(kind);
            }
        }

        result
    }

    fn dispatch_inner(
        &self,
        connection_id: u32,
        session_id: u32,
        operation: Operation,
    ) -> EngineResult<(u32, ResponseBody, Vec<Notification>)> {
        match operation {
            Operation::SessionStart { datastore, user_name } => {
                let new_id = self.sessions.lock().unwrap().session_create(connection_id, datastore, user_name)?;
                Ok((new_id, ResponseBody::SessionStarted { session_id: new_id }, Vec::new()))
            }
            Operation::SessionStop => {
                self.data.discard_all(session_id);
                self.data.release_session_locks(session_id);
                self.sessions.lock().unwrap().session_stop(session_id)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::SessionRefresh => {
                self.sessions.lock().unwrap().session(session_id)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::ListSchemas => {
                let infos: Vec<SchemaInfo> = self.schema.read().unwrap().list();
                Ok((session_id, ResponseBody::Schemas(infos), Vec::new()))
            }
            Operation::GetSchema { module, .. } => {
                let registry = self.schema.read().unwrap();
                let m = registry.get(&module).ok_or_else(|| EngineError::UnknownModel(module.clone()))?;
                let summary = format!("{:#?}", m.def());
                Ok((session_id, ResponseBody::SchemaContent(summary.into_bytes()), Vec::new()))
            }
            Operation::GetItem { xpath } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                let value = self.data.get_item(session_id, datastore, &xpath)?;
                let body = ResponseBody::Value(ValueResult { xpath, value, default: false });
                Ok((session_id, body, Vec::new()))
            }
            Operation::GetItems { xpath } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                let values = self.data.get_items(session_id, datastore, &xpath)?;
                let body = ResponseBody::Values(
                    values.into_iter().map(|(xpath, value)| ValueResult { xpath, value, default: false }).collect(),
                );
                Ok((session_id, body, Vec::new()))
            }
            Operation::GetItemsIter { xpath, offset, limit, .. } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                let values = self.data.get_items_iter(session_id, datastore, &xpath, offset, limit)?;
                let body = ResponseBody::Values(
                    values.into_iter().map(|(xpath, value)| ValueResult { xpath, value, default: false }).collect(),
                );
                Ok((session_id, body, Vec::new()))
            }
            Operation::SetItem { xpath, value, options } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                self.data.set_item(session_id, datastore, &xpath, value, options)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::DeleteItem { xpath, options } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                self.data.delete_item(session_id, datastore, &xpath, options)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::MoveItem { xpath, direction } => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                self.data.move_item(session_id, datastore, &xpath, direction)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::Validate => {
                let modules = self.schema.read().unwrap().module_names();
                let mut errors = Vec::new();
                for module in modules {
                    if let Err(EngineError::ValidationFailed(paths)) = self.data.validate(session_id, &module) {
                        errors.extend(paths.into_iter().map(|(path, message)| PathError { path, message }));
                    }
                }
                if errors.is_empty() {
                    Ok((session_id, ResponseBody::Empty, Vec::new()))
                } else {
                    Ok((session_id, ResponseBody::Errors(errors), Vec::new()))
                }
            }
            Operation::Commit => {
                let notifications = self.data.commit(session_id)?;
                Ok((session_id, ResponseBody::Empty, notifications))
            }
            Operation::DiscardChanges => {
                self.data.discard_all(session_id);
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::LockModule { module } => {
                self.data.lock_module(session_id, &module)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::UnlockModule { module } => {
                self.data.unlock_module(session_id, &module)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::LockDatastore => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                self.data.lock_datastore(session_id, datastore)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::UnlockDatastore => {
                let datastore = self.sessions.lock().unwrap().session(session_id)?.datastore;
                self.data.unlock_datastore(session_id, datastore)?;
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::FeatureEnable { module, feature, enable } => {
                {
                    let mut registry = self.schema.write().unwrap();
                    registry.set_feature_enabled(&module, &feature, enable);
                }
                self.save_side_data(&module)?;
                let notifications = self.notification.feature_enable_notify(&module, &feature, enable);
                Ok((session_id, ResponseBody::Empty, notifications))
            }
            Operation::ModuleInstall { module, revision, install } => {
                if !install {
                    self.schema.write().unwrap().remove_module(&module).map_err(EngineError::Other)?;
                    self.persistence.remove_module_files(&module).map_err(EngineError::Other)?;
                }
                let notifications = self.notification.module_install_notify(&module, revision, install);
                Ok((session_id, ResponseBody::Empty, notifications))
            }
            Operation::Subscribe { event_kind, destination_address, destination_id, module, xpath } => {
                self.notification.subscribe(
                    notification::PersistedSubscription {
                        event_kind,
                        destination_address: destination_address.clone(),
                        destination_id,
                        module: module.clone(),
                        xpath,
                    },
                    true,
                );
                self.connection_subscriptions
                    .lock()
                    .unwrap()
                    .entry(connection_id)
                    .or_default()
                    .push(destination_address);
                if let Some(module) = module {
                    self.save_side_data(&module)?;
                }
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::Unsubscribe { event_kind, destination_address, destination_id, module } => {
                self.notification.unsubscribe(event_kind, &destination_address, destination_id, module.as_deref());
                Ok((session_id, ResponseBody::Empty, Vec::new()))
            }
            Operation::GetLastErrors => {
                let sessions = self.sessions.lock().unwrap();
                let session = sessions.session(session_id)?;
                let errors = session
                    .last_errors
                    .iter()
                    .map(|(path, message)| PathError { path: path.clone(), message: message.clone() })
                    .collect();
                Ok((session_id, ResponseBody::Errors(errors), Vec::new()))
            }
        }
    }

    pub fn record_error(&self, session_id: u32, kind: OperationKind, message: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Ok(session) = sessions.session_mut(session_id) {
                session.record_error(kind.to_string(), message.to_string());
            }
        }
    }

    fn save_side_data(&self, module: &str) -> EngineResult<()> {
        let registry = self.schema.read().unwrap();
        let side = persistence::SideData {
            enabled_features: registry
                .get(module)
                .map(|m| {
                    m.def()
                        .features
                        .iter()
                        .filter(|f| registry.is_feature_enabled(module, f))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            subscriptions: self.notification.persistent_subscriptions(module),
        };
        self.persistence.save_side_data(module, &side).map_err(EngineError::Other)
    }
}

fn load_subscriptions(
    persistence: &persistence::Manager,
    schema: &Arc<RwLock<schema::Registry>>,
) -> notification::Processor {
    let modules = schema.read().unwrap().module_names();
    let mut subs = Vec::new();
    for module in &modules {
        if let Ok(side) = persistence.load_side_data(module) {
            subs.extend(side.subscriptions);
        }
    }
    notification::Processor::with_persisted(subs)
}
