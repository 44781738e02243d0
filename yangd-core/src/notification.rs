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

//! The notification processor. Tracks who is subscribed to what and
//! turns datastore events into the [`Notification`] frames the reactor
//! hands off to each destination's outbound queue. Subscriptions come
//! in two flavors: transient ones that die with the subscribing
//! session, and persistent ones that the persistence manager writes
//! into a module's side-data file so they survive a daemon restart.

use std::sync::RwLock;

use serde_derive::{Deserialize, Serialize};
use tracing::instrument;
use yangd_protocol::{EventKind, Notification, NotificationBody};

/// A subscription as it is persisted to a module's side-data file.
/// Kept serde-friendly and independent of [`Subscription`]'s runtime
/// fields (there are none extra today, but the two are allowed to
/// diverge without disturbing the wire format the persistence manager
/// writes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSubscription {
    pub event_kind: EventKind,
    pub destination_address: String,
    pub destination_id: u32,
    pub module: Option<String>,
    pub xpath: Option<String>,
}

#[derive(Debug, Clone)]
struct Subscription {
    persisted: PersistedSubscription,
    /// Transient subscriptions are dropped when their owning
    /// connection closes; persistent ones only via an explicit
    /// `Unsubscribe`.
    transient: bool,
}

pub struct Processor {
    subs: RwLock<Vec<Subscription>>,
}

impl Processor {
    pub fn new() -> Self {
        Processor { subs: RwLock::new(Vec::new()) }
    }

    /// Rebuild the persistent half of the subscriber list from what the
    /// persistence manager loaded off disk at startup.
    pub fn with_persisted(persisted: Vec<PersistedSubscription>) -> Self {
        let subs =
            persisted.into_iter().map(|persisted| Subscription { persisted, transient: false }).collect();
        Processor { subs: RwLock::new(subs) }
    }

    #[instrument(skip(self))]
    pub fn subscribe(&self, sub: PersistedSubscription, transient: bool) {
        let mut subs = self.subs.write().unwrap();
        if !subs.iter().any(|s| s.persisted == sub) {
            subs.push(Subscription { persisted: sub, transient });
        }
    }

    #[instrument(skip(self))]
    pub fn unsubscribe(
        &self,
        event_kind: EventKind,
        destination_address: &str,
        destination_id: u32,
        module: Option<&str>,
    ) {
        let mut subs = self.subs.write().unwrap();
        subs.retain(|s| {
            !(s.persisted.event_kind == event_kind
                && s.persisted.destination_address == destination_address
                && s.persisted.destination_id == destination_id
                && s.persisted.module.as_deref() == module)
        });
    }

    /// Drop every transient subscription owned by a destination whose
    /// connection just closed. Persistent subscriptions survive.
    #[instrument(skip(self))]
    pub fn unsubscribe_destination(&self, destination_address: &str) {
        let mut subs = self.subs.write().unwrap();
        subs.retain(|s| !(s.transient && s.persisted.destination_address == destination_address));
    }

    /// Subscriptions that should be written into a module's side-data
    /// file by the persistence manager.
    pub fn persistent_subscriptions(&self, module: &str) -> Vec<PersistedSubscription> {
        self.subs
            .read()
            .unwrap()
            .iter()
            .filter(|s| !s.transient && s.persisted.module.as_deref() == Some(module))
            .map(|s| s.persisted.clone())
            .collect()
    }

    pub fn module_install_notify(
        &self,
        module: &str,
        revision: Option<String>,
        installed: bool,
    ) -> Vec<Notification> {
        self.fan_out(EventKind::ModuleInstall, None, |s| {
            Notification {
                event_kind: EventKind::ModuleInstall,
                destination_address: s.persisted.destination_address.clone(),
                destination_id: s.persisted.destination_id,
                body: NotificationBody::ModuleInstall {
                    module: module.to_string(),
                    revision: revision.clone(),
                    installed,
                },
            }
        })
    }

    pub fn feature_enable_notify(&self, module: &str, feature: &str, enabled: bool) -> Vec<Notification> {
        self.fan_out(EventKind::FeatureEnable, None, |s| Notification {
            event_kind: EventKind::FeatureEnable,
            destination_address: s.persisted.destination_address.clone(),
            destination_id: s.persisted.destination_id,
            body: NotificationBody::FeatureEnable {
                module: module.to_string(),
                feature: feature.to_string(),
                enabled,
            },
        })
    }

    pub fn module_change_notify(&self, module: &str) -> Vec<Notification> {
        self.fan_out(EventKind::ModuleChange, Some(module), |s| Notification {
            event_kind: EventKind::ModuleChange,
            destination_address: s.persisted.destination_address.clone(),
            destination_id: s.persisted.destination_id,
            body: NotificationBody::ModuleChange { module: module.to_string() },
        })
    }

    fn fan_out(
        &self,
        event_kind: EventKind,
        module: Option<&str>,
        build: impl Fn(&Subscription) -> Notification,
    ) -> Vec<Notification> {
        self.subs
            .read()
            .unwrap()
            .iter()
            .filter(|s| {
                s.persisted.event_kind == event_kind
                    && match module {
                        Some(m) => s.persisted.module.as_deref().is_none_or(|sm| sm == m),
                        None => true,
                    }
            })
            .map(build)
            .collect()
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(event_kind: EventKind, module: Option<&str>) -> PersistedSubscription {
        PersistedSubscription {
            event_kind,
            destination_address: "/tmp/sub.sock".into(),
            destination_id: 1,
            module: module.map(String::from),
            xpath: None,
        }
    }

    #[test]
    fn module_change_notify_matches_subscribed_module_only() {
        let np = Processor::new();
        np.subscribe(sub(EventKind::ModuleChange, Some("if-mod")), true);
        np.subscribe(sub(EventKind::ModuleChange, Some("other-mod")), true);

        let notifs = np.module_change_notify("if-mod");
        assert_eq!(notifs.len(), 1);
    }

    #[test]
    fn unsubscribe_destination_drops_only_transient() {
        let np = Processor::new();
        np.subscribe(sub(EventKind::ModuleInstall, None), true);
        np.subscribe(
            PersistedSubscription {
                destination_address: "/tmp/other.sock".into(),
                ..sub(EventKind::ModuleInstall, None)
            },
            false,
        );

        np.unsubscribe_destination("/tmp/sub.sock");
        assert_eq!(np.module_install_notify("m", None, true).len(), 1);
    }

    #[test]
    fn persistent_subscriptions_filters_by_module() {
        let np = Processor::new();
        np.subscribe(sub(EventKind::ModuleChange, Some("if-mod")), false);
        np.subscribe(sub(EventKind::ModuleChange, Some("other-mod")), false);

        let persisted = np.persistent_subscriptions("if-mod");
        assert_eq!(persisted.len(), 1);
    }
}
