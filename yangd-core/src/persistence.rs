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

//! The persistence manager. Every module gets two files under the data
//! directory: `<module>.<datastore>.xml` holding its data tree, and
//! `<module>.sidedata.xml` holding enabled features and persistent
//! subscriptions. Writes go to a temp file in the same directory,
//! `fdatasync`'d, then renamed over the target so a crash mid-write
//! never leaves a half-written file behind, and an exclusive
//! `flock(2)` is held for the duration so two commits never interleave.

use std::{
    fs::{self, File},
    io::Write as _,
    path::{Path, PathBuf},
};

use anyhow::Context;
use nix::fcntl::{Flock, FlockArg};
use serde_derive::{Deserialize, Serialize};
use tracing::instrument;
use yangd_protocol::Datastore;

use crate::{notification::PersistedSubscription, schema::tree::DataTree};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideData {
    pub enabled_features: Vec<String>,
    pub subscriptions: Vec<PersistedSubscription>,
}

#[derive(Clone)]
pub struct Manager {
    data_dir: PathBuf,
}

impl Manager {
    pub fn new(data_dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {data_dir:?}"))?;
        Ok(Manager { data_dir })
    }

    fn data_path(&self, module: &str, datastore: Datastore) -> PathBuf {
        self.data_dir.join(format!("{module}.{datastore}.xml"))
    }

    fn side_data_path(&self, module: &str) -> PathBuf {
        self.data_dir.join(format!("{module}.sidedata.xml"))
    }

    #[instrument(skip(self))]
    pub fn load_tree(&self, module: &str, datastore: Datastore) -> anyhow::Result<DataTree> {
        let path = self.data_path(module, datastore);
        if !path.exists() {
            return Ok(DataTree::new());
        }
        let text = fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
        if text.trim().is_empty() {
            return Ok(DataTree::new());
        }
        quick_xml::de::from_str(&text).with_context(|| format!("parsing {path:?}"))
    }

    #[instrument(skip(self, tree))]
    pub fn save_tree(&self, module: &str, datastore: Datastore, tree: &DataTree) -> anyhow::Result<()> {
        let path = self.data_path(module, datastore);
        let xml = quick_xml::se::to_string(tree).context("serializing data tree")?;
        atomic_write_locked(&path, xml.as_bytes())
    }

    #[instrument(skip(self))]
    pub fn load_side_data(&self, module: &str) -> anyhow::Result<SideData> {
        let path = self.side_data_path(module);
        if !path.exists() {
            return Ok(SideData::default());
        }
        let text = fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
        if text.trim().is_empty() {
            return Ok(SideData::default());
        }
        quick_xml::de::from_str(&text).with_context(|| format!("parsing {path:?}"))
    }

    #[instrument(skip(self, data))]
    pub fn save_side_data(&self, module: &str, data: &SideData) -> anyhow::Result<()> {
        let path = self.side_data_path(module);
        let xml = quick_xml::se::to_string(data).context("serializing side data")?;
        atomic_write_locked(&path, xml.as_bytes())
    }

    pub fn remove_module_files(&self, module: &str) -> anyhow::Result<()> {
        for datastore in [Datastore::Startup, Datastore::Running, Datastore::Candidate] {
            let path = self.data_path(module, datastore);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        let side = self.side_data_path(module);
        if side.exists() {
            fs::remove_file(&side)?;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` atomically: build the replacement in a temp
/// file in the same directory (so the final rename is same-filesystem),
/// `fdatasync` it, rename over the target, then hold an exclusive lock
/// on the target for the duration so a concurrent reader never observes
/// a half up-to-date file as a valid one mid-rename.
fn atomic_write_locked(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().context("path has no parent directory")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).context("creating temp file")?;
    tmp.write_all(bytes).context("writing temp file")?;
    tmp.as_file().sync_data().context("fdatasync temp file")?;

    // Hold an exclusive lock on the destination path (or create it) so
    // readers using the same lock never see a torn rename. The lock is
    // released when `flock` drops at the end of this function.
    let lock_target = File::options().create(true).write(true).truncate(false).open(path)?;
    let flock = Flock::lock(lock_target, FlockArg::LockExclusive)
        .map_err(|(_, errno)| anyhow::anyhow!("flock {path:?}: {errno}"))?;

    tmp.persist(path).map_err(|e| anyhow::anyhow!("renaming temp file over {path:?}: {e}"))?;

    drop(flock);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{tree::Node, xpath};

    #[test]
    fn round_trips_side_data() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Manager::new(dir.path().to_path_buf()).unwrap();
        let data = SideData {
            enabled_features: vec!["foo".into()],
            subscriptions: vec![PersistedSubscription {
                event_kind: yangd_protocol::EventKind::ModuleChange,
                destination_address: "/tmp/a.sock".into(),
                destination_id: 1,
                module: Some("m".into()),
                xpath: None,
            }],
        };
        mgr.save_side_data("m", &data).unwrap();
        let loaded = mgr.load_side_data("m").unwrap();
        assert_eq!(loaded.enabled_features, data.enabled_features);
    }

    #[test]
    fn missing_tree_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Manager::new(dir.path().to_path_buf()).unwrap();
        let tree = mgr.load_tree("m", Datastore::Running).unwrap();
        assert!(tree.roots.is_empty());
    }

    #[test]
    fn save_then_load_tree_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Manager::new(dir.path().to_path_buf()).unwrap();
        let mut tree = DataTree::new();
        let steps = xpath::parse("/m:interfaces/interface[name='eth0']/mtu").unwrap();
        tree.set(&steps, yangd_protocol::Value::UInt16(1500)).unwrap();
        mgr.save_tree("m", Datastore::Running, &tree).unwrap();

        let loaded = mgr.load_tree("m", Datastore::Running).unwrap();
        let node: Option<&Node> = loaded.get(&steps);
        assert!(node.is_some());
    }
}
