use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::KvStore;

/// Single JSON-object file holding every key.
///
/// The whole map is rewritten on each write through a sibling temp file and
/// a rename, so a crash mid-write leaves either the old or the new file on
/// disk, never a torn one. A batch passed to [`KvStore::set_many`] lands in
/// one rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store. Parent directories are created.
    /// An existing file that is not a JSON object of strings is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read state file {:?}", path))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<BTreeMap<String, String>>(&raw)
                    .with_context(|| format!("parse state file {:?}", path))?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), keys = entries.len(), "state file opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self, updates: &[(&str, String)]) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("file store lock poisoned"))?;

        let mut next = map.clone();
        for (k, v) in updates {
            next.insert((*k).to_string(), v.clone());
        }

        write_atomic(&self.path, &next)?;
        *map = next;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("file store lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.commit(&[(key, value.to_string())])
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        self.commit(entries)
    }
}

fn write_atomic(path: &Path, map: &BTreeMap<String, String>) -> Result<()> {
    let body = serde_json::to_string_pretty(map).context("serialize state map failed")?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {:?}", tmp))?;
        f.write_all(body.as_bytes())
            .with_context(|| format!("write {:?}", tmp))?;
        f.sync_all().with_context(|| format!("fsync {:?}", tmp))?;
    }

    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}
