//! Disk-backed artifact store.
//!
//! Layout under the cache directory:
//!
//! ```text
//! version.json        format version and plugin fingerprint gate
//! artifacts.json      source path -> artifact id index
//! dependents.json     dependency -> dependents index for purge cascades
//! <id>.js             transformed module code
//! <id>.js.map         source map, when one was emitted
//! <id>.meta.json      FileMeta for the artifact
//! ```
//!
//! The in-memory state is authoritative for the lifetime of the store. Disk
//! writes happen on the blocking pool when a Tokio runtime is present and
//! inline otherwise, always as tmp-write-then-rename so a crash never leaves
//! a half-written file behind. Each write op carries a sequence stamped in
//! state order, and a newer landing blocks older ops for the same file, so
//! concurrent flush tasks cannot leave a stale snapshot on disk.

use crate::error::Result;
use crate::fingerprint::{hash_file, mtime_millis, Fingerprint};
use crate::meta::{DepPin, FileMeta};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bumped whenever the on-disk layout changes. A mismatch wipes the cache.
pub const FORMAT_VERSION: u32 = 1;

const VERSION_FILE: &str = "version.json";
const ARTIFACTS_FILE: &str = "artifacts.json";
const DEPENDENTS_FILE: &str = "dependents.json";

#[derive(Debug, Serialize, Deserialize)]
struct VersionMarker {
    format_version: u32,
    plugin_fingerprint: String,
}

/// A freshly transformed module handed to [`CacheStore::persist`].
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub path: PathBuf,
    pub code: String,
    pub map: Option<String>,
    /// Resolved file dependencies discovered during the transform.
    pub imports: Vec<PathBuf>,
    /// Whether any specifier failed to resolve. Unresolved stubs embed the
    /// server origin, so these artifacts are never pure.
    pub had_unresolved: bool,
    /// Whether the module registered a self-accept handler.
    pub hot: bool,
    /// Server address (`host:port`) baked into rewritten import URLs.
    pub address: String,
}

/// Code and source map read back from disk for a cache hit.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub code: String,
    pub map: Option<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: FxHashMap<PathBuf, FileMeta>,
    dependents: FxHashMap<PathBuf, Vec<PathBuf>>,
}

enum WriteOp {
    Write { path: PathBuf, bytes: Vec<u8> },
    Delete { path: PathBuf },
}

/// Persistent cache of transformed modules, keyed by absolute source path.
pub struct CacheStore {
    dir: PathBuf,
    inner: RwLock<StoreInner>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    /// Stamp source for write ops; sequence order matches state order
    /// because ops are stamped before the state lock is released.
    write_seq: AtomicU64,
    /// Highest sequence landed per target file. Shared with the blocking
    /// tasks so an older snapshot can never overwrite a newer one.
    landed: Arc<Mutex<FxHashMap<PathBuf, u64>>>,
}

impl CacheStore {
    /// Open the cache at `dir`, creating it if needed.
    ///
    /// The store starts cold when the directory has no version marker, when
    /// the format version changed, or when `plugin_fingerprint` no longer
    /// matches the one the artifacts were built with. Unreadable metadata is
    /// skipped with a warning rather than failing the open.
    pub fn open(dir: &Path, plugin_fingerprint: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let marker_path = dir.join(VERSION_FILE);
        let marker: Option<VersionMarker> = read_json(&marker_path);
        let stale = match &marker {
            Some(marker) => {
                marker.format_version != FORMAT_VERSION
                    || marker.plugin_fingerprint != plugin_fingerprint
            }
            None => true,
        };

        if stale {
            if marker.is_some() {
                debug!(dir = %dir.display(), "cache format or plugin set changed, starting cold");
            }
            std::fs::remove_dir_all(dir)?;
            std::fs::create_dir_all(dir)?;
            let marker = VersionMarker {
                format_version: FORMAT_VERSION,
                plugin_fingerprint: plugin_fingerprint.to_string(),
            };
            atomic_write(&marker_path, &serde_json::to_vec_pretty(&marker)?, 0)?;
            return Ok(Self::empty(dir));
        }

        let mut entries = FxHashMap::default();
        let index: BTreeMap<PathBuf, String> =
            read_json(&dir.join(ARTIFACTS_FILE)).unwrap_or_default();
        for (path, artifact_id) in index {
            match read_json::<FileMeta>(&dir.join(format!("{artifact_id}.meta.json"))) {
                Some(meta) if meta.path == path => {
                    entries.insert(path, meta);
                }
                Some(_) => {
                    warn!(path = %path.display(), "cache index and metadata disagree, skipping entry");
                }
                None => {
                    warn!(path = %path.display(), "cache metadata unreadable, skipping entry");
                }
            }
        }

        let dependents: FxHashMap<PathBuf, Vec<PathBuf>> =
            read_json::<BTreeMap<PathBuf, Vec<PathBuf>>>(&dir.join(DEPENDENTS_FILE))
                .unwrap_or_default()
                .into_iter()
                .collect();

        debug!(dir = %dir.display(), entries = entries.len(), "loaded artifact cache");
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(StoreInner { entries, dependents }),
            pending: Mutex::new(Vec::new()),
            write_seq: AtomicU64::new(0),
            landed: Arc::new(Mutex::new(FxHashMap::default())),
        })
    }

    fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(StoreInner::default()),
            pending: Mutex::new(Vec::new()),
            write_seq: AtomicU64::new(0),
            landed: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Check whether the cached artifact for `path` is still valid.
    ///
    /// The file itself and every pinned dependency are compared by mtime
    /// first and by content hash when the mtime moved. A hash match with a
    /// newer mtime refreshes the stored pin so later checks stay on the
    /// cheap path. Returns the (possibly refreshed) metadata on a hit.
    pub fn should_reuse(&self, path: &Path) -> Result<Option<FileMeta>> {
        let Some(mut meta) = self.inner.read().entries.get(path).cloned() else {
            return Ok(None);
        };
        let mut dirty = false;

        let Ok(mtime) = mtime_millis(path) else {
            return Ok(None);
        };
        if mtime != meta.mtime_ms {
            let Ok(hash) = hash_file(path) else {
                return Ok(None);
            };
            if hash != meta.hash {
                return Ok(None);
            }
            meta.mtime_ms = mtime;
            dirty = true;
        }

        let mut stale = false;
        for (dep, pin) in meta.deps.iter_mut() {
            let Ok(dep_mtime) = mtime_millis(dep) else {
                stale = true;
                break;
            };
            if dep_mtime == pin.mtime_ms && !pin.hash.is_empty() {
                continue;
            }
            let Ok(dep_hash) = hash_file(dep) else {
                stale = true;
                break;
            };
            if dep_hash != pin.hash {
                stale = true;
                break;
            }
            pin.mtime_ms = dep_mtime;
            dirty = true;
        }
        if stale {
            return Ok(None);
        }

        if dirty {
            self.install_meta(meta.clone())?;
        }
        Ok(Some(meta))
    }

    /// Read the artifact for `path` back from disk.
    ///
    /// When the artifact embeds a different server address than
    /// `current_addr`, every occurrence of the old origin is rewritten in
    /// place and the updated artifact is written back, so a cache built on
    /// one port keeps working on another. A vanished artifact file drops the
    /// entry and reports a miss.
    pub fn load_artifact(&self, path: &Path, current_addr: &str) -> Result<Option<LoadedArtifact>> {
        let Some(mut meta) = self.inner.read().entries.get(path).cloned() else {
            return Ok(None);
        };

        let code_path = self.code_path(&meta.artifact_id);
        let mut code = match std::fs::read_to_string(&code_path) {
            Ok(code) => code,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cached artifact vanished, dropping entry");
                self.remove_entry(path)?;
                return Ok(None);
            }
        };
        let mut map = if meta.has_map {
            match std::fs::read_to_string(self.map_path(&meta.artifact_id)) {
                Ok(map) => Some(map),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cached source map vanished");
                    None
                }
            }
        } else {
            None
        };

        if !meta.pure && !meta.address.is_empty() && meta.address != current_addr {
            let old = format!("http://{}", meta.address);
            let new = format!("http://{current_addr}");
            code = code.replace(&old, &new);
            if let Some(map) = map.as_mut() {
                *map = map.replace(&old, &new);
            }
            debug!(
                path = %path.display(),
                from = %meta.address,
                to = %current_addr,
                "rewrote cached artifact for new server address"
            );
            meta.address = current_addr.to_string();

            let mut ops = vec![WriteOp::Write {
                path: code_path,
                bytes: code.clone().into_bytes(),
            }];
            if let Some(map) = &map {
                ops.push(WriteOp::Write {
                    path: self.map_path(&meta.artifact_id),
                    bytes: map.clone().into_bytes(),
                });
            }
            ops.push(WriteOp::Write {
                path: self.meta_path(&meta.artifact_id),
                bytes: serde_json::to_vec_pretty(&meta)?,
            });
            {
                let mut inner = self.inner.write();
                if inner.entries.contains_key(path) {
                    inner.entries.insert(path.to_path_buf(), meta);
                }
                self.flush(ops);
            }
        }

        Ok(Some(LoadedArtifact { code, map }))
    }

    /// Store a freshly transformed module and return its metadata.
    ///
    /// The artifact id is reused across rebuilds of the same path so the
    /// on-disk file names stay stable. Dependencies that cannot be read get
    /// an unreadable pin, which keeps the entry permanently stale instead of
    /// silently serving an artifact built against unknown inputs.
    pub fn persist(&self, artifact: NewArtifact) -> Result<FileMeta> {
        let NewArtifact {
            path,
            code,
            map,
            imports,
            had_unresolved,
            hot,
            address,
        } = artifact;
        let own = Fingerprint::capture(&path)?;

        let mut deps = BTreeMap::new();
        for dep in imports {
            let pin = match Fingerprint::capture(&dep) {
                Ok(fp) => fp.into(),
                Err(err) => {
                    warn!(dep = %dep.display(), error = %err, "dependency unreadable while pinning");
                    DepPin::unreadable()
                }
            };
            deps.insert(dep, pin);
        }

        let artifact_id = self
            .inner
            .read()
            .entries
            .get(&path)
            .map(|existing| existing.artifact_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        // A pure artifact embeds no server origin anywhere, so it can be
        // served verbatim on any address.
        let pure = map.is_none() && deps.is_empty() && !had_unresolved;

        let meta = FileMeta {
            path: path.clone(),
            artifact_id: artifact_id.clone(),
            hash: own.hash,
            mtime_ms: own.mtime_ms,
            pure,
            has_map: map.is_some(),
            hot,
            address: if pure { String::new() } else { address },
            deps,
        };

        let mut ops = vec![
            WriteOp::Write {
                path: self.code_path(&artifact_id),
                bytes: code.into_bytes(),
            },
            WriteOp::Write {
                path: self.meta_path(&artifact_id),
                bytes: serde_json::to_vec_pretty(&meta)?,
            },
        ];
        match &map {
            Some(map) => ops.push(WriteOp::Write {
                path: self.map_path(&artifact_id),
                bytes: map.clone().into_bytes(),
            }),
            None => ops.push(WriteOp::Delete {
                path: self.map_path(&artifact_id),
            }),
        }

        {
            let mut inner = self.inner.write();
            inner.entries.insert(path, meta.clone());
            ops.push(WriteOp::Write {
                path: self.dir.join(ARTIFACTS_FILE),
                bytes: artifacts_index_bytes(&inner.entries)?,
            });
            self.flush(ops);
        }
        Ok(meta)
    }

    /// Replace the dependents index used for purge cascades.
    pub fn record_dependents(&self, dependents: FxHashMap<PathBuf, Vec<PathBuf>>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.dependents = dependents;
        let bytes = dependents_index_bytes(&inner.dependents)?;
        self.flush(vec![WriteOp::Write {
            path: self.dir.join(DEPENDENTS_FILE),
            bytes,
        }]);
        Ok(())
    }

    /// Drop the entry for `path` and for everything that transitively
    /// depends on it, deleting the artifact files. Returns the paths whose
    /// entries were actually removed.
    pub fn purge(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut ops = Vec::new();
        let purged = {
            let mut inner = self.inner.write();
            let mut purged = Vec::new();
            let mut visited = FxHashSet::default();
            let mut queue = VecDeque::from([path.to_path_buf()]);
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                if let Some(meta) = inner.entries.remove(&current) {
                    self.artifact_delete_ops(&meta, &mut ops);
                    purged.push(current.clone());
                }
                if let Some(dependents) = inner.dependents.get(&current) {
                    queue.extend(dependents.iter().cloned());
                }
            }
            if purged.is_empty() {
                return Ok(Vec::new());
            }
            ops.push(WriteOp::Write {
                path: self.dir.join(ARTIFACTS_FILE),
                bytes: artifacts_index_bytes(&inner.entries)?,
            });
            self.flush(ops);
            purged
        };
        debug!(count = purged.len(), root = %path.display(), "purged cache entries");
        Ok(purged)
    }

    /// Drop entries whose source file no longer exists. Returns how many
    /// entries were purged, cascades included.
    pub fn verify_all(&self) -> Result<usize> {
        let missing: Vec<PathBuf> = {
            let inner = self.inner.read();
            inner
                .entries
                .keys()
                .filter(|path| !path.exists())
                .cloned()
                .collect()
        };
        let mut purged = 0;
        for path in missing {
            purged += self.purge(&path)?.len();
        }
        if purged > 0 {
            debug!(purged, "dropped cache entries for missing sources");
        }
        Ok(purged)
    }

    /// Remove every entry and delete all artifact files.
    pub fn clear(&self) -> Result<()> {
        let mut ops = Vec::new();
        let mut inner = self.inner.write();
        for meta in inner.entries.values() {
            self.artifact_delete_ops(meta, &mut ops);
        }
        inner.entries.clear();
        inner.dependents.clear();
        ops.push(WriteOp::Write {
            path: self.dir.join(ARTIFACTS_FILE),
            bytes: artifacts_index_bytes(&inner.entries)?,
        });
        ops.push(WriteOp::Write {
            path: self.dir.join(DEPENDENTS_FILE),
            bytes: dependents_index_bytes(&inner.dependents)?,
        });
        self.flush(ops);
        Ok(())
    }

    /// Wait for all in-flight background writes to land on disk.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "cache flush task failed");
            }
        }
    }

    /// Snapshot of every entry, used to reseed the module graph on startup.
    pub fn entries(&self) -> Vec<FileMeta> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_entry(&self, path: &Path) -> Result<()> {
        let mut ops = Vec::new();
        let mut inner = self.inner.write();
        let Some(meta) = inner.entries.remove(path) else {
            return Ok(());
        };
        self.artifact_delete_ops(&meta, &mut ops);
        ops.push(WriteOp::Write {
            path: self.dir.join(ARTIFACTS_FILE),
            bytes: artifacts_index_bytes(&inner.entries)?,
        });
        self.flush(ops);
        Ok(())
    }

    fn install_meta(&self, meta: FileMeta) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&meta)?;
        let meta_path = self.meta_path(&meta.artifact_id);
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(&meta.path) {
            return Ok(());
        }
        inner.entries.insert(meta.path.clone(), meta);
        self.flush(vec![WriteOp::Write {
            path: meta_path,
            bytes,
        }]);
        Ok(())
    }

    fn artifact_delete_ops(&self, meta: &FileMeta, ops: &mut Vec<WriteOp>) {
        ops.push(WriteOp::Delete {
            path: self.code_path(&meta.artifact_id),
        });
        ops.push(WriteOp::Delete {
            path: self.map_path(&meta.artifact_id),
        });
        ops.push(WriteOp::Delete {
            path: self.meta_path(&meta.artifact_id),
        });
    }

    fn code_path(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{artifact_id}.js"))
    }

    fn map_path(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{artifact_id}.js.map"))
    }

    fn meta_path(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{artifact_id}.meta.json"))
    }

    /// Run `ops` on the blocking pool when a runtime is available, inline
    /// otherwise. Write failures are logged, not propagated; the in-memory
    /// state stays correct and the next session simply starts colder.
    ///
    /// Callers invoke this while still holding the state lock, so the
    /// sequence stamped on each op follows state order. Blocking tasks land
    /// in any order; the landed table drops an op whose target already got
    /// a newer snapshot, so the disk files converge on the latest state.
    fn flush(&self, ops: Vec<WriteOp>) {
        if ops.is_empty() {
            return;
        }
        let ops: Vec<(u64, WriteOp)> = ops
            .into_iter()
            .map(|op| (self.write_seq.fetch_add(1, Ordering::Relaxed), op))
            .collect();
        let landed = Arc::clone(&self.landed);
        let job = move || {
            for (seq, op) in ops {
                let target = match &op {
                    WriteOp::Write { path, .. } | WriteOp::Delete { path } => path.clone(),
                };
                let mut gate = landed.lock();
                if !should_land(&mut gate, &target, seq) {
                    debug!(path = %target.display(), "skipped stale cache write");
                    continue;
                }
                match op {
                    WriteOp::Write { path, bytes } => {
                        if let Err(err) = atomic_write(&path, &bytes, seq) {
                            warn!(path = %path.display(), error = %err, "cache write failed");
                        }
                    }
                    WriteOp::Delete { path } => {
                        if let Err(err) = std::fs::remove_file(&path) {
                            if err.kind() != ErrorKind::NotFound {
                                warn!(path = %path.display(), error = %err, "cache delete failed");
                            }
                        }
                    }
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut pending = self.pending.lock();
                pending.retain(|task| !task.is_finished());
                pending.push(handle.spawn_blocking(job));
            }
            Err(_) => job(),
        }
    }
}

/// Record `seq` as landed for `path` unless a newer sequence already did.
fn should_land(landed: &mut FxHashMap<PathBuf, u64>, path: &Path, seq: u64) -> bool {
    match landed.get(path) {
        Some(&last) if last > seq => false,
        _ => {
            landed.insert(path.to_path_buf(), seq);
            true
        }
    }
}

fn artifacts_index_bytes(entries: &FxHashMap<PathBuf, FileMeta>) -> Result<Vec<u8>> {
    let index: BTreeMap<&PathBuf, &String> = entries
        .iter()
        .map(|(path, meta)| (path, &meta.artifact_id))
        .collect();
    Ok(serde_json::to_vec_pretty(&index)?)
}

fn dependents_index_bytes(dependents: &FxHashMap<PathBuf, Vec<PathBuf>>) -> Result<Vec<u8>> {
    let mut index: BTreeMap<&PathBuf, Vec<&PathBuf>> = BTreeMap::new();
    for (dep, files) in dependents {
        let mut files: Vec<&PathBuf> = files.iter().collect();
        files.sort();
        index.insert(dep, files);
    }
    Ok(serde_json::to_vec_pretty(&index)?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable cache file");
            None
        }
    }
}

/// Write via a rename so readers never observe a half-written file. The tag
/// keeps tmp names unique per write op, so concurrent flush tasks aiming at
/// the same target cannot clobber each other's staging file.
fn atomic_write(path: &Path, bytes: &[u8], tag: u64) -> std::io::Result<()> {
    let Some(name) = path.file_name() else {
        return Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            "cache path has no file name",
        ));
    };
    let mut tmp_name = name.to_os_string();
    tmp_name.push(format!(".tmp.{tag}"));
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
