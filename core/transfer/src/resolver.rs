//! Remote folder find-or-create with a per-run cache.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use driveup_common::{CancellationGate, Error, RelativeDir, RemoteFolderId, Result};
use driveup_storage::DriveApi;

/// Maps local directories to remote folders for the duration of one run.
///
/// Each `(directory prefix, root parent)` pair costs at most one lookup
/// and one creation per run; a second run against the same remote tree
/// finds every folder and creates none.
pub struct RemoteFolderResolver {
    api: Arc<dyn DriveApi>,
    cache: HashMap<(RelativeDir, RemoteFolderId), RemoteFolderId>,
    named: HashMap<(String, RemoteFolderId), RemoteFolderId>,
}

impl RemoteFolderResolver {
    /// Create a resolver with an empty cache.
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            cache: HashMap::new(),
            named: HashMap::new(),
        }
    }

    /// Resolve `dir` under `parent`, creating missing folders top-down.
    ///
    /// The upload root itself resolves to `parent` without any remote call.
    ///
    /// # Errors
    /// - `Cancelled` if the gate trips before a remote call
    /// - `RemoteLookup` if a find or create fails
    pub async fn resolve(
        &mut self,
        dir: &RelativeDir,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<RemoteFolderId> {
        if dir.is_root() {
            return Ok(parent.clone());
        }
        if let Some(id) = self.cache.get(&(dir.clone(), parent.clone())) {
            return Ok(id.clone());
        }

        // walk down from the top, reusing cached prefixes
        let mut current = parent.clone();
        let mut prefix = RelativeDir::root();
        for component in dir.components() {
            prefix = prefix.join(component)?;
            let key = (prefix.clone(), parent.clone());

            current = match self.cache.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let id = self.find_or_create_uncached(component, &current, gate).await?;
                    self.cache.insert(key, id.clone());
                    id
                }
            };
        }

        debug!("Resolved {} -> {}", dir, current);
        Ok(current)
    }

    /// Find or create a single folder `name` directly under `parent`.
    pub async fn find_or_create(
        &mut self,
        name: &str,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<RemoteFolderId> {
        let key = (name.to_string(), parent.clone());
        if let Some(id) = self.named.get(&key) {
            return Ok(id.clone());
        }

        let id = self.find_or_create_uncached(name, parent, gate).await?;
        self.named.insert(key, id.clone());
        Ok(id)
    }

    /// Number of cached directory prefixes.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    async fn find_or_create_uncached(
        &self,
        name: &str,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<RemoteFolderId> {
        gate.check(format!("looking up folder {}", name))?;
        let existing = self
            .api
            .find_folder(name, parent)
            .await
            .map_err(|e| lookup_error(e, name, parent))?;

        let item = match existing {
            Some(item) => item,
            None => {
                gate.check(format!("creating folder {}", name))?;
                let created = self
                    .api
                    .create_folder(name, parent)
                    .await
                    .map_err(|e| lookup_error(e, name, parent))?;
                info!("Created remote folder {} ({})", name, created.id);
                created
            }
        };

        RemoteFolderId::new(item.id)
    }
}

fn lookup_error(err: Error, name: &str, parent: &RemoteFolderId) -> Error {
    match err {
        Error::Cancelled(_) | Error::Authentication(_) => err,
        other => Error::RemoteLookup(format!(
            "Folder {} under {}: {}",
            name, parent, other
        )),
    }
}
