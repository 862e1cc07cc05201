// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! On-disk persistence for clusters and provider credentials
//!
//! Layout under the state directory:
//!
//! ```text
//! clusters.json
//! credentials/aws.json
//! credentials/gcp.json
//! ```
//!
//! Each file is written atomically and read independently. A file that
//! cannot be parsed is logged, skipped and renamed to
//! `<name>.corrupt-<timestamp>` so a later save does not overwrite it; the
//! rest still load. The entity cache and the current selection are never
//! written.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::config::base_dir;
use crate::credentials::ProviderCredentials;
use crate::model::{CloudProvider, Cluster};
use crate::store::Store;

const CLUSTERS_FILE: &str = "clusters.json";
const CREDENTIALS_DIR: &str = "credentials";

/// Write a file atomically using a temp file and rename.
///
/// The temp file is created owner-only, and the rename keeps those
/// permissions on the final file.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use tempfile::NamedTempFile;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;

    let temp_file = NamedTempFile::new_in(parent).context("Failed to create temp file")?;
    fs::write(temp_file.path(), content)
        .with_context(|| format!("Failed to write temp file {:?}", temp_file.path()))?;
    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file to {:?}", path))?;

    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).context("Failed to serialize state")?;
    atomic_write(path, &content)
}

/// What [`StateDir::load_into`] managed to restore
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub clusters: usize,
    pub credentials: Vec<CloudProvider>,
    /// Files that existed but could not be read
    pub skipped: Vec<PathBuf>,
    /// Where skipped files were moved to
    pub set_aside: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct FileMarks {
    /// Read or written through this handle; safe to delete
    owned: HashSet<PathBuf>,
    /// Unreadable and could not be moved aside; never written or deleted
    held: HashSet<PathBuf>,
}

#[derive(Debug)]
pub struct StateDir {
    root: PathBuf,
    marks: Mutex<FileMarks>,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            marks: Mutex::new(FileMarks::default()),
        }
    }

    /// `~/.kubedeck/state`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(base_dir()?.join("state")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marks(&self) -> MutexGuard<'_, FileMarks> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_held(&self, path: &Path) -> bool {
        let held = self.marks().held.contains(path);
        if held {
            warn!(path = ?path, "Leaving unreadable state file untouched");
        }
        held
    }

    fn clusters_path(&self) -> PathBuf {
        self.root.join(CLUSTERS_FILE)
    }

    fn credentials_path(&self, provider: CloudProvider) -> PathBuf {
        self.root
            .join(CREDENTIALS_DIR)
            .join(format!("{}.json", provider.as_str()))
    }

    pub fn save_clusters(&self, clusters: &[Cluster]) -> Result<()> {
        let path = self.clusters_path();
        if self.is_held(&path) {
            return Ok(());
        }
        write_json(&path, clusters)?;
        self.marks().owned.insert(path.clone());
        debug!(path = ?path, count = clusters.len(), "Saved clusters");
        Ok(())
    }

    pub fn save_credentials(&self, credentials: &ProviderCredentials) -> Result<()> {
        let path = self.credentials_path(credentials.provider());
        if self.is_held(&path) {
            return Ok(());
        }
        write_json(&path, credentials)?;
        self.marks().owned.insert(path.clone());
        debug!(path = ?path, provider = %credentials.provider(), "Saved credentials");
        Ok(())
    }

    /// Delete a credentials file that was loaded or written through this
    /// handle. Files it never read are left alone.
    pub fn delete_credentials(&self, provider: CloudProvider) -> Result<()> {
        let path = self.credentials_path(provider);
        if !self.marks().owned.contains(&path) {
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to delete {:?}", path)),
        }
        self.marks().owned.remove(&path);
        debug!(path = ?path, provider = %provider, "Deleted credentials");
        Ok(())
    }

    /// Rename an unreadable file out of the way. If that fails the file is
    /// held so nothing writes over it.
    fn set_aside(&self, path: &Path) -> Option<PathBuf> {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        let target = path.with_file_name(name);

        match fs::rename(path, &target) {
            Ok(()) => {
                warn!(path = ?path, moved_to = ?target, "Moved unreadable state file aside");
                Some(target)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Could not move unreadable state file aside");
                self.marks().held.insert(path.to_path_buf());
                None
            }
        }
    }

    fn skip(&self, path: PathBuf, summary: &mut RestoreSummary) {
        if let Some(target) = self.set_aside(&path) {
            summary.set_aside.push(target);
        }
        summary.skipped.push(path);
    }

    /// Read one file. `Ok(None)` when it does not exist.
    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(value))
    }

    /// Write every cluster and credential blob in the store. Credentials
    /// missing from the store are deleted from disk only if they were loaded
    /// or written through this handle.
    pub fn save_store(&self, store: &Store) -> Result<()> {
        self.save_clusters(&store.registry.snapshot())?;
        for provider in CloudProvider::ALL {
            match store.credentials.get(provider) {
                Some(credentials) => self.save_credentials(&credentials)?,
                None => self.delete_credentials(provider)?,
            }
        }
        Ok(())
    }

    /// Load whatever can be loaded into `store`
    pub fn load_into(&self, store: &Store) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        let clusters_path = self.clusters_path();
        match Self::read_json::<Vec<Cluster>>(&clusters_path) {
            Ok(Some(clusters)) => {
                summary.clusters = clusters.len();
                store.registry.restore(clusters);
                self.marks().owned.insert(clusters_path);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = ?clusters_path, error = %e, "Ignoring unreadable cluster state");
                self.skip(clusters_path, &mut summary);
            }
        }

        for provider in CloudProvider::ALL {
            let path = self.credentials_path(provider);
            match Self::read_json::<ProviderCredentials>(&path) {
                Ok(Some(credentials)) if credentials.provider() == provider => {
                    store.credentials.set(credentials);
                    summary.credentials.push(provider);
                    self.marks().owned.insert(path);
                }
                Ok(Some(credentials)) => {
                    warn!(
                        path = ?path,
                        expected = %provider,
                        found = %credentials.provider(),
                        "Ignoring credentials stored under the wrong provider"
                    );
                    self.skip(path, &mut summary);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Ignoring unreadable credentials");
                    self.skip(path, &mut summary);
                }
            }
        }

        debug!(
            clusters = summary.clusters,
            credentials = summary.credentials.len(),
            skipped = summary.skipped.len(),
            "State restored"
        );
        summary
    }
}
