use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::labels::Labels;
use crate::locator::Locator;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

/// Exact-match label query with an optional repository filter.
#[derive(Clone, Debug, Default)]
pub struct PackageQuery {
    pub repository: Option<String>,
    pub labels: Labels,
}

impl PackageQuery {
    pub fn in_repository(repository: &str) -> Self {
        PackageQuery {
            repository: Some(repository.to_string()),
            labels: Labels::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct PackageOptions {
    pub labels: Labels,
    pub archive: bool,
    pub manifest: Option<Vec<u8>>,
}

impl PackageOptions {
    pub fn with_labels(labels: Labels) -> Self {
        PackageOptions {
            labels,
            ..PackageOptions::default()
        }
    }
}

/// Content-addressed package store.
///
/// Safe for concurrent readers; writers synchronize on locator uniqueness
/// through [`Error::AlreadyExists`]. Content is immutable once written.
#[allow(async_fn_in_trait)]
pub trait PackageStore {
    async fn upsert_repository(&self, name: &str) -> Result<()>;
    async fn create_package(
        &self,
        locator: &Locator,
        data: &[u8],
        options: PackageOptions,
    ) -> Result<Envelope>;
    async fn read_package(&self, locator: &Locator) -> Result<(Envelope, Vec<u8>)>;
    async fn read_package_envelope(&self, locator: &Locator) -> Result<Envelope>;
    async fn find_packages(&self, query: &PackageQuery) -> Result<Vec<Envelope>>;
}

fn seal(locator: &Locator, data: &[u8], options: PackageOptions) -> Envelope {
    Envelope {
        locator: locator.clone(),
        size_bytes: data.len() as u64,
        digest: format!("{:x}", Sha256::digest(data)),
        labels: options.labels,
        archive: options.archive,
        manifest: options.manifest,
    }
}

/// In-memory store used by tests and single-shot configuration runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    repositories: BTreeSet<String>,
    packages: BTreeMap<String, (Envelope, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored packages, across all repositories.
    pub fn len(&self) -> usize {
        self.inner.read().packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().packages.is_empty()
    }
}

impl PackageStore for MemoryStore {
    async fn upsert_repository(&self, name: &str) -> Result<()> {
        self.inner.write().repositories.insert(name.to_string());
        Ok(())
    }

    async fn create_package(
        &self,
        locator: &Locator,
        data: &[u8],
        options: PackageOptions,
    ) -> Result<Envelope> {
        let mut inner = self.inner.write();
        if !inner.repositories.contains(&locator.repository) {
            return Err(Error::RepositoryNotFound(locator.repository.clone()));
        }
        let key = locator.to_string();
        if inner.packages.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        let envelope = seal(locator, data, options);
        debug!(msg = "create package", package = %locator, size = envelope.size_bytes);
        inner
            .packages
            .insert(key, (envelope.clone(), data.to_vec()));
        Ok(envelope)
    }

    async fn read_package(&self, locator: &Locator) -> Result<(Envelope, Vec<u8>)> {
        self.inner
            .read()
            .packages
            .get(&locator.to_string())
            .cloned()
            .ok_or_else(|| Error::NotFound(locator.to_string()))
    }

    async fn read_package_envelope(&self, locator: &Locator) -> Result<Envelope> {
        self.read_package(locator).await.map(|(envelope, _)| envelope)
    }

    async fn find_packages(&self, query: &PackageQuery) -> Result<Vec<Envelope>> {
        let inner = self.inner.read();
        Ok(inner
            .packages
            .values()
            .map(|(envelope, _)| envelope)
            .filter(|envelope| {
                query
                    .repository
                    .as_deref()
                    .is_none_or(|r| envelope.locator.repository == r)
            })
            .filter(|envelope| envelope.matches_labels(&query.labels))
            .cloned()
            .collect())
    }
}

/// Directory-backed store: one directory per repository, one per package
/// with the content blob next to its envelope.
pub struct DirStore {
    root: PathBuf,
}

const BLOB_FILE: &str = "blob";
const ENVELOPE_FILE: &str = "envelope.json";

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    fn package_dir(&self, locator: &Locator) -> PathBuf {
        self.root
            .join(&locator.repository)
            .join(&locator.name)
            .join(locator.version.to_string())
    }

    async fn read_envelope_file(path: &Path) -> Result<Envelope> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Io(format!("failed to read {}", path.display()), e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Serialization(format!("failed to decode {}", path.display()), e))
    }
}

impl PackageStore for DirStore {
    async fn upsert_repository(&self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("failed to create {}", dir.display()), e))
    }

    async fn create_package(
        &self,
        locator: &Locator,
        data: &[u8],
        options: PackageOptions,
    ) -> Result<Envelope> {
        if !tokio::fs::try_exists(self.root.join(&locator.repository))
            .await
            .map_err(|e| Error::Io("failed to stat repository".to_string(), e))?
        {
            return Err(Error::RepositoryNotFound(locator.repository.clone()));
        }
        let dir = self.package_dir(locator);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("failed to create {}", dir.display()), e))?;

        let blob = dir.join(BLOB_FILE);
        // create_new is the uniqueness barrier between concurrent writers
        let mut open = tokio::fs::OpenOptions::new();
        open.write(true).create_new(true);
        match open.open(&blob).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(locator.to_string()));
            }
            Err(e) => return Err(Error::Io(format!("failed to create {}", blob.display()), e)),
        }
        tokio::fs::write(&blob, data)
            .await
            .map_err(|e| Error::Io(format!("failed to write {}", blob.display()), e))?;

        let envelope = seal(locator, data, options);
        let raw = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| Error::Serialization("failed to encode envelope".to_string(), e))?;
        tokio::fs::write(dir.join(ENVELOPE_FILE), raw)
            .await
            .map_err(|e| Error::Io("failed to write envelope".to_string(), e))?;
        debug!(msg = "create package", package = %locator, size = envelope.size_bytes);
        Ok(envelope)
    }

    async fn read_package(&self, locator: &Locator) -> Result<(Envelope, Vec<u8>)> {
        let dir = self.package_dir(locator);
        let envelope = Self::read_envelope_file(&dir.join(ENVELOPE_FILE))
            .await
            .map_err(|_| Error::NotFound(locator.to_string()))?;
        let data = tokio::fs::read(dir.join(BLOB_FILE))
            .await
            .map_err(|e| Error::Io(format!("failed to read {}", locator), e))?;
        Ok((envelope, data))
    }

    async fn read_package_envelope(&self, locator: &Locator) -> Result<Envelope> {
        let dir = self.package_dir(locator);
        Self::read_envelope_file(&dir.join(ENVELOPE_FILE))
            .await
            .map_err(|_| Error::NotFound(locator.to_string()))
    }

    async fn find_packages(&self, query: &PackageQuery) -> Result<Vec<Envelope>> {
        let mut found = Vec::new();
        let mut repositories = read_dir_names(&self.root).await?;
        if let Some(wanted) = &query.repository {
            repositories.retain(|r| r == wanted);
        }
        for repository in repositories {
            let repo_dir = self.root.join(&repository);
            for name in read_dir_names(&repo_dir).await? {
                for version in read_dir_names(&repo_dir.join(&name)).await? {
                    let path = repo_dir.join(&name).join(&version).join(ENVELOPE_FILE);
                    match Self::read_envelope_file(&path).await {
                        Ok(envelope) if envelope.matches_labels(&query.labels) => {
                            found.push(envelope)
                        }
                        Ok(_) => {}
                        // a blob without its envelope is a half-written package
                        Err(_) => trace!(msg = "skipping incomplete package", path = %path.display()),
                    }
                }
            }
        }
        Ok(found)
    }
}

async fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(Error::Io(format!("failed to list {}", dir.display()), e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::Io(format!("failed to list {}", dir.display()), e))?
    {
        if entry
            .file_type()
            .await
            .map_err(|e| Error::Io("failed to stat entry".to_string(), e))?
            .is_dir()
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
