//! Uploaded file staging.
//!
//! # Data Flow
//! ```text
//! multipart file field
//!     → spooled by the body parser (multipart-<uuid>)
//!     → FileUpload (error = Ok, no staged path yet)
//!     → Uploads::open: extension policy → stage (upload-<uuid>) → chown
//!     → serialized into the request context as a file tree
//!     → Uploads::close after the response is done (also on drop)
//! ```
//!
//! Every rejection is recorded on the file itself; the request still
//! reaches the worker, which sees the error code instead of a staged path.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::handler::tree::{Leaf, Node, Tree, TreeError};
use crate::observability::metrics;

/// Per-file outcome code, shared with workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum UploadError {
    #[default]
    Ok = 0,
    TooLarge = 1,
    Partial = 3,
    NoFile = 4,
    PermissionDenied = 6,
    Io = 7,
    Extension = 8,
}

impl Serialize for UploadError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Client-supplied part metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub filename: String,
    pub size: u64,
    pub header: HashMap<String, Vec<String>>,
}

/// One uploaded file as seen by the worker.
#[derive(Debug, Serialize)]
pub struct FileUpload {
    /// Original client file name.
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub error: UploadError,
    #[serde(rename = "tmpName", serialize_with = "staged_path")]
    pub temp_filename: Option<PathBuf>,
    #[serde(skip)]
    pub header: FileHeader,
    #[serde(skip)]
    spool: Option<PathBuf>,
}

fn staged_path<S: Serializer>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error> {
    match path {
        Some(path) => serializer.serialize_str(&path.to_string_lossy()),
        None => serializer.serialize_str(""),
    }
}

impl FileUpload {
    /// A file whose content sits in a transport spool file.
    pub fn spooled(header: FileHeader, mime: String, spool: PathBuf) -> Self {
        Self {
            name: header.filename.clone(),
            mime,
            size: header.size,
            error: UploadError::Ok,
            temp_filename: None,
            header,
            spool: Some(spool),
        }
    }

    /// A file that was rejected before it could be spooled.
    pub fn failed(header: FileHeader, mime: String, error: UploadError) -> Self {
        Self {
            name: header.filename.clone(),
            mime,
            size: header.size,
            error,
            temp_filename: None,
            header,
            spool: None,
        }
    }

    /// Lowercased extension including the leading dot, or empty.
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
        self.header.size = size;
    }

    /// Check the policy and stage the file for the worker.
    pub async fn open(&mut self, policy: &UploadPolicy) {
        if self.error != UploadError::Ok {
            return;
        }

        if !policy.allows(&self.extension()) {
            self.error = UploadError::Extension;
            return;
        }

        let Some(spool) = self.spool.clone() else {
            self.error = UploadError::NoFile;
            return;
        };

        let target = policy.dir.join(format!("upload-{}", Uuid::new_v4().simple()));
        if let Err(err) = stage(&spool, &target).await {
            tracing::warn!(file = %self.name, error = %err, "failed to stage uploaded file");
            self.error = UploadError::Io;
            return;
        }
        self.temp_filename = Some(target.clone());

        if let Err(err) = apply_owner(&target, policy.uid, policy.gid) {
            tracing::warn!(file = %self.name, error = %err, "failed to change uploaded file owner");
            self.error = UploadError::PermissionDenied;
        }
    }

    /// Remove staged and spooled files. Safe to call repeatedly.
    pub fn close(&mut self) {
        for path in [self.temp_filename.take(), self.spool.take()].into_iter().flatten() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove uploaded file");
                }
            }
        }
    }
}

async fn stage(spool: &Path, target: &Path) -> io::Result<()> {
    if tokio::fs::rename(spool, target).await.is_ok() {
        return Ok(());
    }
    if let Err(err) = tokio::fs::copy(spool, target).await {
        let _ = tokio::fs::remove_file(target).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
fn apply_owner(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    std::os::unix::fs::chown(path, uid, gid)
}

#[cfg(not(unix))]
fn apply_owner(_path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Where uploads go, which extensions are accepted and who owns them.
#[derive(Debug, Clone, Default)]
pub struct UploadPolicy {
    pub dir: PathBuf,
    pub forbid: HashSet<String>,
    pub allow: HashSet<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl UploadPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            dir: config.uploads.dir.clone(),
            forbid: normalize_extensions(&config.uploads.forbid),
            allow: normalize_extensions(&config.uploads.allow),
            uid: config.permissions.uid,
            gid: config.permissions.gid,
        }
    }

    /// A non-empty allow list takes precedence over the forbid list.
    pub fn allows(&self, extension: &str) -> bool {
        if !self.allow.is_empty() {
            return self.allow.contains(extension);
        }
        !self.forbid.contains(extension)
    }
}

fn normalize_extensions(extensions: &[String]) -> HashSet<String> {
    extensions
        .iter()
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| if ext.starts_with('.') { ext } else { format!(".{ext}") })
        .collect()
}

/// Index of a file in [`Uploads`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef(pub usize);

impl Leaf for FileRef {
    fn is_blank(&self) -> bool {
        false
    }
}

pub type FileTree = Tree<FileRef>;

/// Files of one request, flat for staging and nested for the worker.
#[derive(Debug, Default)]
pub struct Uploads {
    files: Vec<FileUpload>,
    tree: FileTree,
}

impl Uploads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file without placing it in the tree yet.
    pub fn stash(&mut self, file: FileUpload) -> FileRef {
        self.files.push(file);
        FileRef(self.files.len() - 1)
    }

    /// Place stashed files under a bracketed field name.
    pub fn mount(&mut self, field: &str, refs: Vec<FileRef>) -> Result<(), TreeError> {
        self.tree.push(field, refs)
    }

    /// Stash and mount in one step.
    pub fn push(&mut self, field: &str, files: Vec<FileUpload>) -> Result<(), TreeError> {
        let refs = files.into_iter().map(|file| self.stash(file)).collect();
        self.mount(field, refs)
    }

    pub fn get_mut(&mut self, file: FileRef) -> Option<&mut FileUpload> {
        self.files.get_mut(file.0)
    }

    pub fn files(&self) -> &[FileUpload] {
        &self.files
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Apply the upload policy to every file.
    pub async fn open(&mut self, policy: &UploadPolicy) {
        for file in &mut self.files {
            file.open(policy).await;
            if file.error != UploadError::Ok {
                metrics::record_upload_error(file.error);
            }
        }
    }

    /// Remove every file this request put on disk.
    pub fn close(&mut self) {
        for file in &mut self.files {
            file.close();
        }
        self.files.clear();
        self.tree.clear();
    }
}

impl Drop for Uploads {
    fn drop(&mut self) {
        self.close();
    }
}

impl Serialize for Uploads {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TreeView {
            tree: &self.tree,
            files: &self.files,
        }
        .serialize(serializer)
    }
}

struct TreeView<'a> {
    tree: &'a FileTree,
    files: &'a [FileUpload],
}

impl Serialize for TreeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tree.len()))?;
        for (key, node) in self.tree.iter() {
            match node {
                Node::Value(file) => map.serialize_entry(key, &self.files.get(file.0))?,
                Node::List(refs) => {
                    let files: Vec<_> = refs.iter().filter_map(|file| self.files.get(file.0)).collect();
                    map.serialize_entry(key, &files)?;
                }
                Node::Branch(tree) => map.serialize_entry(
                    key,
                    &TreeView {
                        tree,
                        files: self.files,
                    },
                )?,
            }
        }
        map.end()
    }
}
