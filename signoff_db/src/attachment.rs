use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::record::WorkflowId;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_name: String,
    /// Path relative to the attachment store root.
    pub stored_path: String,
    pub description: Option<String>,
    pub uploaded_by: String,
    pub uploaded_at: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub description: Option<String>,
    pub uploaded_by: String,
}

impl AttachmentUpload {
    pub fn new(file_name: &str, bytes: Vec<u8>, uploaded_by: &str) -> Self {
        Self {
            file_name: file_name.to_owned(),
            bytes,
            description: None,
            uploaded_by: uploaded_by.to_owned(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P, uploaded_by: &str) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StorageError::Attachment(format!("'{}' has no usable file name", path.display()))
            })?;
        let bytes = fs::read(path)?;
        Ok(Self::new(file_name, bytes, uploaded_by))
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
}

/// External home for attachment bytes; workflows keep only the refs.
///
/// `store` must never overwrite bytes an earlier ref points at: each
/// `revision` of a workflow gets its own location.
pub trait AttachmentStore: Send + Sync {
    fn store(
        &self,
        workflow: WorkflowId,
        revision: u64,
        upload: &AttachmentUpload,
        now: u64,
    ) -> Result<AttachmentRef, StorageError>;

    fn read(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, StorageError>;

    fn remove(&self, attachment: &AttachmentRef) -> Result<(), StorageError>;
}

pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_name(file_name: &str) -> Result<&str, StorageError> {
        let name = file_name.trim();
        let bad = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.contains('\0');

        if bad {
            return Err(StorageError::Attachment(format!(
                "Invalid attachment name '{}'",
                file_name
            )));
        }
        Ok(name)
    }

    fn resolve(&self, attachment: &AttachmentRef) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for part in attachment.stored_path.split('/') {
            path.push(Self::checked_name(part)?);
        }
        Ok(path)
    }
}

impl AttachmentStore for FsAttachmentStore {
    fn store(
        &self,
        workflow: WorkflowId,
        revision: u64,
        upload: &AttachmentUpload,
        now: u64,
    ) -> Result<AttachmentRef, StorageError> {
        let name = Self::checked_name(&upload.file_name)?;
        let stored_name = format!("{}-{}", revision, name);
        let relative = format!("{}/{}", workflow, stored_name);

        let dir = self.root.join(workflow.to_string());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&stored_name), &upload.bytes)?;

        tracing::debug!(workflow = %workflow, file = %relative, bytes = upload.bytes.len(), "attachment stored");

        Ok(AttachmentRef {
            file_name: name.to_owned(),
            stored_path: relative,
            description: upload.description.clone(),
            uploaded_by: upload.uploaded_by.clone(),
            uploaded_at: now,
            size_bytes: upload.bytes.len() as u64,
        })
    }

    fn read(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.resolve(attachment)?)?)
    }

    fn remove(&self, attachment: &AttachmentRef) -> Result<(), StorageError> {
        match fs::remove_file(self.resolve(attachment)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
