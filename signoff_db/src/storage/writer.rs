use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rkyv::rancor::Error as RkyvError;

use crate::core::record::WorkflowRecord;
use crate::error::StorageError;
use crate::storage::digest_bytes;
use crate::storage::persistence::{
    DatabaseBody, DatabaseFooter, DatabaseHeader, MAGIC_NUMBER, PREAMBLE_SIZE,
    SerializableWorkflow,
};

/// Writes a full database image. The image goes to a sibling temp file
/// first and replaces the target with a rename.
pub struct DatabaseWriter {
    path: PathBuf,
}

impl DatabaseWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn write_workflows(
        &self,
        workflows: &[WorkflowRecord],
        next_sequence: u64,
    ) -> Result<(), StorageError> {
        let bytes = encode(workflows, next_sequence)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            workflows = workflows.len(),
            bytes = bytes.len(),
            "database image written"
        );
        Ok(())
    }
}

fn encode(workflows: &[WorkflowRecord], next_sequence: u64) -> Result<Vec<u8>, StorageError> {
    let body = DatabaseBody {
        workflows: workflows
            .iter()
            .map(SerializableWorkflow::try_from)
            .collect::<Result<_, _>>()?,
        next_sequence,
    };

    let body_bytes = rkyv::to_bytes::<RkyvError>(&body)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let count = workflows.len() as u64;

    // the archived header has a fixed size, so a placeholder tells us where
    // the body starts
    let placeholder = rkyv::to_bytes::<RkyvError>(&DatabaseHeader::new(count, next_sequence, 0, 0))
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let body_offset = (PREAMBLE_SIZE + placeholder.len()) as u64;
    let footer_offset = body_offset + body_bytes.len() as u64;

    let mut header = DatabaseHeader::new(count, next_sequence, body_offset, footer_offset);
    header.checksum = digest_bytes(&body_bytes)?;

    let header_bytes = rkyv::to_bytes::<RkyvError>(&header)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| StorageError::Serialization("Header too large".to_string()))?;

    let mut out = Vec::with_capacity(footer_offset as usize + 64);
    out.extend_from_slice(&MAGIC_NUMBER);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&body_bytes);

    if out.len() as u64 != footer_offset {
        return Err(StorageError::Serialization(
            "Header size changed between passes".to_string(),
        ));
    }

    let mut footer = DatabaseFooter {
        integrity_hash: digest_bytes(&out)?,
        total_file_size: 0,
    };
    let footer_len = rkyv::to_bytes::<RkyvError>(&footer)
        .map_err(|e| StorageError::Serialization(e.to_string()))?
        .len();
    footer.total_file_size = footer_offset + footer_len as u64;

    let footer_bytes = rkyv::to_bytes::<RkyvError>(&footer)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    out.extend_from_slice(&footer_bytes);

    Ok(out)
}
