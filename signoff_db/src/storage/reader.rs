use std::fs;
use std::path::Path;

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;

use crate::core::record::WorkflowRecord;
use crate::error::StorageError;
use crate::storage::digest_bytes;
use crate::storage::persistence::{
    DatabaseBody, DatabaseFooter, DatabaseHeader, MAGIC_NUMBER, PREAMBLE_SIZE, VERSION_MAJOR,
};

/// Copies `bytes` into a buffer aligned for rkyv and decodes it.
pub(crate) fn decode<T>(bytes: &[u8], what: &str) -> Result<T, StorageError>
where
    T: rkyv::Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<
            rkyv::api::high::HighValidator<'a, RkyvError>,
        > + rkyv::Deserialize<T, rkyv::api::high::HighDeserializer<RkyvError>>,
{
    let mut aligned: AlignedVec = AlignedVec::new();
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, RkyvError>(&aligned)
        .map_err(|e| StorageError::Deserialization(format!("{}: {}", what, e)))
}

pub struct DatabaseReader {
    buffer: Vec<u8>,
}

impl DatabaseReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        // read the whole file so later disk changes cannot race the decode
        let buffer = fs::read(path)?;
        Ok(Self { buffer })
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn read_and_verify(&self) -> Result<(DatabaseHeader, DatabaseBody), StorageError> {
        let magic = self
            .buffer
            .get(..4)
            .ok_or_else(|| StorageError::Deserialization("File truncated: missing magic".into()))?;
        if magic != MAGIC_NUMBER {
            return Err(StorageError::InvalidMagic);
        }

        let header_len: [u8; 4] = self
            .buffer
            .get(4..PREAMBLE_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| StorageError::Deserialization("File truncated: missing header".into()))?;
        let header_end = PREAMBLE_SIZE + u32::from_le_bytes(header_len) as usize;

        let header_slice = self
            .buffer
            .get(PREAMBLE_SIZE..header_end)
            .ok_or_else(|| StorageError::Deserialization("File truncated: missing header".into()))?;

        let header: DatabaseHeader = decode(header_slice, "Header validation")?;

        if header.magic != MAGIC_NUMBER {
            return Err(StorageError::InvalidMagic);
        }
        if header.version_major != VERSION_MAJOR {
            return Err(StorageError::UnsupportedVersion(
                header.version_major,
                header.version_minor,
            ));
        }

        let body_start = header.body_offset as usize;
        let body_end = header.footer_offset as usize;

        let body_bytes = self.buffer.get(body_start..body_end).ok_or_else(|| {
            StorageError::Deserialization("Header offsets point outside file boundaries".into())
        })?;

        if digest_bytes(body_bytes)? != header.checksum {
            return Err(StorageError::ChecksumMismatch);
        }

        let footer_bytes = self.buffer.get(body_end..).ok_or_else(|| {
            StorageError::Deserialization("File truncated: missing footer".into())
        })?;
        let footer: DatabaseFooter = decode(footer_bytes, "Footer validation")?;

        let pre_footer = self
            .buffer
            .get(..body_end)
            .ok_or_else(|| StorageError::Deserialization("File truncated".into()))?;
        if digest_bytes(pre_footer)? != footer.integrity_hash
            || footer.total_file_size != self.buffer.len() as u64
        {
            return Err(StorageError::ChecksumMismatch);
        }

        let body: DatabaseBody = decode(body_bytes, "Body corruption")?;

        if body.workflows.len() as u64 != header.workflow_count {
            return Err(StorageError::ValidationFailed(format!(
                "Header counts {} workflows, body holds {}",
                header.workflow_count,
                body.workflows.len()
            )));
        }

        Ok((header, body))
    }

    /// Verified workflows and the next id sequence.
    pub fn read_workflows(&self) -> Result<(Vec<WorkflowRecord>, u64), StorageError> {
        let (_header, body) = self.read_and_verify()?;
        let workflows = body
            .workflows
            .into_iter()
            .map(WorkflowRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((workflows, body.next_sequence))
    }
}
