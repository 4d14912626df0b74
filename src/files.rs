//! Loading and saving the byte artifacts the tool consumes and produces

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

use crate::device::{ObjectContext, SessionContext};
use crate::error::StoreError;
use crate::tpm_structure::TpmStructure;
use crate::tpm_types::TPMT_TK_AUTH;

/// Upper bound on any context blob read from disk
pub const MAX_CONTEXT_SIZE: usize = 4096;

/// Where an input artifact comes from
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Path(&'a Path),
    Stdin,
}

impl Source<'_> {
    fn describe(&self) -> String {
        match self {
            Source::Path(path) => format!("\"{}\"", path.display()),
            Source::Stdin => "stdin".to_string(),
        }
    }
}

/// Durable storage for opaque byte blobs
pub trait ArtifactStore {
    fn save_bytes(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;

    /// Reads a whole artifact, failing if it is larger than `max_size`
    fn read_bytes(&self, source: Source<'_>, max_size: usize) -> Result<Vec<u8>, StoreError>;
}

/// Artifact store backed by the filesystem and the process's stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

fn read_bounded<R: Read>(reader: R, max_size: usize) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.take(max_size as u64 + 1).read_to_end(&mut data)?;
    Ok(data)
}

impl ArtifactStore for FsStore {
    fn save_bytes(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        fs::write(path, data).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), size = data.len(), "saved artifact");
        Ok(())
    }

    fn read_bytes(&self, source: Source<'_>, max_size: usize) -> Result<Vec<u8>, StoreError> {
        let data = match source {
            Source::Path(path) => fs::File::open(path)
                .and_then(|file| read_bounded(file, max_size))
                .map_err(|source| StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })?,
            Source::Stdin => read_bounded(io::stdin().lock(), max_size).map_err(StoreError::Stdin)?,
        };
        if data.len() > max_size {
            return Err(StoreError::TooLarge {
                origin: source.describe(),
                size: data.len(),
                max: max_size,
            });
        }
        Ok(data)
    }
}

fn load_structure<T: TpmStructure, S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
    what: &'static str,
) -> Result<T, StoreError> {
    let bytes = store.read_bytes(Source::Path(path), MAX_CONTEXT_SIZE)?;
    T::from_bytes(bytes).map_err(|source| StoreError::Malformed {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn save_structure<T: TpmStructure, S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
    value: &T,
    what: &'static str,
) -> Result<(), StoreError> {
    let bytes = value.to_bytes().map_err(|source| StoreError::Malformed {
        what,
        path: path.to_path_buf(),
        source,
    })?;
    store.save_bytes(path, &bytes)
}

pub fn load_session_context<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
) -> Result<SessionContext, StoreError> {
    load_structure(store, path, "session context")
}

pub fn save_session_context<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
    context: &SessionContext,
) -> Result<(), StoreError> {
    save_structure(store, path, context, "session context")
}

pub fn load_object_context<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
) -> Result<ObjectContext, StoreError> {
    load_structure(store, path, "object context")
}

pub fn save_object_context<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
    object: &ObjectContext,
) -> Result<(), StoreError> {
    save_structure(store, path, object, "object context")
}

/// Writes a marshalled `TPMT_TK_AUTH`
pub fn save_authorization_ticket<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
    ticket: &TPMT_TK_AUTH,
) -> Result<(), StoreError> {
    save_structure(store, path, ticket, "auth ticket")
}

pub fn load_authorization_ticket<S: ArtifactStore + ?Sized>(
    store: &S,
    path: &Path,
) -> Result<TPMT_TK_AUTH, StoreError> {
    load_structure(store, path, "auth ticket")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm_types::{TPM_RH, TPM_ST};

    #[test]
    fn test_save_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        FsStore.save_bytes(&path, &[1, 2, 3]).unwrap();
        assert_eq!(
            FsStore.read_bytes(Source::Path(&path), 3).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_read_enforces_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonce.bin");
        FsStore.save_bytes(&path, &[0u8; 65]).unwrap();
        let err = FsStore.read_bytes(Source::Path(&path), 64).unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { max: 64, .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsStore
            .read_bytes(Source::Path(&dir.path().join("absent")), 64)
            .unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[test]
    fn test_write_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsStore
            .save_bytes(&dir.path().join("no/such/dir/out.bin"), &[1])
            .unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }

    #[test]
    fn test_ticket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticket.bin");
        let ticket = TPMT_TK_AUTH {
            tag: TPM_ST::AUTH_SECRET,
            hierarchy: TPM_RH::ENDORSEMENT,
            digest: vec![0x11; 32],
        };
        save_authorization_ticket(&FsStore, &path, &ticket).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 2 + 4 + 2 + 32);
        assert_eq!(load_authorization_ticket(&FsStore, &path).unwrap(), ticket);
    }

    #[test]
    fn test_malformed_session_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.ctx");
        FsStore.save_bytes(&path, b"not a context").unwrap();
        let err = load_session_context(&FsStore, &path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Malformed { what: "session context", .. }
        ));
    }
}
