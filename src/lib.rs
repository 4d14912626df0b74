//! `tpm2-policysecret`: extend a TPM2 policy session with a PolicySecret
//! assertion, proving knowledge of an entity's auth value.
//!
//! [`engine::execute`] drives one assertion against any [`context::PolicyBackend`];
//! [`context::TpmContext`] over [`device::SoftTpm`] and [`files::FsStore`] is
//! the backend the binary uses.

pub mod auth_session;
pub mod config;
pub mod context;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod files;
pub mod policy;
pub mod tpm_buffer;
pub mod tpm_structure;
pub mod tpm_type_extensions;
pub mod tpm_types;

pub use config::PolicySecretConfig;
pub use engine::{execute, AssertionWarning, PolicySecretOutcome, PolicySecretTool};
pub use error::{Error, ErrorKind};
