//! Session management and entity resolution on top of a [`TpmDevice`].
//!
//! The traits here are the seams the policy engine drives; [`TpmContext`]
//! implements all of them against a device and an artifact store.

use std::path::Path;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::auth_session::{AuthSpec, Session, SessionKind};
use crate::device::{Authorization, PolicySecretResponse, TpmDevice};
use crate::error::ResourceError;
use crate::files::{self, ArtifactStore, Source};
use crate::tpm_types::{MAX_DIGEST_SIZE, TPM_HANDLE};

/// Live handle of an auth entity plus the authorization session opened for it
#[derive(Debug)]
pub struct ResolvedObject {
    pub handle: TPM_HANDLE,
    pub name: Vec<u8>,
    pub session: Option<Session>,
    /// Loaded from a context file by the resolver; must be flushed after use
    pub loaded: bool,
}

/// Inputs of one PolicySecret assertion besides the two handles
#[derive(Debug, Clone, Copy)]
pub struct SecretParams<'a> {
    pub expiration: i32,
    pub nonce_tpm: &'a [u8],
    pub cp_hash_a: &'a [u8],
    pub policy_ref: &'a [u8],
}

pub trait SessionManager {
    fn restore(&mut self, path: &Path) -> Result<Session, ResourceError>;

    /// Releases a session. Sessions restored from a file are saved back to it.
    fn close(&mut self, session: Session) -> Result<(), ResourceError>;

    /// Reads the policy digest, writing it to `output` when given
    fn finalize_to_digest(
        &mut self,
        session: &Session,
        output: Option<&Path>,
    ) -> Result<Vec<u8>, ResourceError>;
}

pub trait EntityResolver {
    fn resolve(
        &mut self,
        context_path: &str,
        auth: &AuthSpec,
        allow_hierarchies: bool,
    ) -> Result<ResolvedObject, ResourceError>;

    /// Flushes an entity the resolver loaded
    fn unload(&mut self, handle: TPM_HANDLE) -> Result<(), ResourceError>;
}

pub trait PolicySecretCommand {
    fn policy_secret(
        &mut self,
        policy_session: &Session,
        entity: &ResolvedObject,
        params: &SecretParams<'_>,
    ) -> Result<PolicySecretResponse, ResourceError>;
}

/// Everything the policy engine needs from its environment
pub trait PolicyBackend: SessionManager + EntityResolver + PolicySecretCommand {}

impl<T: SessionManager + EntityResolver + PolicySecretCommand> PolicyBackend for T {}

/// Device plus artifact store, in the role ESYS plays for `tpm2-tools`
pub struct TpmContext<D, S> {
    device: D,
    store: S,
}

impl<D: TpmDevice, S: ArtifactStore> TpmContext<D, S> {
    pub fn new(device: D, store: S) -> Self {
        TpmContext { device, store }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Handle of the entity, and whether it was loaded and needs a flush
    fn load_handle(
        &mut self,
        context_path: &str,
        allow_hierarchies: bool,
    ) -> Result<(TPM_HANDLE, bool), ResourceError> {
        if let Some(handle) = TPM_HANDLE::from_hierarchy_alias(context_path) {
            if !allow_hierarchies {
                return Err(ResourceError::Invalid(format!(
                    "hierarchy \"{}\" is not allowed here",
                    context_path
                )));
            }
            return Ok((handle, false));
        }

        if let Some(handle) = TPM_HANDLE::parse(context_path) {
            if !handle.is_auth_entity() || (handle.is_hierarchy() && !allow_hierarchies) {
                return Err(ResourceError::Invalid(format!(
                    "handle {} cannot authorize a policy",
                    handle
                )));
            }
            return Ok((handle, false));
        }

        let object = files::load_object_context(&self.store, Path::new(context_path))?;
        let handle = self.device.load_object(&object)?;
        debug!(%handle, path = context_path, "loaded object context");
        Ok((handle, handle.handle_type() == TPM_HANDLE::HT_TRANSIENT))
    }

    fn name_and_session(
        &mut self,
        handle: TPM_HANDLE,
        auth: &AuthSpec,
    ) -> Result<(Vec<u8>, Option<Session>), ResourceError> {
        let name = self.device.read_name(handle)?;
        let session = self.open_auth_session(auth)?;
        Ok((name, session))
    }

    fn open_auth_session(&mut self, auth: &AuthSpec) -> Result<Option<Session>, ResourceError> {
        match auth {
            AuthSpec::Empty => Ok(None),
            AuthSpec::Password(password) => Ok(Some(Session::pw(password.clone()))),
            AuthSpec::PasswordFile(path) => {
                let source = match path {
                    Some(path) => Source::Path(path),
                    None => Source::Stdin,
                };
                let password = Zeroizing::new(self.store.read_bytes(source, MAX_DIGEST_SIZE)?);
                if password.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Session::pw(password)))
            }
            AuthSpec::Session(path) => self.restore(path).map(Some),
        }
    }
}

impl<D: TpmDevice, S: ArtifactStore> SessionManager for TpmContext<D, S> {
    fn restore(&mut self, path: &Path) -> Result<Session, ResourceError> {
        let context = files::load_session_context(&self.store, path)?;
        let handle = self.device.context_load(&context)?;
        debug!(%handle, path = %path.display(), "restored session");
        Ok(Session::restored(
            handle,
            context.session_type,
            context.hash_alg,
            path.to_path_buf(),
        ))
    }

    fn close(&mut self, session: Session) -> Result<(), ResourceError> {
        if let SessionKind::Password(_) = session.kind {
            return Ok(());
        }
        match &session.path {
            Some(path) => {
                let context = self.device.context_save(session.handle)?;
                files::save_session_context(&self.store, path, &context)?;
                debug!(handle = %session.handle, path = %path.display(), "saved session");
            }
            None => self.device.flush_context(session.handle)?,
        }
        Ok(())
    }

    fn finalize_to_digest(
        &mut self,
        session: &Session,
        output: Option<&Path>,
    ) -> Result<Vec<u8>, ResourceError> {
        let digest = self.device.policy_get_digest(session.handle)?;
        if let Some(path) = output {
            self.store.save_bytes(path, &digest)?;
        }
        Ok(digest)
    }
}

impl<D: TpmDevice, S: ArtifactStore> EntityResolver for TpmContext<D, S> {
    fn resolve(
        &mut self,
        context_path: &str,
        auth: &AuthSpec,
        allow_hierarchies: bool,
    ) -> Result<ResolvedObject, ResourceError> {
        let (handle, loaded) = self.load_handle(context_path, allow_hierarchies)?;
        match self.name_and_session(handle, auth) {
            Ok((name, session)) => Ok(ResolvedObject {
                handle,
                name,
                session,
                loaded,
            }),
            Err(err) => {
                if loaded {
                    if let Err(flush) = self.device.flush_context(handle) {
                        warn!(%handle, error = %flush, "could not flush entity after failed resolve");
                    }
                }
                Err(err)
            }
        }
    }

    fn unload(&mut self, handle: TPM_HANDLE) -> Result<(), ResourceError> {
        self.device.flush_context(handle)?;
        debug!(%handle, "flushed auth entity");
        Ok(())
    }
}

impl<D: TpmDevice, S: ArtifactStore> PolicySecretCommand for TpmContext<D, S> {
    fn policy_secret(
        &mut self,
        policy_session: &Session,
        entity: &ResolvedObject,
        params: &SecretParams<'_>,
    ) -> Result<PolicySecretResponse, ResourceError> {
        if !policy_session.is_policy() {
            return Err(ResourceError::Invalid(format!(
                "session {} is not a policy session",
                policy_session.handle
            )));
        }
        let authorization = match &entity.session {
            None => Authorization::Password(&[]),
            Some(Session {
                kind: SessionKind::Password(password),
                ..
            }) => Authorization::Password(password),
            Some(session) => Authorization::Session(session.handle),
        };
        let response = self.device.policy_secret(
            entity.handle,
            authorization,
            policy_session.handle,
            params.nonce_tpm,
            params.cp_hash_a,
            params.policy_ref,
            params.expiration,
        )?;
        Ok(response)
    }
}
