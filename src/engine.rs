//! The PolicySecret run: restore the policy session, prove the entity's
//! secret, harvest ticket and timeout, and release everything acquired.
//!
//! Release rules:
//! - the entity's authorization session is closed, and an entity loaded from
//!   a context file is flushed, right after the assertion whether or not it
//!   worked; an assertion failure outranks a release failure,
//! - the policy session is closed by [`PolicySecretTool::teardown`], or by
//!   `Drop` if the caller never tore down,
//! - ticket and timeout buffers are owned by the run and dropped when it
//!   returns.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, warn};

use crate::auth_session::Session;
use crate::config::PolicySecretConfig;
use crate::context::{PolicyBackend, ResolvedObject, SecretParams};
use crate::device::PolicySecretResponse;
use crate::error::Error;
use crate::files::{self, ArtifactStore, Source};
use crate::tpm_types::MAX_DIGEST_SIZE;

/// Optional artifact the TPM did not produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionWarning {
    NoTimeout,
    NoTicket,
}

impl fmt::Display for AssertionWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoTimeout => write!(f, "Policy assertion did not produce timeout"),
            Self::NoTicket => write!(f, "Policy assertion did not produce auth ticket."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySecretOutcome {
    pub policy_digest: Vec<u8>,
    pub timeout_written: bool,
    pub ticket_written: bool,
    pub warnings: Vec<AssertionWarning>,
}

/// Keeps `primary`'s error if it has one, otherwise reports `secondary`'s
fn first_failure<T>(primary: Result<T, Error>, secondary: Result<(), Error>) -> Result<T, Error> {
    match (primary, secondary) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(masked)) => {
            warn!(error = %masked, "cleanup also failed");
            Err(err)
        }
    }
}

pub struct PolicySecretTool<'a, B: PolicyBackend, S: ArtifactStore> {
    backend: &'a mut B,
    store: &'a S,
    policy_session: Option<Session>,
}

impl<'a, B: PolicyBackend, S: ArtifactStore> PolicySecretTool<'a, B, S> {
    pub fn new(backend: &'a mut B, store: &'a S) -> Self {
        PolicySecretTool {
            backend,
            store,
            policy_session: None,
        }
    }

    /// Runs one assertion. A policy session left over from an earlier run is
    /// torn down first.
    pub fn run(&mut self, config: &PolicySecretConfig) -> Result<PolicySecretOutcome, Error> {
        let (session_path, locator) = config.validate()?;
        self.teardown()?;

        let session = self
            .backend
            .restore(session_path)
            .map_err(|source| Error::SessionRestore {
                path: session_path.to_path_buf(),
                source,
            })?;
        let session: &Session = self.policy_session.insert(session);

        let entity = self
            .backend
            .resolve(&locator.context_path, &locator.auth, true)
            .map_err(|source| Error::EntityResolution {
                context: locator.context_path.clone(),
                source,
            })?;
        debug!(handle = %entity.handle, "resolved auth entity");

        let response = assert_with_entity(&mut *self.backend, self.store, session, entity, config)?;

        let policy_digest = self
            .backend
            .finalize_to_digest(session, config.policy_digest_out.as_deref())
            .map_err(Error::Finalize)?;

        let PolicySecretResponse {
            timeout,
            policy_ticket,
        } = response;
        let mut outcome = PolicySecretOutcome {
            policy_digest,
            ..Default::default()
        };
        let mut last_error = None;

        if let Some(path) = &config.timeout_out {
            if timeout.is_empty() {
                warn!("{}", AssertionWarning::NoTimeout);
                outcome.warnings.push(AssertionWarning::NoTimeout);
            } else {
                match self.store.save_bytes(path, &timeout) {
                    Ok(()) => outcome.timeout_written = true,
                    Err(err) => {
                        error!(error = %err, "Failed to save timeout to file.");
                        last_error = Some(Error::PersistTimeout(err));
                    }
                }
            }
        }

        if let Some(path) = &config.ticket_out {
            if policy_ticket.digest.is_empty() {
                warn!("{}", AssertionWarning::NoTicket);
                outcome.warnings.push(AssertionWarning::NoTicket);
            } else {
                match files::save_authorization_ticket(self.store, path, &policy_ticket) {
                    Ok(()) => outcome.ticket_written = true,
                    Err(err) => {
                        error!(error = %err, "Failed to save auth ticket");
                        last_error = Some(Error::PersistTicket(err));
                    }
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Closes the policy session if `run` restored one. Safe to call twice.
    pub fn teardown(&mut self) -> Result<(), Error> {
        match self.policy_session.take() {
            Some(session) => {
                debug!(handle = %session.handle, "closing policy session");
                self.backend.close(session).map_err(Error::PolicySessionClose)
            }
            None => Ok(()),
        }
    }
}

impl<B: PolicyBackend, S: ArtifactStore> Drop for PolicySecretTool<'_, B, S> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(error = %err, "policy session close on drop failed");
        }
    }
}

/// Issues the assertion, then always releases the entity's session and handle
fn assert_with_entity<B: PolicyBackend, S: ArtifactStore>(
    backend: &mut B,
    store: &S,
    session: &Session,
    mut entity: ResolvedObject,
    config: &PolicySecretConfig,
) -> Result<PolicySecretResponse, Error> {
    let assertion = load_qualifier(store, config.qualifier_data.as_deref()).and_then(|policy_ref| {
        let params = SecretParams {
            expiration: config.expiration,
            nonce_tpm: config.nonce_tpm.as_bytes(),
            cp_hash_a: &[],
            policy_ref: &policy_ref,
        };
        backend
            .policy_secret(session, &entity, &params)
            .map_err(Error::Assertion)
    });

    let closed = match entity.session.take() {
        Some(auth_session) => backend.close(auth_session).map_err(Error::EntitySessionClose),
        None => Ok(()),
    };
    let flushed = if entity.loaded {
        backend.unload(entity.handle).map_err(Error::EntityFlush)
    } else {
        Ok(())
    };

    first_failure(first_failure(assertion, closed), flushed)
}

fn load_qualifier<S: ArtifactStore>(store: &S, path: Option<&Path>) -> Result<Vec<u8>, Error> {
    match path {
        Some(path) => store
            .read_bytes(Source::Path(path), MAX_DIGEST_SIZE)
            .map_err(Error::Qualifier),
        None => Ok(Vec::new()),
    }
}

/// Runs the assertion and the teardown phase; a run error outranks a
/// teardown error
pub fn execute<B: PolicyBackend, S: ArtifactStore>(
    backend: &mut B,
    store: &S,
    config: &PolicySecretConfig,
) -> Result<PolicySecretOutcome, Error> {
    let mut tool = PolicySecretTool::new(backend, store);
    let result = tool.run(config);
    let teardown = tool.teardown();
    first_failure(result, teardown)
}
