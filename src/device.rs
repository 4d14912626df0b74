/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! TPM device abstraction and the software TPM used when no hardware
//! transport is configured

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::policy::PolicySecret;
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_structure::{TpmEnum, TpmStructure};
use crate::tpm_types::*;

/// Magic at the start of every context blob this tool writes
pub const CONTEXT_MAGIC: u32 = 0xBADC_C0DE;
pub const CONTEXT_VERSION: u32 = 1;

fn check_header(buffer: &mut TpmBuffer) -> Result<(), TpmError> {
    let magic = buffer.read_u32()?;
    if magic != CONTEXT_MAGIC {
        return Err(TpmError::IncorrectTag {
            expected: CONTEXT_MAGIC,
            actual: magic,
        });
    }
    let version = buffer.read_u32()?;
    if version != CONTEXT_VERSION {
        return Err(TpmError::IncorrectTag {
            expected: CONTEXT_VERSION,
            actual: version,
        });
    }
    Ok(())
}

/// Saved state of an authorization or policy session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_type: TPM_SE,
    pub hash_alg: TPM_ALG_ID,
    pub handle: TPM_HANDLE,
    pub nonce_tpm: Vec<u8>,
    pub policy_digest: Vec<u8>,
}

impl TpmStructure for SessionContext {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        buffer.write_u32(CONTEXT_MAGIC);
        buffer.write_u32(CONTEXT_VERSION);
        buffer.write_u8(self.session_type.get_value());
        buffer.write_u16(self.hash_alg.get_value());
        buffer.write_u32(self.handle.0);
        buffer.write_sized(&self.nonce_tpm)?;
        buffer.write_sized(&self.policy_digest)
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        check_header(buffer)?;
        let session_type = TPM_SE::try_from_value(buffer.read_u8()?)?;
        let hash_alg = TPM_ALG_ID::try_from_value(buffer.read_u16()?)?;
        let handle = TPM_HANDLE::new(buffer.read_u32()?);
        let nonce_tpm = buffer.read_sized(MAX_DIGEST_SIZE)?;
        let policy_digest = buffer.read_sized(MAX_DIGEST_SIZE)?;
        if policy_digest.len() != hash_alg.digest_size() {
            return Err(TpmError::InvalidArraySize(format!(
                "policy digest of {} bytes for {:?}",
                policy_digest.len(),
                hash_alg
            )));
        }
        Ok(SessionContext {
            session_type,
            hash_alg,
            handle,
            nonce_tpm,
            policy_digest,
        })
    }
}

/// Saved state of a loadable object. The auth value is only meaningful to
/// the software TPM, which checks proofs against it.
#[derive(Debug, Clone)]
pub struct ObjectContext {
    pub hierarchy: u32,
    pub handle: TPM_HANDLE,
    pub name: Vec<u8>,
    pub auth: Zeroizing<Vec<u8>>,
}

impl TpmStructure for ObjectContext {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        buffer.write_u32(CONTEXT_MAGIC);
        buffer.write_u32(CONTEXT_VERSION);
        buffer.write_u32(self.hierarchy);
        buffer.write_u32(self.handle.0);
        buffer.write_sized(&self.name)?;
        buffer.write_sized(&self.auth)
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        check_header(buffer)?;
        Ok(ObjectContext {
            hierarchy: buffer.read_u32()?,
            handle: TPM_HANDLE::new(buffer.read_u32()?),
            // Names are a 2-byte algorithm id plus a digest
            name: buffer.read_sized(MAX_DIGEST_SIZE + 2)?,
            auth: Zeroizing::new(buffer.read_sized(MAX_DIGEST_SIZE)?),
        })
    }
}

/// How the auth entity's authorization is presented to the TPM
#[derive(Clone, Copy)]
pub enum Authorization<'a> {
    Password(&'a [u8]),
    Session(TPM_HANDLE),
}

/// Response parameters of TPM2_PolicySecret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySecretResponse {
    pub timeout: Vec<u8>,
    pub policy_ticket: TPMT_TK_AUTH,
}

/// The TPM commands this tool issues
pub trait TpmDevice {
    /// Load a saved session; returns the handle it is reachable under
    fn context_load(&mut self, context: &SessionContext) -> Result<TPM_HANDLE, TpmError>;

    /// Save a loaded session, evicting it from TPM memory
    fn context_save(&mut self, handle: TPM_HANDLE) -> Result<SessionContext, TpmError>;

    /// Discard a loaded session or transient object
    fn flush_context(&mut self, handle: TPM_HANDLE) -> Result<(), TpmError>;

    /// Load an object from its saved context
    fn load_object(&mut self, object: &ObjectContext) -> Result<TPM_HANDLE, TpmError>;

    /// Name of an object, NV index or permanent handle
    fn read_name(&mut self, handle: TPM_HANDLE) -> Result<Vec<u8>, TpmError>;

    fn policy_get_digest(&mut self, session: TPM_HANDLE) -> Result<Vec<u8>, TpmError>;

    #[allow(clippy::too_many_arguments)]
    fn policy_secret(
        &mut self,
        auth_handle: TPM_HANDLE,
        authorization: Authorization<'_>,
        policy_session: TPM_HANDLE,
        nonce_tpm: &[u8],
        cp_hash_a: &[u8],
        policy_ref: &[u8],
        expiration: i32,
    ) -> Result<PolicySecretResponse, TpmError>;
}

fn failed(command: &'static str, rc: TPM_RC) -> TpmError {
    TpmError::CommandFailed { command, rc }
}

struct SoftEntity {
    name: Vec<u8>,
    hierarchy: u32,
    auth: Zeroizing<Vec<u8>>,
}

/// TPM implemented in software. Hierarchies are always present; objects and
/// sessions exist only while loaded.
pub struct SoftTpm {
    hierarchy_auth: HashMap<u32, Zeroizing<Vec<u8>>>,
    objects: HashMap<TPM_HANDLE, SoftEntity>,
    sessions: HashMap<TPM_HANDLE, SessionContext>,
    proof: Zeroizing<Vec<u8>>,
    next_transient: u32,
    next_session: u32,
}

impl SoftTpm {
    pub fn new() -> Self {
        SoftTpm {
            hierarchy_auth: HashMap::new(),
            objects: HashMap::new(),
            sessions: HashMap::new(),
            proof: Zeroizing::new(Crypto::get_random(32)),
            next_transient: 0x8000_0000,
            next_session: 0,
        }
    }

    pub fn with_hierarchy_auth(mut self, hierarchy: u32, auth: &[u8]) -> Self {
        self.hierarchy_auth
            .insert(hierarchy, Zeroizing::new(auth.to_vec()));
        self
    }

    /// Fixes the secret tickets are HMACed with so they can be checked later
    pub fn with_proof(mut self, proof: &[u8]) -> Self {
        self.proof = Zeroizing::new(proof.to_vec());
        self
    }

    /// Makes an object or NV index resident at a persistent handle
    pub fn persist(&mut self, object: &ObjectContext) {
        self.objects.insert(
            object.handle,
            SoftEntity {
                name: object.name.clone(),
                hierarchy: object.hierarchy,
                auth: object.auth.clone(),
            },
        );
    }

    /// TPM2_StartAuthSession with a random nonceTPM and a zeroed digest
    pub fn start_auth_session(
        &mut self,
        session_type: TPM_SE,
        hash_alg: TPM_ALG_ID,
    ) -> Result<TPM_HANDLE, TpmError> {
        let high = match session_type {
            TPM_SE::HMAC => (TPM_HANDLE::HT_HMAC_SESSION as u32) << 24,
            TPM_SE::POLICY | TPM_SE::TRIAL => (TPM_HANDLE::HT_POLICY_SESSION as u32) << 24,
        };
        let handle = TPM_HANDLE::new(high | self.next_session);
        self.next_session += 1;
        self.sessions.insert(
            handle,
            SessionContext {
                session_type,
                hash_alg,
                handle,
                nonce_tpm: Crypto::get_random(hash_alg.digest_size()),
                policy_digest: vec![0u8; hash_alg.digest_size()],
            },
        );
        debug!(%handle, ?session_type, "started session");
        Ok(handle)
    }

    /// Number of sessions currently resident
    pub fn loaded_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Number of transient objects currently resident
    pub fn loaded_objects(&self) -> usize {
        self.objects
            .keys()
            .filter(|h| h.handle_type() == TPM_HANDLE::HT_TRANSIENT)
            .count()
    }

    fn entity(&self, handle: TPM_HANDLE) -> Option<(Vec<u8>, u32, &[u8])> {
        if handle.is_hierarchy() {
            let auth = self
                .hierarchy_auth
                .get(&handle.0)
                .map(|a| a.as_slice())
                .unwrap_or(&[]);
            return Some((handle.permanent_name(), handle.ticket_hierarchy(), auth));
        }
        self.objects
            .get(&handle)
            .map(|o| (o.name.clone(), o.hierarchy, o.auth.as_slice()))
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for SoftTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmDevice for SoftTpm {
    fn context_load(&mut self, context: &SessionContext) -> Result<TPM_HANDLE, TpmError> {
        let handle = context.handle;
        let expected = match context.session_type {
            TPM_SE::HMAC => TPM_HANDLE::HT_HMAC_SESSION,
            TPM_SE::POLICY | TPM_SE::TRIAL => TPM_HANDLE::HT_POLICY_SESSION,
        };
        if handle.handle_type() != expected {
            return Err(failed("TPM2_ContextLoad", TPM_RC::HANDLE));
        }
        if self.sessions.contains_key(&handle) {
            return Err(failed("TPM2_ContextLoad", TPM_RC::SESSION_MEMORY));
        }
        self.sessions.insert(handle, context.clone());
        trace!(%handle, "context loaded");
        Ok(handle)
    }

    fn context_save(&mut self, handle: TPM_HANDLE) -> Result<SessionContext, TpmError> {
        let context = self
            .sessions
            .remove(&handle)
            .ok_or_else(|| failed("TPM2_ContextSave", TPM_RC::HANDLE))?;
        trace!(%handle, "context saved");
        Ok(context)
    }

    fn flush_context(&mut self, handle: TPM_HANDLE) -> Result<(), TpmError> {
        let removed = match handle.handle_type() {
            TPM_HANDLE::HT_TRANSIENT => self.objects.remove(&handle).is_some(),
            TPM_HANDLE::HT_HMAC_SESSION | TPM_HANDLE::HT_POLICY_SESSION => {
                self.sessions.remove(&handle).is_some()
            }
            _ => false,
        };
        if !removed {
            return Err(failed("TPM2_FlushContext", TPM_RC::HANDLE));
        }
        Ok(())
    }

    fn load_object(&mut self, object: &ObjectContext) -> Result<TPM_HANDLE, TpmError> {
        let handle = match object.handle.handle_type() {
            TPM_HANDLE::HT_TRANSIENT => {
                let handle = TPM_HANDLE::new(self.next_transient);
                self.next_transient += 1;
                handle
            }
            TPM_HANDLE::HT_PERSISTENT | TPM_HANDLE::HT_NV_INDEX => object.handle,
            _ => return Err(failed("TPM2_ContextLoad", TPM_RC::HANDLE)),
        };
        self.objects.insert(
            handle,
            SoftEntity {
                name: object.name.clone(),
                hierarchy: object.hierarchy,
                auth: object.auth.clone(),
            },
        );
        Ok(handle)
    }

    fn read_name(&mut self, handle: TPM_HANDLE) -> Result<Vec<u8>, TpmError> {
        self.entity(handle)
            .map(|(name, _, _)| name)
            .ok_or_else(|| failed("TPM2_ReadPublic", TPM_RC::HANDLE))
    }

    fn policy_get_digest(&mut self, session: TPM_HANDLE) -> Result<Vec<u8>, TpmError> {
        self.sessions
            .get(&session)
            .map(|s| s.policy_digest.clone())
            .ok_or_else(|| failed("TPM2_PolicyGetDigest", TPM_RC::HANDLE))
    }

    fn policy_secret(
        &mut self,
        auth_handle: TPM_HANDLE,
        authorization: Authorization<'_>,
        policy_session: TPM_HANDLE,
        nonce_tpm: &[u8],
        cp_hash_a: &[u8],
        policy_ref: &[u8],
        expiration: i32,
    ) -> Result<PolicySecretResponse, TpmError> {
        const CMD: &str = "TPM2_PolicySecret";

        let (auth_name, hierarchy, auth_value) = self
            .entity(auth_handle)
            .ok_or_else(|| failed(CMD, TPM_RC::HANDLE))?;

        let (session_type, session_nonce) = self
            .sessions
            .get(&policy_session)
            .map(|s| (s.session_type, s.nonce_tpm.clone()))
            .ok_or_else(|| failed(CMD, TPM_RC::HANDLE))?;
        if session_type == TPM_SE::HMAC {
            return Err(failed(CMD, TPM_RC::TYPE));
        }
        let trial = session_type == TPM_SE::TRIAL;

        if !trial {
            match authorization {
                Authorization::Password(password) => {
                    if password != auth_value {
                        return Err(failed(CMD, TPM_RC::AUTH_FAIL));
                    }
                }
                Authorization::Session(handle) => match self.sessions.get(&handle) {
                    Some(s) if s.session_type == TPM_SE::HMAC => {}
                    Some(_) => return Err(failed(CMD, TPM_RC::AUTH_FAIL)),
                    None => return Err(failed(CMD, TPM_RC::HANDLE)),
                },
            }
        }
        if !nonce_tpm.is_empty() && nonce_tpm != session_nonce.as_slice() {
            return Err(failed(CMD, TPM_RC::NONCE));
        }

        let session = self
            .sessions
            .get_mut(&policy_session)
            .ok_or_else(|| failed(CMD, TPM_RC::HANDLE))?;
        let hash_alg = session.hash_alg;

        let assertion = PolicySecret::new(&auth_name, policy_ref);
        assertion.update_policy_digest(hash_alg, &mut session.policy_digest)?;

        if expiration >= 0 || trial {
            return Ok(PolicySecretResponse {
                timeout: Vec::new(),
                policy_ticket: TPMT_TK_AUTH::null_ticket(),
            });
        }

        let lifetime_ms = (expiration as i64).unsigned_abs() * 1000;
        let timeout = (Self::now_ms() + lifetime_ms).to_be_bytes().to_vec();
        let policy_ticket =
            assertion.compute_ticket(hash_alg, &self.proof, hierarchy, &timeout, cp_hash_a)?;
        Ok(PolicySecretResponse {
            timeout,
            policy_ticket,
        })
    }
}
