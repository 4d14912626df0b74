/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! Software computation of the PolicySecret digest and its auth ticket.
//!
//! The device uses these to extend a policy session exactly the way a TPM
//! does; callers can also compute the expected digest of a policy that
//! consists of a single PolicySecret without touching a device.

use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::tpm_types::*;

/// `policyDigest = H(policyDigest || commandCode || arg2)`
/// Then: `policyDigest = H(policyDigest || arg3)`
fn policy_update(
    hash_alg: TPM_ALG_ID,
    accumulator: &mut Vec<u8>,
    command_code: u32,
    arg2: &[u8],
    arg3: &[u8],
) -> Result<(), TpmError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(accumulator);
    buf.extend_from_slice(&command_code.to_be_bytes());
    buf.extend_from_slice(arg2);
    *accumulator = Crypto::hash(hash_alg, &buf)?;

    // The second extend happens even for an empty arg3
    let mut buf2 = Vec::new();
    buf2.extend_from_slice(accumulator);
    buf2.extend_from_slice(arg3);
    *accumulator = Crypto::hash(hash_alg, &buf2)?;
    Ok(())
}

/// PolicySecret assertion: proves knowledge of an entity's auth value.
pub struct PolicySecret<'a> {
    pub auth_object_name: &'a [u8],
    pub policy_ref: &'a [u8],
}

impl<'a> PolicySecret<'a> {
    pub fn new(auth_object_name: &'a [u8], policy_ref: &'a [u8]) -> Self {
        Self {
            auth_object_name,
            policy_ref,
        }
    }

    /// Extend a running policy digest with this assertion
    pub fn update_policy_digest(&self, hash_alg: TPM_ALG_ID, acc: &mut Vec<u8>) -> Result<(), TpmError> {
        if acc.len() != hash_alg.digest_size() {
            return Err(TpmError::InvalidArraySize(format!(
                "policy digest is {} bytes, {:?} needs {}",
                acc.len(),
                hash_alg,
                hash_alg.digest_size()
            )));
        }
        policy_update(hash_alg, acc, TPM_CC::PolicySecret, self.auth_object_name, self.policy_ref)
    }

    /// Digest of a fresh policy containing only this assertion (trial session)
    pub fn get_policy_digest(&self, hash_alg: TPM_ALG_ID) -> Result<Vec<u8>, TpmError> {
        let mut accumulator = vec![0u8; hash_alg.digest_size()];
        self.update_policy_digest(hash_alg, &mut accumulator)?;
        Ok(accumulator)
    }

    /// `HMAC(proof, TPM_ST_AUTH_SECRET || timeout || cpHashA || policyRef || authName)`
    pub fn compute_ticket(
        &self,
        hash_alg: TPM_ALG_ID,
        proof: &[u8],
        hierarchy: u32,
        timeout: &[u8],
        cp_hash_a: &[u8],
    ) -> Result<TPMT_TK_AUTH, TpmError> {
        let mut to_hmac = Vec::new();
        to_hmac.extend_from_slice(&TPM_ST::AUTH_SECRET.to_be_bytes());
        to_hmac.extend_from_slice(timeout);
        to_hmac.extend_from_slice(cp_hash_a);
        to_hmac.extend_from_slice(self.policy_ref);
        to_hmac.extend_from_slice(self.auth_object_name);

        Ok(TPMT_TK_AUTH {
            tag: TPM_ST::AUTH_SECRET,
            hierarchy,
            digest: Crypto::hmac(hash_alg, proof, &to_hmac)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endorsement_policy_digest() {
        // PolicySecret(TPM_RH_ENDORSEMENT) with an empty policyRef
        let name = TPM_HANDLE::new(TPM_RH::ENDORSEMENT).permanent_name();
        let digest = PolicySecret::new(&name, &[])
            .get_policy_digest(TPM_ALG_ID::SHA256)
            .unwrap();
        assert_eq!(
            hex::encode(digest),
            "837197674484b3f81a90cc8d46a5d724fd52d76e06520b64f2a1da1b331469aa"
        );
    }

    #[test]
    fn test_policy_ref_changes_digest() {
        let name = TPM_HANDLE::new(TPM_RH::OWNER).permanent_name();
        let plain = PolicySecret::new(&name, &[]).get_policy_digest(TPM_ALG_ID::SHA256).unwrap();
        let qualified = PolicySecret::new(&name, b"ref")
            .get_policy_digest(TPM_ALG_ID::SHA256)
            .unwrap();
        assert_ne!(plain, qualified);
    }

    #[test]
    fn test_rejects_mismatched_accumulator() {
        let name = TPM_HANDLE::new(TPM_RH::OWNER).permanent_name();
        let mut acc = vec![0u8; 20];
        assert!(PolicySecret::new(&name, &[])
            .update_policy_digest(TPM_ALG_ID::SHA256, &mut acc)
            .is_err());
    }

    #[test]
    fn test_ticket_binds_timeout() {
        let name = TPM_HANDLE::new(TPM_RH::OWNER).permanent_name();
        let assertion = PolicySecret::new(&name, &[]);
        let proof = [7u8; 32];
        let a = assertion
            .compute_ticket(TPM_ALG_ID::SHA256, &proof, TPM_RH::OWNER, &1u64.to_be_bytes(), &[])
            .unwrap();
        let b = assertion
            .compute_ticket(TPM_ALG_ID::SHA256, &proof, TPM_RH::OWNER, &2u64.to_be_bytes(), &[])
            .unwrap();
        assert_eq!(a.tag, TPM_ST::AUTH_SECRET);
        assert_eq!(a.digest.len(), 32);
        assert_ne!(a.digest, b.digest);
    }
}
