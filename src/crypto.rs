use crate::{error::TpmError, tpm_types::TPM_ALG_ID};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use sha2::{Digest as Sha2Digest, Sha256, Sha384, Sha512};
use sm3::Sm3;

pub struct Crypto;

impl Crypto {
    pub fn digest_size(alg: TPM_ALG_ID) -> usize {
        match alg {
            TPM_ALG_ID::SHA1 => 20,
            TPM_ALG_ID::SHA256 => 32,
            TPM_ALG_ID::SHA384 => 48,
            TPM_ALG_ID::SHA512 => 64,
            TPM_ALG_ID::SM3_256 => 32,
        }
    }

    // Hash a byte buffer using the specified algorithm
    pub fn hash(alg: TPM_ALG_ID, data: &[u8]) -> Result<Vec<u8>, TpmError> {
        let digest = match alg {
            TPM_ALG_ID::SHA1 => Sha1::digest(data).to_vec(),
            TPM_ALG_ID::SHA256 => Sha256::digest(data).to_vec(),
            TPM_ALG_ID::SHA384 => Sha384::digest(data).to_vec(),
            TPM_ALG_ID::SHA512 => Sha512::digest(data).to_vec(),
            TPM_ALG_ID::SM3_256 => Sm3::digest(data).to_vec(),
        };

        let expected_size = Self::digest_size(alg);
        if (digest.len() != expected_size) {
            return Err(TpmError::InvalidArraySize(format!(
                "Hash output length mismatch: expected {}, got {}",
                expected_size,
                digest.len()
            )));
        }

        Ok(digest)
    }

    pub fn hmac(hash_alg: TPM_ALG_ID, key: &[u8], to_hash: &[u8]) -> Result<Vec<u8>, TpmError> {
        fn mac<M: Mac + hmac::digest::KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TpmError> {
            let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| {
                TpmError::InvalidArraySize("HMAC can take key of any size".to_string())
            })?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }

        match hash_alg {
            TPM_ALG_ID::SHA1 => mac::<Hmac<Sha1>>(key, to_hash),
            TPM_ALG_ID::SHA256 => mac::<Hmac<Sha256>>(key, to_hash),
            TPM_ALG_ID::SHA384 => mac::<Hmac<Sha384>>(key, to_hash),
            TPM_ALG_ID::SHA512 => mac::<Hmac<Sha512>>(key, to_hash),
            TPM_ALG_ID::SM3_256 => mac::<Hmac<Sm3>>(key, to_hash),
        }
    }

    // Get random bytes
    pub fn get_random(num_bytes: usize) -> Vec<u8> {
        let mut result = vec![0u8; num_bytes];
        OsRng.fill_bytes(&mut result);
        result
    }
}
