/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! Marshalling traits shared by the TPM structures this tool reads and writes

use crate::error::TpmError;
use crate::tpm_buffer::TpmBuffer;

/// Trait for structures that can be marshaled to/from TPM wire format
pub trait TpmStructure: Sized {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError>;

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError>;

    fn to_bytes(&self) -> Result<Vec<u8>, TpmError> {
        let mut buffer = TpmBuffer::new();
        self.to_tpm(&mut buffer)?;
        Ok(buffer.into_bytes())
    }

    /// Unmarshals a whole blob; trailing bytes are an error
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, TpmError> {
        let mut buffer = TpmBuffer::from_bytes(bytes);
        let value = Self::from_tpm(&mut buffer)?;
        if buffer.remaining() != 0 {
            return Err(TpmError::InvalidArraySize(format!(
                "{} trailing bytes",
                buffer.remaining()
            )));
        }
        Ok(value)
    }
}

/// Common trait for all TPM enumeration types
pub trait TpmEnum<T>: Sized {
    /// Get the numeric value of the enum
    fn get_value(&self) -> T;

    /// Create enum from a numeric value
    fn try_from_value(value: T) -> Result<Self, TpmError>;
}
