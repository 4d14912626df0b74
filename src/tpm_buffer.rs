//! Big-endian TPM wire buffer

use crate::error::TpmError;

pub struct TpmBuffer {
    buffer: Vec<u8>,
    position: usize,
}

impl TpmBuffer {
    pub fn new() -> Self {
        TpmBuffer {
            buffer: Vec::new(),
            position: 0,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        TpmBuffer {
            buffer: bytes,
            position: 0,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a `TPM2B`: a u16 length prefix followed by the bytes
    pub fn write_sized(&mut self, bytes: &[u8]) -> Result<(), TpmError> {
        let len = u16::try_from(bytes.len()).map_err(|_| TpmError::BufferOverflow)?;
        self.write_u16(len);
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&[u8], TpmError> {
        let end = self
            .position
            .checked_add(len)
            .ok_or(TpmError::BufferUnderflow)?;
        if end > self.buffer.len() {
            return Err(TpmError::BufferUnderflow);
        }
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, TpmError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, TpmError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, TpmError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a `TPM2B` whose payload may not exceed `max` bytes
    pub fn read_sized(&mut self, max: usize) -> Result<Vec<u8>, TpmError> {
        let len = self.read_u16()? as usize;
        if len > max {
            return Err(TpmError::InvalidArraySize(format!(
                "sized buffer of {} bytes exceeds {}",
                len, max
            )));
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Unread bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

impl Default for TpmBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read() {
        let mut buffer = TpmBuffer::new();
        buffer.write_u8(0x12);
        buffer.write_u16(0x3456);
        buffer.write_u32(0x789ABCDE);
        buffer.write_sized(&[0xAA, 0xBB]).unwrap();

        let mut buffer = TpmBuffer::from_bytes(buffer.into_bytes());

        assert_eq!(buffer.read_u8().unwrap(), 0x12);
        assert_eq!(buffer.read_u16().unwrap(), 0x3456);
        assert_eq!(buffer.read_u32().unwrap(), 0x789ABCDE);
        assert_eq!(buffer.read_sized(64).unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_buffer_underflow() {
        let mut buffer = TpmBuffer::new();
        assert!(matches!(buffer.read_u8(), Err(TpmError::BufferUnderflow)));

        // length prefix claims more than is present
        let mut buffer = TpmBuffer::from_bytes(vec![0x00, 0x04, 0x01]);
        assert!(matches!(buffer.read_sized(64), Err(TpmError::BufferUnderflow)));
    }

    #[test]
    fn test_sized_limit() {
        let mut buffer = TpmBuffer::new();
        buffer.write_sized(&[0u8; 65]).unwrap();
        let mut buffer = TpmBuffer::from_bytes(buffer.into_bytes());
        assert!(matches!(
            buffer.read_sized(64),
            Err(TpmError::InvalidArraySize(_))
        ));
    }
}
