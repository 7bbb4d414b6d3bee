//! XOR obfuscation of index values for version 3.0+ archives

use crate::error::{Error, Result};

/// XOR-fold a sequence of hex tokens into an obfuscation step.
///
/// Version 3.0 headers fold every token after the index offset; version 3.2
/// headers skip one more token before folding. An empty slice folds to zero.
pub fn fold_step(tokens: &[&str]) -> Result<u64> {
    let mut step = 0u64;
    for token in tokens {
        let value = u64::from_str_radix(token, 16)
            .map_err(|_| Error::InvalidHeader(format!("bad step token {token:?}")))?;
        step ^= value;
    }
    Ok(step)
}

/// XOR an index offset or length with the archive step.
///
/// The transform is its own inverse, so the same call obfuscates and
/// deobfuscates.
pub const fn xor_value(value: u64, step: u64) -> u64 {
    value ^ step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_single_token() {
        assert_eq!(fold_step(&["deadbeef"]).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_fold_multiple_tokens() {
        assert_eq!(
            fold_step(&["ff00", "00ff"]).unwrap(),
            0xFF00 ^ 0x00FF
        );
    }

    #[test]
    fn test_fold_empty_is_zero() {
        assert_eq!(fold_step(&[]).unwrap(), 0);
    }

    #[test]
    fn test_fold_rejects_non_hex() {
        assert!(fold_step(&["xyz"]).is_err());
    }

    #[test]
    fn test_xor_roundtrip() {
        let step = 0xDEAD_BEEF;
        let offset = 0x0000_1234_u64;
        assert_eq!(xor_value(xor_value(offset, step), step), offset);
    }
}
