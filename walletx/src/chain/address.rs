//! Address validation and normalization.

use std::str::FromStr;

use alloy::primitives::Address;

use super::{AddressEncoding, Chain};
use crate::error::{ValidationError, ValidationResult};

/// Validates an address for `chain` and returns its canonical form.
///
/// EVM addresses must be `0x` followed by 40 hex digits. All-lowercase and
/// all-uppercase input is accepted as-is; mixed-case input must carry a valid
/// EIP-55 checksum. The canonical form is the checksummed address.
///
/// Solana addresses must decode from base58 to exactly 32 bytes.
pub fn validate_address(chain: Chain, address: &str) -> ValidationResult<String> {
    let trimmed = address.trim();
    match chain.descriptor().address_encoding {
        AddressEncoding::HexEip55 => validate_evm(chain, trimmed),
        AddressEncoding::Base58 => validate_base58(chain, trimmed),
    }
}

/// Normalizes an address for use as an identity key.
///
/// Hex addresses are case-insensitive and are lowercased; base58 is case
/// sensitive and is kept verbatim.
#[must_use]
pub fn normalize_address(chain: Chain, address: &str) -> String {
    let trimmed = address.trim();
    match chain.descriptor().address_encoding {
        AddressEncoding::HexEip55 => trimmed.to_ascii_lowercase(),
        AddressEncoding::Base58 => trimmed.to_string(),
    }
}

fn validate_evm(chain: Chain, address: &str) -> ValidationResult<String> {
    let Some(hex) = address.strip_prefix("0x") else {
        return Err(ValidationError::address(chain, address, "missing 0x prefix"));
    };
    if hex.len() != 40 {
        return Err(ValidationError::address(
            chain,
            address,
            format!("expected 40 hex digits, got {}", hex.len()),
        ));
    }

    let parsed = Address::from_str(address)
        .map_err(|e| ValidationError::address(chain, address, e.to_string()))?;

    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(address, None)
            .map_err(|_| ValidationError::address(chain, address, "EIP-55 checksum mismatch"))?;
    }

    Ok(parsed.to_checksum(None))
}

fn validate_base58(chain: Chain, address: &str) -> ValidationResult<String> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| ValidationError::address(chain, address, e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ValidationError::address(
            chain,
            address,
            format!("expected 32 bytes, decoded {}", bytes.len()),
        ));
    }
    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HARDHAT_0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_evm_checksummed_accepted() {
        assert_eq!(validate_address(Chain::Base, HARDHAT_0).unwrap(), HARDHAT_0);
    }

    #[test]
    fn test_evm_lowercase_is_checksummed() {
        let lower = HARDHAT_0.to_ascii_lowercase();
        assert_eq!(validate_address(Chain::Ethereum, &lower).unwrap(), HARDHAT_0);
    }

    #[test]
    fn test_evm_bad_checksum_rejected() {
        // Flip the case of one checksummed letter.
        let tampered = HARDHAT_0.replacen("0xf39Fd", "0xf39fd", 1);
        assert_ne!(tampered, HARDHAT_0);
        let err = validate_address(Chain::Polygon, &tampered).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress { .. }));
    }

    #[test]
    fn test_evm_malformed_rejected() {
        assert!(validate_address(Chain::Bnb, "f39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_err());
        assert!(validate_address(Chain::Bnb, "0x1234").is_err());
        assert!(validate_address(Chain::Bnb, "0xzz9fd6e51aad88f6f4ce6ab8827279cfffb92266").is_err());
    }

    #[test]
    fn test_solana_address() {
        let key = bs58::encode([7u8; 32]).into_string();
        assert_eq!(validate_address(Chain::Solana, &key).unwrap(), key);

        let short = bs58::encode([7u8; 20]).into_string();
        assert!(validate_address(Chain::Solana, &short).is_err());
        assert!(validate_address(Chain::Solana, "0OIl").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_address(Chain::Avalanche, HARDHAT_0),
            HARDHAT_0.to_ascii_lowercase()
        );
        assert_eq!(normalize_address(Chain::Solana, " AbC "), "AbC");
    }
}
