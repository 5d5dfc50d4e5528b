//! BIP-32 derivation over secp256k1 with EIP-55 addresses.

use alloy::primitives::hex;
use alloy::signers::local::PrivateKeySigner;
use bip32::{ChildNumber, XPrv};
use zeroize::Zeroizing;

use super::{DerivationPath, KeyTriple, PrivateKeyMaterial};
use crate::chain::Chain;
use crate::error::{DerivationError, DerivationResult, ValidationError, ValidationResult};

pub(super) fn derive(seed: &[u8], path: &DerivationPath) -> DerivationResult<KeyTriple> {
    let mut xprv = XPrv::new(seed).map_err(|e| DerivationError::Key(e.to_string()))?;
    for segment in path.segments() {
        let child = ChildNumber::new(segment.index, segment.hardened)
            .map_err(|e| DerivationError::Key(e.to_string()))?;
        xprv = xprv
            .derive_child(child)
            .map_err(|e| DerivationError::Key(format!("{path}: {e}")))?;
    }

    let private_key = PrivateKeyMaterial::new(xprv.to_bytes());
    let public_key = xprv.public_key().to_bytes().to_vec();
    let address = checksummed_address(private_key.expose_bytes())?;

    Ok((private_key, public_key, address))
}

pub(super) fn from_private_key(chain: Chain, key: &str) -> ValidationResult<KeyTriple> {
    let bytes = Zeroizing::new(
        hex::decode(key).map_err(|_| ValidationError::private_key(chain, "not valid hex"))?,
    );
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        ValidationError::private_key(chain, format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    let private_key = PrivateKeyMaterial::new(bytes);

    let signer = PrivateKeySigner::from_slice(private_key.expose_bytes())
        .map_err(|_| ValidationError::private_key(chain, "scalar out of range"))?;
    let public_key = signer
        .credential()
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let address = signer.address().to_checksum(None);

    Ok((private_key, public_key, address))
}

fn checksummed_address(private_key: &[u8; 32]) -> DerivationResult<String> {
    let signer =
        PrivateKeySigner::from_slice(private_key).map_err(|e| DerivationError::Key(e.to_string()))?;
    Ok(signer.address().to_checksum(None))
}
