//! SLIP-0010 derivation over ed25519 with base58 addresses.

use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use super::{DerivationPath, HARDENED_OFFSET, KeyTriple, PrivateKeyMaterial};
use crate::chain::Chain;
use crate::error::{DerivationError, DerivationResult, ValidationError, ValidationResult};

type HmacSha512 = Hmac<Sha512>;

const MASTER_KEY: &[u8] = b"ed25519 seed";

/// Key and chain code at one level of the tree.
struct ExtendedKey {
    key: Zeroizing<[u8; 32]>,
    chain_code: Zeroizing<[u8; 32]>,
}

impl ExtendedKey {
    fn from_hmac(hmac_key: &[u8], parts: &[&[u8]]) -> DerivationResult<Self> {
        let mut mac = HmacSha512::new_from_slice(hmac_key)
            .map_err(|e| DerivationError::Key(e.to_string()))?;
        for part in parts {
            mac.update(part);
        }
        let mut output = Zeroizing::new([0u8; 64]);
        output.copy_from_slice(&mac.finalize().into_bytes());

        let mut key = Zeroizing::new([0u8; 32]);
        let mut chain_code = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&output[..32]);
        chain_code.copy_from_slice(&output[32..]);
        Ok(Self { key, chain_code })
    }

    fn master(seed: &[u8]) -> DerivationResult<Self> {
        Self::from_hmac(MASTER_KEY, &[seed])
    }

    /// Hardened child: `HMAC(chain_code, 0x00 || key || ser32(index | 2^31))`.
    fn child(&self, index: u32) -> DerivationResult<Self> {
        let hardened = (index | HARDENED_OFFSET).to_be_bytes();
        let parts: [&[u8]; 3] = [&[0x00], self.key.as_slice(), &hardened];
        Self::from_hmac(self.chain_code.as_slice(), &parts)
    }
}

pub(super) fn derive(seed: &[u8], path: &DerivationPath) -> DerivationResult<KeyTriple> {
    let mut node = ExtendedKey::master(seed)?;
    for segment in path.segments() {
        if !segment.hardened {
            return Err(DerivationError::Key(format!(
                "{path}: ed25519 supports hardened segments only"
            )));
        }
        node = node.child(segment.index)?;
    }
    Ok(key_triple(*node.key))
}

pub(super) fn from_private_key(chain: Chain, key: &str) -> ValidationResult<KeyTriple> {
    let bytes = Zeroizing::new(
        bs58::decode(key)
            .into_vec()
            .map_err(|_| ValidationError::private_key(chain, "not valid base58"))?,
    );

    let (secret, public) = match bytes.len() {
        32 => (&bytes[..], None),
        64 => (&bytes[..32], Some(&bytes[32..])),
        n => {
            return Err(ValidationError::private_key(
                chain,
                format!("expected 32 or 64 bytes, got {n}"),
            ));
        }
    };

    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(secret);
    let triple = key_triple(secret_bytes);

    if public.is_some_and(|p| p != triple.1.as_slice()) {
        return Err(ValidationError::private_key(
            chain,
            "keypair public half does not match its secret half",
        ));
    }
    Ok(triple)
}

fn key_triple(secret: [u8; 32]) -> KeyTriple {
    let private_key = PrivateKeyMaterial::new(secret);
    let signing_key = SigningKey::from_bytes(private_key.expose_bytes());
    let public_key = signing_key.verifying_key().to_bytes();
    let address = bs58::encode(public_key).into_string();
    (private_key, public_key.to_vec(), address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::hex;

    // SLIP-0010 test vector 1 for ed25519.
    const SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn test_slip10_master() {
        let seed = hex::decode(SEED).unwrap();
        let master = ExtendedKey::master(&seed).unwrap();
        assert_eq!(
            hex::encode(*master.key),
            "2b4be7f19ee27bbf30c667b642d5f4aa69fd169872f8fc3059c08ebae2eb19e7"
        );
        assert_eq!(
            hex::encode(*master.chain_code),
            "90046a93de5380a72b5e45010748567d5ea02bbf6522f979e05c0d8d8ca9fffb"
        );

        let (_, public_key, _) = key_triple(*master.key);
        assert_eq!(
            hex::encode(public_key),
            "a4b2856bfec510abab89753fac1ac0e1112364e7d250545963f135f2a33188ed"
        );
    }

    #[test]
    fn test_slip10_first_hardened_child() {
        let seed = hex::decode(SEED).unwrap();
        let child = ExtendedKey::master(&seed).unwrap().child(0).unwrap();
        assert_eq!(
            hex::encode(*child.key),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
        assert_eq!(
            hex::encode(*child.chain_code),
            "8b59aa11380b624e81507a27fedda59fea6d0b779a778918a2fd3590e16e9c69"
        );
    }

    #[test]
    fn test_hardened_bit_is_idempotent() {
        let seed = hex::decode(SEED).unwrap();
        let master = ExtendedKey::master(&seed).unwrap();
        let a = master.child(5).unwrap();
        let b = master.child(5 | HARDENED_OFFSET).unwrap();
        assert_eq!(*a.key, *b.key);
    }
}
