//! Root secret handling.
//!
//! [`SecretMaterial`] wraps a BIP-39 mnemonic (12 or 24 English words) and an
//! optional passphrase. Its only output is the 64-byte [`RootSeed`], obtained
//! with PBKDF2-HMAC-SHA512 as BIP-39 prescribes; the same phrase and
//! passphrase always give the same seed.
//!
//! # Examples
//!
//! ```rust,ignore
//! use walletx::secret::{SecretMaterial, WordCount};
//!
//! let secret = SecretMaterial::generate(WordCount::Twelve)?;
//! let seed = secret.root_seed();
//!
//! let imported = SecretMaterial::import("abandon abandon ... about")?
//!     .with_passphrase("hunter2");
//! ```

use std::fmt;

use bip39::{Language, Mnemonic};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result, ValidationError, ValidationResult};

/// Supported mnemonic lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordCount {
    /// 12 words, 128 bits of entropy.
    #[serde(rename = "12")]
    Twelve,
    /// 24 words, 256 bits of entropy.
    #[serde(rename = "24")]
    TwentyFour,
}

impl WordCount {
    /// Number of words in the phrase.
    #[must_use]
    pub const fn words(self) -> usize {
        match self {
            Self::Twelve => 12,
            Self::TwentyFour => 24,
        }
    }

    /// Entropy size in bytes.
    #[must_use]
    pub const fn entropy_bytes(self) -> usize {
        match self {
            Self::Twelve => 16,
            Self::TwentyFour => 32,
        }
    }
}

impl TryFrom<usize> for WordCount {
    type Error = ValidationError;

    fn try_from(count: usize) -> ValidationResult<Self> {
        match count {
            12 => Ok(Self::Twelve),
            24 => Ok(Self::TwentyFour),
            other => Err(ValidationError::InvalidWordCount(other)),
        }
    }
}

/// Seed bytes derived from a mnemonic. Zeroized on drop.
#[derive(Clone)]
pub struct RootSeed(Zeroizing<Vec<u8>>);

impl RootSeed {
    /// Wraps raw seed bytes (16 to 64 bytes for BIP-32/SLIP-0010).
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    /// The seed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RootSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSeed")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// A validated mnemonic plus optional passphrase.
#[derive(Clone)]
pub struct SecretMaterial {
    mnemonic: Mnemonic,
    passphrase: Zeroizing<String>,
}

impl SecretMaterial {
    /// Generates a fresh mnemonic from the operating system's CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntropySourceUnavailable`] if the OS cannot supply
    /// secure randomness.
    pub fn generate(word_count: WordCount) -> Result<Self> {
        let mut entropy = Zeroizing::new(vec![0u8; word_count.entropy_bytes()]);
        OsRng
            .try_fill_bytes(&mut entropy)
            .map_err(|e| Error::EntropySourceUnavailable(e.to_string()))?;

        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| Error::EntropySourceUnavailable(format!("entropy rejected: {e}")))?;

        Ok(Self {
            mnemonic,
            passphrase: Zeroizing::new(String::new()),
        })
    }

    /// Parses and validates a user-supplied phrase.
    ///
    /// Whitespace and letter case are normalized before validation.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidWordCount`] unless the phrase has 12 or 24 words.
    /// - [`ValidationError::UnknownWord`] for a word outside the English wordlist.
    /// - [`ValidationError::InvalidMnemonic`] when the checksum does not match.
    pub fn import(phrase: &str) -> ValidationResult<Self> {
        let words: Vec<String> = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        WordCount::try_from(words.len())?;

        let normalized = Zeroizing::new(words.join(" "));
        let mnemonic =
            Mnemonic::parse_in_normalized(Language::English, &normalized).map_err(|e| match e {
                bip39::Error::BadWordCount(n) => ValidationError::InvalidWordCount(n),
                bip39::Error::UnknownWord(position) => ValidationError::UnknownWord {
                    position,
                    word: words.get(position).cloned().unwrap_or_default(),
                },
                _ => ValidationError::InvalidMnemonic,
            })?;

        Ok(Self {
            mnemonic,
            passphrase: Zeroizing::new(String::new()),
        })
    }

    /// Attaches a BIP-39 passphrase (the optional "25th word").
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Zeroizing::new(passphrase.into());
        self
    }

    /// Derives the 64-byte root seed.
    #[must_use]
    pub fn root_seed(&self) -> RootSeed {
        RootSeed(Zeroizing::new(
            self.mnemonic.to_seed(self.passphrase.as_str()).to_vec(),
        ))
    }

    /// Number of words in the phrase.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }

    /// Returns the phrase.
    ///
    /// **Security Warning**: Handle this value carefully.
    #[must_use]
    pub fn expose_phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.mnemonic.to_string())
    }

    /// Returns the passphrase.
    ///
    /// **Security Warning**: Handle this value carefully.
    #[must_use]
    pub fn expose_passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl PartialEq for SecretMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.mnemonic == other.mnemonic && *self.passphrase == *other.passphrase
    }
}

impl Eq for SecretMaterial {}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("words", &self.word_count())
            .field("passphrase", &!self.passphrase.is_empty())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::hex;

    pub(crate) const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
        abandon abandon abandon abandon abandon about";
    pub(crate) const HARDHAT: &str = "test test test test test test test test test test test junk";

    #[test]
    fn test_generate_word_counts() {
        let twelve = SecretMaterial::generate(WordCount::Twelve).unwrap();
        assert_eq!(twelve.word_count(), 12);

        let twenty_four = SecretMaterial::generate(WordCount::TwentyFour).unwrap();
        assert_eq!(twenty_four.word_count(), 24);
        assert_eq!(twenty_four.expose_phrase().split(' ').count(), 24);
    }

    #[test]
    fn test_generated_phrase_reimports() {
        let secret = SecretMaterial::generate(WordCount::Twelve).unwrap();
        let again = SecretMaterial::import(&secret.expose_phrase()).unwrap();
        assert_eq!(secret, again);
        assert_eq!(secret.root_seed().as_bytes(), again.root_seed().as_bytes());
    }

    #[test]
    fn test_generate_is_random() {
        let a = SecretMaterial::generate(WordCount::Twelve).unwrap();
        let b = SecretMaterial::generate(WordCount::Twelve).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_root_seed_vector() {
        let secret = SecretMaterial::import(ABANDON_ABOUT).unwrap();
        let seed = secret.root_seed();
        assert_eq!(seed.as_bytes().len(), 64);
        assert_eq!(hex::encode(&seed.as_bytes()[..8]), "5eb00bbddcf06908");

        let with_pass = secret.with_passphrase("TREZOR").root_seed();
        assert_eq!(hex::encode(&with_pass.as_bytes()[..8]), "c55257c360c07c72");
    }

    #[test]
    fn test_root_seed_is_deterministic() {
        let a = SecretMaterial::import(HARDHAT).unwrap().root_seed();
        let b = SecretMaterial::import(HARDHAT).unwrap().root_seed();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_import_normalizes_whitespace_and_case() {
        let messy = "  Test TEST test\ttest test test test test test test test   junk ";
        let secret = SecretMaterial::import(messy).unwrap();
        assert_eq!(*secret.expose_phrase(), HARDHAT);
    }

    #[test]
    fn test_import_bad_checksum() {
        let phrase = ["abandon"; 12].join(" ");
        assert_eq!(
            SecretMaterial::import(&phrase).unwrap_err(),
            ValidationError::InvalidMnemonic
        );
    }

    #[test]
    fn test_import_altered_last_word() {
        // Same entropy bits as "about", different checksum nibble.
        let phrase = ABANDON_ABOUT.replace("about", "able");
        assert_eq!(
            SecretMaterial::import(&phrase).unwrap_err(),
            ValidationError::InvalidMnemonic
        );
    }

    #[test]
    fn test_import_unknown_word() {
        let phrase = ABANDON_ABOUT.replace("about", "walletx");
        assert_eq!(
            SecretMaterial::import(&phrase).unwrap_err(),
            ValidationError::UnknownWord {
                position: 11,
                word: "walletx".into(),
            }
        );
    }

    #[test]
    fn test_import_word_counts() {
        let thirteen = format!("{ABANDON_ABOUT} abandon");
        assert_eq!(
            SecretMaterial::import(&thirteen).unwrap_err(),
            ValidationError::InvalidWordCount(13)
        );

        // Valid BIP-39 length, but not one this wallet accepts.
        let fifteen = ["abandon"; 15].join(" ");
        assert_eq!(
            SecretMaterial::import(&fifteen).unwrap_err(),
            ValidationError::InvalidWordCount(15)
        );

        assert_eq!(
            SecretMaterial::import("").unwrap_err(),
            ValidationError::InvalidWordCount(0)
        );
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let plain = SecretMaterial::import(HARDHAT).unwrap();
        let salted = plain.clone().with_passphrase("extra");
        assert_ne!(plain, salted);
        assert_ne!(plain.root_seed().as_bytes(), salted.root_seed().as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretMaterial::import(HARDHAT).unwrap();
        let debug = format!("{secret:?}");
        assert!(!debug.contains("junk"));
        let seed = format!("{:?}", secret.root_seed());
        assert!(seed.contains("len"));
    }
}
