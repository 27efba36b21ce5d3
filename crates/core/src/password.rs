use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::PersistenceError;

const SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordEncryptionMethod {
    Sha256,
    Ssha256,
    Sha384,
    Ssha384,
    Sha512,
    Ssha512,
}

impl PasswordEncryptionMethod {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Ssha256 => "SSHA256",
            Self::Sha384 => "SHA384",
            Self::Ssha384 => "SSHA384",
            Self::Sha512 => "SHA512",
            Self::Ssha512 => "SSHA512",
        }
    }

    fn is_salted(self) -> bool {
        matches!(self, Self::Ssha256 | Self::Ssha384 | Self::Ssha512)
    }

    fn digest_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Ssha256 => 32,
            Self::Sha384 | Self::Ssha384 => 48,
            Self::Sha512 | Self::Ssha512 => 64,
        }
    }

    fn digest(self, password: &[u8], salt: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 | Self::Ssha256 => Sha256::new().chain_update(password).chain_update(salt).finalize().to_vec(),
            Self::Sha384 | Self::Ssha384 => Sha384::new().chain_update(password).chain_update(salt).finalize().to_vec(),
            Self::Sha512 | Self::Ssha512 => Sha512::new().chain_update(password).chain_update(salt).finalize().to_vec(),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        let normalized: String = prefix.chars().filter(|c| *c != '-').collect::<String>().to_ascii_uppercase();
        [
            Self::Sha256,
            Self::Ssha256,
            Self::Sha384,
            Self::Ssha384,
            Self::Sha512,
            Self::Ssha512,
        ]
        .into_iter()
        .find(|method| method.prefix() == normalized)
    }
}

impl fmt::Display for PasswordEncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for PasswordEncryptionMethod {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_prefix(s.trim())
            .ok_or_else(|| PersistenceError::Configuration(format!("unsupported password encryption method '{s}'")))
    }
}

/// `{ALG}` prefix of a stored credential, if any.
pub fn find_algorithm(stored: &str) -> Option<PasswordEncryptionMethod> {
    let rest = stored.strip_prefix('{')?;
    let (prefix, _) = rest.split_once('}')?;
    PasswordEncryptionMethod::from_prefix(prefix)
}

pub fn is_hashed(value: &str) -> bool {
    value.starts_with('{') && value.contains('}')
}

/// `{ALG}base64(digest || salt)`.
pub fn create_storage_password(password: &str, method: PasswordEncryptionMethod) -> String {
    let mut salt = Vec::new();
    if method.is_salted() {
        salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
    }
    let mut payload = method.digest(password.as_bytes(), &salt);
    payload.extend_from_slice(&salt);
    format!("{{{}}}{}", method.prefix(), STANDARD.encode(payload))
}

/// Checks a plain password against its stored form. Values without a
/// recognised `{ALG}` prefix are compared verbatim.
pub fn compare_credentials(received: &str, stored: &str) -> bool {
    let Some(method) = find_algorithm(stored) else {
        return constant_time_eq(received.as_bytes(), stored.as_bytes());
    };
    let encoded = &stored[method_prefix_len(stored)..];
    let Ok(payload) = STANDARD.decode(encoded) else {
        return false;
    };
    if payload.len() < method.digest_len() {
        return false;
    }
    let (expected, salt) = payload.split_at(method.digest_len());
    constant_time_eq(&method.digest(received.as_bytes(), salt), expected)
}

fn method_prefix_len(stored: &str) -> usize {
    stored.find('}').map(|at| at + 1).unwrap_or(0)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
