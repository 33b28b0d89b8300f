//! Account and group definitions, as configured and persisted.

use std::num::NonZeroU32;

use base64::Engine;
use ring::{digest, pbkdf2};
use serde::{Deserialize, Serialize};

use crate::net::rate_limit::Limit;
use crate::net::BinaryAddressList;
use crate::tvfs::{MountAccess, MountFlags, MountPoint, MountRecursion, MountTable};

/// The account name that stands for "any OS user": a client logging in with
/// an unknown name is matched against this entry and, when it verifies,
/// impersonates the OS account of the same name.
pub const SYSTEM_USER_NAME: &str = "<system user>";

/// An OS-level identity used to execute file I/O as another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpersonationToken {
    /// Target user id.
    pub uid: u32,
    /// Target group id.
    pub gid: u32,
}

/// A password verifier at rest.
///
/// The modern form is PBKDF2-HMAC-SHA256 with a per-user salt. The legacy
/// form is a bare SHA-256 of the password; it still verifies, and a
/// successful match upgrades the stored verifier to the modern form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum PasswordVerifier {
    /// PBKDF2-HMAC-SHA256.
    Pbkdf2 {
        /// Base64 salt.
        salt: String,
        /// Base64 derived key.
        key: String,
        /// Iteration count.
        iterations: NonZeroU32,
    },
    /// Unsalted SHA-256 digest, kept only for configs migrated from old
    /// releases.
    LegacySha256 {
        /// Base64 digest.
        digest: String,
    },
}

const PBKDF2_DEFAULT_ITERATIONS: u32 = 100_000;

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn unb64(text: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(text).ok()
}

impl PasswordVerifier {
    /// A fresh modern verifier for `password` with a random salt.
    pub fn derive(password: &str) -> PasswordVerifier {
        let mut salt = [0u8; 16];
        getrandom::fill(&mut salt).expect("system randomness");

        let iterations = NonZeroU32::new(PBKDF2_DEFAULT_ITERATIONS).expect("nonzero");
        let mut key = [0u8; digest::SHA256_OUTPUT_LEN];
        pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, password.as_bytes(), &mut key);

        PasswordVerifier::Pbkdf2 {
            salt: b64(&salt),
            key: b64(&key),
            iterations,
        }
    }

    /// Verifies `password` against this verifier.
    pub fn verify(&self, password: &str) -> bool {
        match self {
            PasswordVerifier::Pbkdf2 { salt, key, iterations } => {
                let (Some(salt), Some(key)) = (unb64(salt), unb64(key)) else {
                    return false;
                };
                pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, *iterations, &salt, password.as_bytes(), &key).is_ok()
            }
            PasswordVerifier::LegacySha256 { digest: stored } => {
                let Some(stored) = unb64(stored) else {
                    return false;
                };
                let computed = digest::digest(&digest::SHA256, password.as_bytes());
                // Constant-time comparison is what ring's verify gives the
                // modern path; for the legacy digest we do our own.
                stored.len() == computed.as_ref().len()
                    && stored
                        .iter()
                        .zip(computed.as_ref())
                        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                        == 0
            }
        }
    }

    /// Tells whether this verifier is the legacy form that should be
    /// re-derived after a successful match.
    pub fn is_legacy(&self) -> bool {
        matches!(self, PasswordVerifier::LegacySha256 { .. })
    }
}

/// The per-method credential map of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// The password verifier, when password authentication is enabled.
    /// An account with no verifiers at all accepts the "none" method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordVerifier>,
}

/// Persisted form of one mount-table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecord {
    /// Virtual path.
    pub tvfs_path: String,
    /// Native path.
    pub native_path: std::path::PathBuf,
    /// Access level.
    #[serde(default)]
    pub access: MountAccess,
    /// Recursion behaviour.
    #[serde(default)]
    pub recursive: MountRecursion,
    /// Create the native directory chain on login.
    #[serde(default)]
    pub autocreate: bool,
}

impl From<MountRecord> for MountPoint {
    fn from(r: MountRecord) -> MountPoint {
        MountPoint {
            tvfs_path: r.tvfs_path,
            native_path: r.native_path,
            access: r.access,
            recursive: r.recursive,
            flags: if r.autocreate { MountFlags::AUTOCREATE } else { MountFlags::empty() },
        }
    }
}

impl From<&MountPoint> for MountRecord {
    fn from(mp: &MountPoint) -> MountRecord {
        MountRecord {
            tvfs_path: mp.tvfs_path.clone(),
            native_path: mp.native_path.clone(),
            access: mp.access,
            recursive: mp.recursive,
            autocreate: mp.flags.contains(MountFlags::AUTOCREATE),
        }
    }
}

/// One account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    pub name: String,
    /// Disabled accounts fail authentication without revealing more.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Method-to-verifier map.
    #[serde(default)]
    pub credentials: Credentials,
    /// Addresses that may always log in, overriding `disallowed_ips`.
    #[serde(default, with = "serde_address_list")]
    pub allowed_ips: BinaryAddressList,
    /// Addresses that may not log in.
    #[serde(default, with = "serde_address_list")]
    pub disallowed_ips: BinaryAddressList,
    /// The account's mount table.
    #[serde(default)]
    pub mounts: Vec<MountRecord>,
    /// Transfer speed limit.
    #[serde(default = "default_limit", with = "serde_limit")]
    pub rate_limit: Limit,
    /// Group memberships, ordered; later groups overlay earlier ones
    /// right-to-left.
    #[serde(default)]
    pub groups: Vec<String>,
    /// OS identity the account's file I/O runs as, when impersonating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonation: Option<ImpersonationToken>,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> Limit {
    Limit::Unlimited
}

impl User {
    /// A minimal enabled account with the given name and password.
    pub fn with_password(name: &str, password: &str) -> User {
        User {
            name: name.to_string(),
            enabled: true,
            credentials: Credentials {
                password: Some(PasswordVerifier::derive(password)),
            },
            allowed_ips: BinaryAddressList::new(),
            disallowed_ips: BinaryAddressList::new(),
            mounts: Vec::new(),
            rate_limit: Limit::Unlimited,
            groups: Vec::new(),
            impersonation: None,
        }
    }

    /// The compiled mount table.
    pub fn mount_table(&self) -> MountTable {
        self.mounts.iter().cloned().map(MountPoint::from).collect()
    }

    /// Tells whether this is the special system-user entry.
    pub fn is_system_user(&self) -> bool {
        self.name == SYSTEM_USER_NAME
    }
}

/// A group: everything a user has, minus credentials and group memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Addresses that may always log in.
    #[serde(default, with = "serde_address_list")]
    pub allowed_ips: BinaryAddressList,
    /// Addresses that may not log in.
    #[serde(default, with = "serde_address_list")]
    pub disallowed_ips: BinaryAddressList,
    /// Mounts contributed to members.
    #[serde(default)]
    pub mounts: Vec<MountRecord>,
    /// Transfer speed limit contributed to members.
    #[serde(default = "default_limit", with = "serde_limit")]
    pub rate_limit: Limit,
}

impl Group {
    /// The compiled mount table.
    pub fn mount_table(&self) -> MountTable {
        self.mounts.iter().cloned().map(MountPoint::from).collect()
    }
}

mod serde_address_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &BinaryAddressList, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&list.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BinaryAddressList, D::Error> {
        let text = String::deserialize(de)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

mod serde_limit {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(limit: &Limit, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&limit.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Limit, D::Error> {
        let text = String::deserialize(de)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn derived_password_verifies() {
        let v = PasswordVerifier::derive("s3cret");
        assert!(v.verify("s3cret"));
        assert!(!v.verify("guess"));
        assert!(!v.is_legacy());
    }

    #[test]
    fn legacy_digest_verifies_and_flags_upgrade() {
        let digest = ring::digest::digest(&ring::digest::SHA256, b"old-pass");
        let v = PasswordVerifier::LegacySha256 {
            digest: base64::engine::general_purpose::STANDARD.encode(digest.as_ref()),
        };
        assert!(v.verify("old-pass"));
        assert!(!v.verify("new-pass"));
        assert!(v.is_legacy());
    }

    #[test]
    fn user_record_round_trips_through_json() {
        let mut user = User::with_password("alice", "wonderland");
        user.allowed_ips = "10.0.0.0/8".parse().unwrap();
        user.rate_limit = Limit::BytesPerSecond(1024);
        user.groups = vec!["staff".to_string()];

        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();

        assert_eq!(back.name, user.name);
        assert_eq!(back.allowed_ips, user.allowed_ips);
        assert_eq!(back.rate_limit, user.rate_limit);
        assert_eq!(back.credentials, user.credentials);
    }

    #[test]
    fn absent_fields_take_defaults() {
        let user: User = serde_json::from_str(r#"{ "name": "bob" }"#).unwrap();
        assert!(user.enabled);
        assert_eq!(user.rate_limit, Limit::Unlimited);
        assert!(user.credentials.password.is_none());
        assert!(user.mounts.is_empty());
    }
}
