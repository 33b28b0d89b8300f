//! The on-disk certificate/account store layout.
//!
//! ```text
//! <root>/acme/<account_id>/account.info
//! <root>/acme/<account_id>/<cert_id>/key.pem
//! <root>/acme/<account_id>/<cert_id>/cert.pem
//! <root>/acme/<account_id>/<cert_id>/.last_error
//! ```
//!
//! `<cert_id>` is a digest of the sorted hostname list, so the same
//! account+hostnames combination always lands in the same directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AcmeError, Result};

/// Identifies one managed certificate: the ACME account plus the hostnames
/// it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeCertInfo {
    /// The ACME account id (the `kid`).
    pub account_id: String,
    /// Hostnames on the certificate. Kept sorted.
    pub hostnames: Vec<String>,
}

impl AcmeCertInfo {
    /// A cert info with the hostname list normalized.
    pub fn new(account_id: impl Into<String>, mut hostnames: Vec<String>) -> AcmeCertInfo {
        hostnames.sort();
        AcmeCertInfo {
            account_id: account_id.into(),
            hostnames,
        }
    }

    /// The directory name derived from the hostname set.
    pub fn cert_id(&self) -> String {
        let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
        for host in &self.hostnames {
            ctx.update(host.as_bytes());
            ctx.update(b"\n");
        }
        let digest = ctx.finish();
        digest.as_ref()[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// `<root>/acme/<account_id>`.
    pub fn account_dir(&self, root: &Path) -> PathBuf {
        root.join("acme").join(&self.account_id)
    }

    /// `<root>/acme/<account_id>/<cert_id>`.
    pub fn cert_dir(&self, root: &Path) -> PathBuf {
        self.account_dir(root).join(self.cert_id())
    }

    /// Path of the private key.
    pub fn key_path(&self, root: &Path) -> PathBuf {
        self.cert_dir(root).join("key.pem")
    }

    /// Path of the certificate chain.
    pub fn cert_path(&self, root: &Path) -> PathBuf {
        self.cert_dir(root).join("cert.pem")
    }

    /// Path of the marker holding the last renewal error.
    pub fn last_error_path(&self, root: &Path) -> PathBuf {
        self.cert_dir(root).join(".last_error")
    }
}

/// The `account.info` document: everything needed to use an ACME account
/// again, including the JWK key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraAccountInfo {
    /// The account id.
    pub kid: String,
    /// The directory URL of the ACME server the account lives on.
    pub directory: String,
    /// Creation timestamp, as reported by the server.
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    /// The JWK key pair.
    pub jwk: Jwk,
    /// Contact URLs.
    #[serde(rename = "contact", default)]
    pub contacts: Vec<String>,
}

/// A serialized JWK key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// The private key document.
    #[serde(rename = "priv")]
    pub private: serde_json::Value,
    /// The public key document.
    #[serde(rename = "pub")]
    pub public: serde_json::Value,
}

impl ExtraAccountInfo {
    fn path(root: &Path, account_id: &str) -> PathBuf {
        root.join("acme").join(account_id).join("account.info")
    }

    /// Loads `<root>/acme/<account_id>/account.info`.
    pub fn load(root: &Path, account_id: &str) -> Result<ExtraAccountInfo> {
        if !root.is_absolute() {
            return Err(AcmeError::BadRoot);
        }
        let bytes = std::fs::read(Self::path(root, account_id))?;
        serde_json::from_slice(&bytes).map_err(|e| AcmeError::Malformed(e.to_string()))
    }

    /// Saves the document, creating the account directory as needed.
    pub fn save(&self, root: &Path, account_id: &str) -> Result<()> {
        if !root.is_absolute() {
            return Err(AcmeError::BadRoot);
        }
        let path = Self::path(root, account_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| AcmeError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cert_id_ignores_hostname_order() {
        let a = AcmeCertInfo::new("acct", vec!["b.example".into(), "a.example".into()]);
        let b = AcmeCertInfo::new("acct", vec!["a.example".into(), "b.example".into()]);
        assert_eq!(a.cert_id(), b.cert_id());
    }

    #[test]
    fn different_hostnames_different_id() {
        let a = AcmeCertInfo::new("acct", vec!["a.example".into()]);
        let b = AcmeCertInfo::new("acct", vec!["c.example".into()]);
        assert_ne!(a.cert_id(), b.cert_id());
    }

    #[test]
    fn paths_follow_the_layout() {
        let ci = AcmeCertInfo::new("acct-1", vec!["ftp.example.org".into()]);
        let root = Path::new("/var/lib/ftpd");
        let dir = ci.cert_dir(root);
        assert!(dir.starts_with("/var/lib/ftpd/acme/acct-1"));
        assert_eq!(ci.key_path(root), dir.join("key.pem"));
        assert_eq!(ci.cert_path(root), dir.join("cert.pem"));
        assert_eq!(ci.last_error_path(root), dir.join(".last_error"));
    }

    #[test]
    fn account_info_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let info = ExtraAccountInfo {
            kid: "acct-1".into(),
            directory: "https://acme.example/directory".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            jwk: Jwk {
                private: serde_json::json!({"kty": "EC", "d": "secret"}),
                public: serde_json::json!({"kty": "EC", "x": "a", "y": "b"}),
            },
            contacts: vec!["mailto:admin@example.org".into()],
        };

        info.save(root.path(), "acct-1").unwrap();
        let loaded = ExtraAccountInfo::load(root.path(), "acct-1").unwrap();
        assert_eq!(loaded, info);
    }

    #[test]
    fn relative_root_is_refused() {
        let info_err = ExtraAccountInfo::load(Path::new("relative/root"), "acct").unwrap_err();
        assert!(matches!(info_err, AcmeError::BadRoot));
    }
}
