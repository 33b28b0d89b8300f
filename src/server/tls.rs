//! TLS configuration for the control and data channels.
//!
//! The same `ServerConfig` serves both channels. Session resumption (server
//! side session IDs plus tickets) is always enabled: the data channel is
//! expected to resume the control channel's TLS session, and a fresh ticket
//! is issued on the control channel before every data connection.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::StoresServerSessions;
use rustls::ServerConfig;

/// How TLS is configured for the server or a particular channel.
#[derive(Clone)]
pub enum FtpsConfig {
    /// No TLS.
    Off,
    /// Lazily built from files on first use.
    Building {
        /// PEM file with the certificate chain.
        certs_file: PathBuf,
        /// PEM file with the private key.
        key_file: PathBuf,
    },
    /// Ready.
    On {
        /// The shared rustls configuration.
        tls_config: Arc<ServerConfig>,
    },
}

impl fmt::Debug for FtpsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpsConfig::Off => write!(f, "Off"),
            FtpsConfig::Building { .. } => write!(f, "Building"),
            FtpsConfig::On { .. } => write!(f, "On"),
        }
    }
}

impl FtpsConfig {
    /// Resolves to a ready config, loading files if needed.
    pub fn materialize(&mut self) -> std::io::Result<Option<Arc<ServerConfig>>> {
        match self {
            FtpsConfig::Off => Ok(None),
            FtpsConfig::On { tls_config } => Ok(Some(tls_config.clone())),
            FtpsConfig::Building { certs_file, key_file } => {
                let config = new_config(certs_file.as_path(), key_file.as_path())?;
                *self = FtpsConfig::On { tls_config: config.clone() };
                Ok(Some(config))
            }
        }
    }
}

/// Builds the shared server configuration from PEM files.
pub fn new_config<P: AsRef<Path>>(certs_file: P, key_file: P) -> std::io::Result<Arc<ServerConfig>> {
    let certs = load_certs(certs_file)?;
    let key = load_private_key(key_file)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(std::io::Error::other)?;

    // Session resumption with server-side state (session IDs)...
    config.session_storage = TlsSessionCache::new(1024);
    // ...and with tickets (RFC 5077), which is what the data channel
    // actually uses.
    config.ticketer = ticketer().map_err(std::io::Error::other)?;
    config.alpn_protocols = vec![b"ftp".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(feature = "aws_lc_rs")]
fn ticketer() -> Result<Arc<dyn rustls::server::ProducesTickets>, rustls::Error> {
    rustls::crypto::aws_lc_rs::Ticketer::new()
}

#[cfg(all(feature = "ring", not(feature = "aws_lc_rs")))]
fn ticketer() -> Result<Arc<dyn rustls::server::ProducesTickets>, rustls::Error> {
    rustls::crypto::ring::Ticketer::new()
}

fn load_certs<P: AsRef<Path>>(filename: P) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(filename)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_private_key<P: AsRef<Path>>(filename: P) -> std::io::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(filename)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key in file"))
}

/// Stores session state server side, bounded and with idle expiry.
#[derive(Debug)]
struct TlsSessionCache {
    cache: moka::sync::Cache<Vec<u8>, Vec<u8>>,
}

impl TlsSessionCache {
    fn new(size: u64) -> Arc<TlsSessionCache> {
        Arc::new(TlsSessionCache {
            cache: moka::sync::CacheBuilder::new(size)
                .time_to_idle(Duration::from_secs(5 * 60))
                .build(),
        })
    }
}

impl StoresServerSessions for TlsSessionCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.cache.insert(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(&key.to_vec())
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        // Deliberately a get, not a take: clients resume the same session on
        // several data connections in a row.
        self.cache.get(&key.to_vec())
    }

    fn can_cache(&self) -> bool {
        true
    }
}
