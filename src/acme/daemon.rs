//! The renewal scheduler and store manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use slog::Logger;
use tokio::sync::Notify;

use super::cert_info::{AcmeCertInfo, ExtraAccountInfo};
use super::{AcmeError, Result};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

/// A freshly issued certificate: both PEM documents.
#[derive(Debug, Clone)]
pub struct CertificatePair {
    /// The private key, PEM.
    pub key_pem: String,
    /// The certificate chain, PEM.
    pub cert_pem: String,
}

/// The contract with the ACME protocol client (an external collaborator:
/// JWS construction and HTTP are out of scope here).
#[async_trait]
pub trait AcmeClient: Send + Sync + std::fmt::Debug {
    /// Fetches the CA's terms-of-service URL.
    async fn get_terms_of_service(&self, directory: &str) -> Result<String>;

    /// Creates an account at the CA, returning everything needed to use it
    /// again.
    async fn create_account(&self, directory: &str, contacts: &[String]) -> Result<ExtraAccountInfo>;

    /// Orders and finalizes a certificate. `max_clock_skew` bounds the
    /// tolerated difference between our clock and the server's.
    async fn create_certificate(
        &self,
        account: &ExtraAccountInfo,
        hostnames: &[String],
        max_clock_skew: Duration,
    ) -> Result<CertificatePair>;
}

/// Daemon tunables.
#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    /// Pause before retrying a failed renewal.
    pub retry_delay: Duration,
    /// Maximum tolerated clock skew versus the ACME server.
    pub max_clock_skew: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        DaemonOptions {
            retry_delay: Duration::from_secs(5 * 60),
            max_clock_skew: DAY,
        }
    }
}

/// Identifies one interactive daemon operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

/// The certificate lifecycle daemon.
#[derive(Debug)]
pub struct Daemon {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root_path: RwLock<Option<PathBuf>>,
    client: Arc<dyn AcmeClient>,
    used_certs: Mutex<Vec<AcmeCertInfo>>,
    ops: Mutex<HashMap<OperationId, tokio::task::JoinHandle<()>>>,
    next_op: AtomicU64,
    wakeup: Notify,
    opts: DaemonOptions,
    logger: Logger,
}

/// When a certificate should be renewed, per the ⅔-of-validity rule, with a
/// `.last_error` marker establishing a retry baseline instead.
pub(crate) fn compute_renew_date(
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    last_error_mtime: Option<DateTime<Utc>>,
    retry_delay: Duration,
) -> DateTime<Utc> {
    if let Some(err_at) = last_error_mtime {
        return err_at + chrono::Duration::from_std(retry_delay).unwrap_or(chrono::Duration::seconds(300));
    }
    let lifetime = not_after - not_before;
    not_before + lifetime * 2 / 3
}

impl Daemon {
    /// A daemon over the given protocol client. The renewal loop starts on
    /// the current runtime and idles until a root path is set.
    pub fn new(client: Arc<dyn AcmeClient>, opts: DaemonOptions, logger: Logger) -> Daemon {
        let inner = Arc::new(Inner {
            root_path: RwLock::new(None),
            client,
            used_certs: Mutex::new(Vec::new()),
            ops: Mutex::new(HashMap::new()),
            next_op: AtomicU64::new(1),
            wakeup: Notify::new(),
            opts,
            logger,
        });

        let renewal = Arc::downgrade(&inner);
        tokio::spawn(async move {
            loop {
                let Some(inner) = renewal.upgrade() else { return };
                inner.renewal_round().await;
            }
        });

        Daemon { inner }
    }

    /// Sets the store root. Triggers a renewal check.
    pub fn set_root_path(&self, root: PathBuf) {
        *self.inner.root_path.write().expect("acme root lock") = Some(root);
        self.inner.wakeup.notify_one();
    }

    /// Declares a certificate in or out of use. Only in-use certificates are
    /// renewed. Triggers a renewal check.
    pub fn set_certificate_used(&self, info: AcmeCertInfo, used: bool) {
        {
            let mut list = self.inner.used_certs.lock().expect("acme used lock");
            let pos = list.iter().position(|c| *c == info);
            match (pos, used) {
                (Some(_), true) | (None, false) => {}
                (Some(i), false) => {
                    list.remove(i);
                }
                (None, true) => list.push(info),
            }
        }
        self.inner.wakeup.notify_one();
    }

    fn start_op<F>(&self, fut: F) -> OperationId
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = OperationId(self.inner.next_op.fetch_add(1, Ordering::Relaxed));
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            inner.ops.lock().expect("acme ops lock").remove(&id);
        });
        if !handle.is_finished() {
            self.inner.ops.lock().expect("acme ops lock").insert(id, handle);
        }
        id
    }

    /// Fetches the terms-of-service URL of a CA; `handler` receives the
    /// result.
    pub fn get_terms_of_service<H>(&self, directory: String, handler: H) -> OperationId
    where
        H: FnOnce(Result<String>) + Send + 'static,
    {
        let client = self.inner.client.clone();
        self.start_op(async move {
            handler(client.get_terms_of_service(&directory).await);
        })
    }

    /// Creates an account and persists its `account.info`; `handler`
    /// receives the account id.
    pub fn create_account<H>(&self, directory: String, contacts: Vec<String>, handler: H) -> OperationId
    where
        H: FnOnce(Result<String>) + Send + 'static,
    {
        let client = self.inner.client.clone();
        let inner = self.inner.clone();
        self.start_op(async move {
            let outcome = async {
                let root = inner.root()?;
                let account = client.create_account(&directory, &contacts).await?;
                account.save(&root, &account.kid)?;
                Ok(account.kid)
            }
            .await;
            handler(outcome);
        })
    }

    /// Restores a previously exported account into the store.
    pub fn restore_account(&self, account_id: &str, extra: &ExtraAccountInfo) -> Result<()> {
        let root = self.inner.root()?;
        extra.save(&root, account_id)
    }

    /// Orders a certificate for `hostnames` on `account_id`; `handler`
    /// receives the cert info on success.
    pub fn create_certificate<H>(&self, account_id: String, hostnames: Vec<String>, handler: H) -> OperationId
    where
        H: FnOnce(Result<AcmeCertInfo>) + Send + 'static,
    {
        let inner = self.inner.clone();
        self.start_op(async move {
            let info = AcmeCertInfo::new(account_id.clone(), hostnames);
            let outcome = inner.renew(&info).await.map(|_| info);
            handler(outcome);
        })
    }

    /// Cancels one in-flight interactive operation.
    pub fn cancel(&self, id: OperationId) {
        if let Some(handle) = self.inner.ops.lock().expect("acme ops lock").remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // Kick the renewal loop so it notices the daemon is gone.
        self.inner.wakeup.notify_one();
    }
}

impl Inner {
    fn root(&self) -> Result<PathBuf> {
        self.root_path
            .read()
            .expect("acme root lock")
            .clone()
            .filter(|p| p.is_absolute())
            .ok_or(AcmeError::BadRoot)
    }

    /// One pass of the renewal loop: renew whatever is due, then sleep until
    /// the next deadline or an external wakeup.
    async fn renewal_round(&self) {
        let due = self.next_renewal();

        match due {
            Some((info, renew_at)) if renew_at <= Utc::now() => {
                slog::info!(self.logger, "certificate due for renewal";
                    "account" => info.account_id.as_str(), "cert" => info.cert_id());
                match self.renew(&info).await {
                    Ok(()) => slog::info!(self.logger, "certificate renewed"; "cert" => info.cert_id()),
                    Err(e) => slog::warn!(self.logger, "certificate renewal failed";
                        "cert" => info.cert_id(), "error" => %e),
                }
            }
            Some((_, renew_at)) => {
                let remaining = (renew_at - Utc::now()).to_std().unwrap_or_default();
                // Far-off deadlines sleep at most a day at a time; inside the
                // final day the loop re-polls every minute, so clock
                // adjustments and store changes are picked up promptly.
                let wait = if remaining > DAY {
                    DAY
                } else if remaining > MINUTE {
                    MINUTE
                } else {
                    remaining
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.wakeup.notified() => {}
                }
            }
            None => self.wakeup.notified().await,
        }
    }

    /// The in-use certificate with the earliest renewal date.
    fn next_renewal(&self) -> Option<(AcmeCertInfo, DateTime<Utc>)> {
        let root = self.root().ok()?;
        let used = self.used_certs.lock().expect("acme used lock").clone();

        let mut best: Option<(AcmeCertInfo, DateTime<Utc>)> = None;
        for info in used {
            let cert_path = info.cert_path(&root);
            let Ok(pem_bytes) = std::fs::read(&cert_path) else {
                continue; // no cert yet; creation is interactive, not ours
            };
            let Some((not_before, not_after)) = parse_validity(&pem_bytes) else {
                slog::warn!(self.logger, "unparsable certificate in store"; "path" => %cert_path.display());
                continue;
            };

            let last_error_mtime = std::fs::metadata(info.last_error_path(&root))
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            let renew_at = compute_renew_date(not_before, not_after, last_error_mtime, self.opts.retry_delay);
            if best.as_ref().is_none_or(|(_, cur)| renew_at < *cur) {
                best = Some((info, renew_at));
            }
        }
        best
    }

    /// Renews (or first-creates) one certificate. On success the
    /// `.last_error` marker is deleted; on failure the error text is written
    /// into it, establishing the retry baseline.
    async fn renew(&self, info: &AcmeCertInfo) -> Result<()> {
        let root = self.root()?;

        let outcome: Result<()> = async {
            let extra = ExtraAccountInfo::load(&root, &info.account_id)?;
            let pair = self
                .client
                .create_certificate(&extra, &info.hostnames, self.opts.max_clock_skew)
                .await?;

            std::fs::create_dir_all(info.cert_dir(&root))?;
            std::fs::write(info.key_path(&root), pair.key_pem)?;
            std::fs::write(info.cert_path(&root), pair.cert_pem)?;
            Ok(())
        }
        .await;

        match &outcome {
            Ok(()) => {
                let _ = std::fs::remove_file(info.last_error_path(&root));
            }
            Err(e) => {
                let _ = std::fs::write(info.last_error_path(&root), e.to_string());
            }
        }

        outcome
    }
}

/// Extracts the validity window out of a PEM certificate.
fn parse_validity(pem_bytes: &[u8]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem_bytes).ok()?;
    let cert = pem.parse_x509().ok()?;
    let validity = cert.validity();
    let not_before = Utc.timestamp_opt(validity.not_before.timestamp(), 0).single()?;
    let not_after = Utc.timestamp_opt(validity.not_after.timestamp(), 0).single()?;
    Some((not_before, not_after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renewal_at_two_thirds_of_validity() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t90 = t0 + chrono::Duration::days(90);
        let renew = compute_renew_date(t0, t90, None, Duration::from_secs(300));
        assert_eq!(renew, t0 + chrono::Duration::days(60));
    }

    #[test]
    fn last_error_establishes_retry_baseline() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t90 = t0 + chrono::Duration::days(90);
        let failed_at = t0 + chrono::Duration::days(60);
        let renew = compute_renew_date(t0, t90, Some(failed_at), Duration::from_secs(300));
        assert_eq!(renew, failed_at + chrono::Duration::seconds(300));
    }

    #[derive(Debug)]
    struct StubClient;

    #[async_trait]
    impl AcmeClient for StubClient {
        async fn get_terms_of_service(&self, _directory: &str) -> Result<String> {
            Ok("https://ca.example/tos".into())
        }

        async fn create_account(&self, directory: &str, contacts: &[String]) -> Result<ExtraAccountInfo> {
            Ok(ExtraAccountInfo {
                kid: "stub-account".into(),
                directory: directory.into(),
                created_at: "2026-01-01T00:00:00Z".into(),
                jwk: super::super::cert_info::Jwk {
                    private: serde_json::json!({}),
                    public: serde_json::json!({}),
                },
                contacts: contacts.to_vec(),
            })
        }

        async fn create_certificate(
            &self,
            _account: &ExtraAccountInfo,
            _hostnames: &[String],
            _max_clock_skew: Duration,
        ) -> Result<CertificatePair> {
            Ok(CertificatePair {
                key_pem: "KEY".into(),
                cert_pem: "CERT".into(),
            })
        }
    }

    #[tokio::test]
    async fn create_account_persists_account_info() {
        let root = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(
            Arc::new(StubClient),
            DaemonOptions::default(),
            Logger::root(slog::Discard, slog::o!()),
        );
        daemon.set_root_path(root.path().to_path_buf());

        let (tx, rx) = std::sync::mpsc::channel();
        daemon.create_account("https://ca.example/dir".into(), vec![], move |res| {
            tx.send(res).unwrap();
        });

        let account_id = tokio::task::spawn_blocking(move || rx.recv().unwrap()).await.unwrap().unwrap();
        assert_eq!(account_id, "stub-account");

        let loaded = ExtraAccountInfo::load(root.path(), "stub-account").unwrap();
        assert_eq!(loaded.directory, "https://ca.example/dir");
    }

    #[tokio::test]
    async fn create_certificate_writes_both_pems() {
        let root = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(
            Arc::new(StubClient),
            DaemonOptions::default(),
            Logger::root(slog::Discard, slog::o!()),
        );
        daemon.set_root_path(root.path().to_path_buf());

        let account = ExtraAccountInfo {
            kid: "acct".into(),
            directory: "https://ca.example/dir".into(),
            created_at: String::new(),
            jwk: super::super::cert_info::Jwk {
                private: serde_json::json!({}),
                public: serde_json::json!({}),
            },
            contacts: vec![],
        };
        daemon.restore_account("acct", &account).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        daemon.create_certificate("acct".into(), vec!["ftp.example.org".into()], move |res| {
            tx.send(res).unwrap();
        });

        let info = tokio::task::spawn_blocking(move || rx.recv().unwrap()).await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(info.cert_path(root.path())).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(info.key_path(root.path())).unwrap(), "KEY");
        assert!(!info.last_error_path(root.path()).exists());
    }

    #[derive(Debug)]
    struct FailingClient;

    #[async_trait]
    impl AcmeClient for FailingClient {
        async fn get_terms_of_service(&self, _d: &str) -> Result<String> {
            Err(AcmeError::Client("down".into()))
        }
        async fn create_account(&self, _d: &str, _c: &[String]) -> Result<ExtraAccountInfo> {
            Err(AcmeError::Client("down".into()))
        }
        async fn create_certificate(&self, _a: &ExtraAccountInfo, _h: &[String], _s: Duration) -> Result<CertificatePair> {
            Err(AcmeError::Client("order failed".into()))
        }
    }

    #[tokio::test]
    async fn failed_renewal_writes_last_error() {
        let root = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(
            Arc::new(FailingClient),
            DaemonOptions::default(),
            Logger::root(slog::Discard, slog::o!()),
        );
        daemon.set_root_path(root.path().to_path_buf());

        let account = ExtraAccountInfo {
            kid: "acct".into(),
            directory: "https://ca.example/dir".into(),
            created_at: String::new(),
            jwk: super::super::cert_info::Jwk {
                private: serde_json::json!({}),
                public: serde_json::json!({}),
            },
            contacts: vec![],
        };
        daemon.restore_account("acct", &account).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        daemon.create_certificate("acct".into(), vec!["ftp.example.org".into()], move |res| {
            tx.send(res.err().map(|e| e.to_string())).unwrap();
        });

        let err = tokio::task::spawn_blocking(move || rx.recv().unwrap()).await.unwrap();
        assert!(err.unwrap().contains("order failed"));

        let info = AcmeCertInfo::new("acct", vec!["ftp.example.org".into()]);
        let marker = std::fs::read_to_string(info.last_error_path(root.path())).unwrap();
        assert!(marker.contains("order failed"));
    }
}
