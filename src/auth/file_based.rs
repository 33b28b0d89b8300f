//! The file-backed authenticator: verifies credentials against configured
//! accounts and owns the shared-user cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use slog::{Drain, Logger};
use tokio::sync::mpsc;

use crate::net::host_address::HostIp;
use crate::net::rate_limit::RateLimiter;
use crate::tvfs::{Backend, MountTable, MountTree};

use super::authenticator::{AuthOperation, AuthOutcome, AuthRequest, Authenticator};
use super::shared_user::{SharedUser, SharedUserInner};
use super::user::{Group, ImpersonationToken, PasswordVerifier, User, SYSTEM_USER_NAME};
use super::{Error, Method, MethodKind};

#[derive(Debug, Default)]
struct Database {
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
}

#[derive(Debug)]
struct Inner {
    db: RwLock<Database>,
    shared: Mutex<HashMap<String, SharedUser>>,
    group_limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
    save_tx: Option<mpsc::UnboundedSender<()>>,
    worker_program: Option<PathBuf>,
    logger: Logger,
}

/// Authenticates against the configured user/group records.
#[derive(Debug)]
pub struct FileBasedAuthenticator {
    inner: Arc<Inner>,
}

/// Builder for [`FileBasedAuthenticator`].
#[derive(Debug, Default)]
pub struct Builder {
    users: Vec<User>,
    groups: Vec<Group>,
    save_tx: Option<mpsc::UnboundedSender<()>>,
    worker_program: Option<PathBuf>,
    logger: Option<Logger>,
}

impl Builder {
    /// Seeds the account database.
    pub fn users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    /// Seeds the group database.
    pub fn groups(mut self, groups: Vec<Group>) -> Self {
        self.groups = groups;
        self
    }

    /// Wires the channel on which the authenticator requests a (batched)
    /// configuration save, e.g. after a legacy password hash was upgraded.
    pub fn save_notifier(mut self, tx: mpsc::UnboundedSender<()>) -> Self {
        self.save_tx = Some(tx);
        self
    }

    /// The binary to spawn in impersonation-worker mode for accounts bound
    /// to OS users.
    pub fn worker_program(mut self, program: PathBuf) -> Self {
        self.worker_program = Some(program);
        self
    }

    /// The logger to use.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the authenticator.
    pub fn build(self) -> FileBasedAuthenticator {
        let logger = self
            .logger
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), slog::o!()));
        FileBasedAuthenticator {
            inner: Arc::new(Inner {
                db: RwLock::new(Database {
                    users: self.users.into_iter().map(|u| (u.name.clone(), u)).collect(),
                    groups: self.groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
                }),
                shared: Mutex::new(HashMap::new()),
                group_limiters: Mutex::new(HashMap::new()),
                save_tx: self.save_tx,
                worker_program: self.worker_program,
                logger,
            }),
        }
    }
}

impl FileBasedAuthenticator {
    /// A builder with no accounts.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Replaces the whole account database. Cached shared users are updated
    /// in place where possible and invalidated where not.
    pub fn set_accounts(&self, users: Vec<User>, groups: Vec<Group>) {
        {
            let mut db = self.inner.db.write().expect("auth db lock");
            db.users = users.into_iter().map(|u| (u.name.clone(), u)).collect();
            db.groups = groups.into_iter().map(|g| (g.name.clone(), g)).collect();
        }
        self.inner.refresh_shared_users();
    }

    /// A snapshot of the current accounts, for persisting.
    pub fn snapshot(&self) -> (Vec<User>, Vec<Group>) {
        let db = self.inner.db.read().expect("auth db lock");
        (db.users.values().cloned().collect(), db.groups.values().cloned().collect())
    }
}

impl Inner {
    /// Reconciles every cached shared user with the current database.
    fn refresh_shared_users(&self) {
        let db = self.db.read().expect("auth db lock");
        let mut shared = self.shared.lock().expect("shared cache lock");

        shared.retain(|name, handle| {
            let keep = match db.users.get(name) {
                Some(user) if user.enabled => {
                    if handle.token() != user.impersonation {
                        false
                    } else {
                        let (tree, extras) = self.compose_user_view(&db, user);
                        handle.update(Arc::new(tree), user.rate_limit, extras);
                        true
                    }
                }
                _ => false,
            };
            if !keep {
                slog::info!(self.logger, "invalidating shared user"; "user" => name.as_str());
                handle.invalidate();
            }
            keep
        });
    }

    /// The merged mount tree and group limiters for `user`. Groups overlay
    /// right to left; the user's own table wins last.
    fn compose_user_view(&self, db: &Database, user: &User) -> (MountTree, Vec<Arc<RateLimiter>>) {
        let mut table: MountTable = Vec::new();
        let mut extras = Vec::new();
        let mut limiters = self.group_limiters.lock().expect("group limiter lock");

        for group_name in user.groups.iter().rev() {
            if let Some(group) = db.groups.get(group_name) {
                table.extend(group.mount_table());
                let limiter = limiters
                    .entry(group_name.clone())
                    .or_insert_with(|| RateLimiter::new(group.rate_limit))
                    .clone();
                limiter.set_limit(group.rate_limit);
                extras.push(limiter);
            }
        }
        table.extend(user.mount_table());

        (MountTree::from_table(table), extras)
    }

    fn ip_allowed(&self, db: &Database, user: &User, ip: &HostIp) -> bool {
        let mut allowed = user.allowed_ips.contains(ip, None);
        let mut disallowed = user.disallowed_ips.contains(ip, None);

        for group_name in &user.groups {
            if let Some(group) = db.groups.get(group_name) {
                allowed |= group.allowed_ips.contains(ip, None);
                disallowed |= group.disallowed_ips.contains(ip, None);
            }
        }

        // An explicit allow overrides any disallow.
        !disallowed || allowed
    }

    async fn grant(&self, login_name: &str, token: Option<ImpersonationToken>) -> Result<SharedUser, Error> {
        // Re-read the record under the lock; it may have changed while the
        // password was being verified.
        let (tree, extras, rate_limit) = {
            let db = self.db.read().expect("auth db lock");
            let user = db
                .users
                .get(login_name)
                .or_else(|| db.users.get(SYSTEM_USER_NAME))
                .ok_or(Error::UserNonExisting)?;
            let (tree, extras) = self.compose_user_view(&db, user);
            (tree, extras, user.rate_limit)
        };

        {
            let mut shared = self.shared.lock().expect("shared cache lock");
            if let Some(existing) = shared.get(login_name) {
                if existing.token() == token && !existing.is_invalidated() {
                    existing.update(Arc::new(tree), rate_limit, extras);
                    return Ok(existing.clone());
                }
                // Impersonation changed: the old handle must go.
                existing.invalidate();
                shared.remove(login_name);
            }
        }

        let backend = self.spawn_backend(token).await?;

        let handle = SharedUserInner::new(login_name.to_string(), Arc::new(tree), backend.clone(), rate_limit, token);
        match &backend {
            Some(b) => handle.mount_tree().autocreate_directories(b.as_ref()).await,
            None => {
                handle
                    .mount_tree()
                    .autocreate_directories(&crate::tvfs::LocalBackend::new())
                    .await
            }
        }

        self.shared
            .lock()
            .expect("shared cache lock")
            .insert(login_name.to_string(), handle.clone());

        Ok(handle)
    }

    #[cfg(unix)]
    async fn spawn_backend(&self, token: Option<ImpersonationToken>) -> Result<Option<Arc<dyn Backend>>, Error> {
        let Some(token) = token else {
            return Ok(None);
        };
        let Some(program) = &self.worker_program else {
            slog::error!(self.logger, "impersonation requested but no worker program configured");
            return Err(Error::Internal);
        };
        match crate::impersonation::ImpersonatorClient::spawn(self.logger.clone(), program, token).await {
            Ok(client) => Ok(Some(Arc::new(client))),
            Err(e) => {
                slog::error!(self.logger, "failed to start impersonation worker"; "error" => %e);
                Err(Error::Internal)
            }
        }
    }

    #[cfg(not(unix))]
    async fn spawn_backend(&self, token: Option<ImpersonationToken>) -> Result<Option<Arc<dyn Backend>>, Error> {
        match token {
            None => Ok(None),
            Some(_) => Err(Error::Internal),
        }
    }

    /// Resolves the impersonation token for `login_name` via the system-user
    /// entry: the OS account with the same name.
    #[cfg(unix)]
    fn system_user_token(&self, login_name: &str) -> Option<ImpersonationToken> {
        let account = nix::unistd::User::from_name(login_name).ok().flatten()?;
        Some(ImpersonationToken {
            uid: account.uid.as_raw(),
            gid: account.gid.as_raw(),
        })
    }

    #[cfg(not(unix))]
    fn system_user_token(&self, _login_name: &str) -> Option<ImpersonationToken> {
        None
    }
}

#[async_trait]
impl Authenticator for FileBasedAuthenticator {
    async fn begin(&self, request: AuthRequest) -> Box<dyn AuthOperation> {
        Box::new(FileOperation {
            inner: self.inner.clone(),
            request,
            user: None,
            error: None,
            remaining: vec![MethodKind::Password, MethodKind::None],
        })
    }
}

struct FileOperation {
    inner: Arc<Inner>,
    request: AuthRequest,
    user: Option<SharedUser>,
    error: Option<Error>,
    remaining: Vec<MethodKind>,
}

impl FileOperation {
    /// Checks everything that does not depend on the offered methods.
    /// Returns the record and the impersonation token to use.
    fn precheck(&self) -> Result<(User, Option<ImpersonationToken>), Error> {
        let db = self.inner.db.read().expect("auth db lock");

        let (user, token) = match db.users.get(&self.request.name) {
            Some(user) => (user, user.impersonation),
            None => {
                let system = db.users.get(SYSTEM_USER_NAME).ok_or(Error::UserNonExisting)?;
                let token = self.inner.system_user_token(&self.request.name).ok_or(Error::UserNonExisting)?;
                (system, Some(token))
            }
        };

        if !user.enabled {
            return Err(Error::UserDisabled);
        }

        if !self.inner.ip_allowed(&db, user, &self.request.ip) {
            return Err(Error::IpDisallowed);
        }

        Ok((user.clone(), token))
    }

    fn upgrade_legacy_hash(&self, password: &str) {
        let mut db = self.inner.db.write().expect("auth db lock");
        if let Some(user) = db.users.get_mut(&self.request.name) {
            if user.credentials.password.as_ref().is_some_and(|v| v.is_legacy()) {
                slog::info!(self.inner.logger, "upgrading legacy password hash"; "user" => self.request.name.as_str());
                user.credentials.password = Some(PasswordVerifier::derive(password));
                drop(db);
                if let Some(tx) = &self.inner.save_tx {
                    let _ = tx.send(());
                }
            }
        }
    }

    async fn grant(&mut self, token: Option<ImpersonationToken>) -> AuthOutcome {
        match self.inner.grant(&self.request.name, token).await {
            Ok(shared) => {
                self.user = Some(shared.clone());
                self.remaining.clear();
                AuthOutcome::Granted(shared)
            }
            Err(e) => {
                self.error = Some(e);
                AuthOutcome::Denied(e)
            }
        }
    }
}

#[async_trait]
impl AuthOperation for FileOperation {
    fn user(&self) -> Option<SharedUser> {
        self.user.clone()
    }

    fn remaining_methods(&self) -> Vec<MethodKind> {
        self.remaining.clone()
    }

    fn error(&self) -> Option<Error> {
        self.error
    }

    async fn next(&mut self, methods: Vec<Method>) -> AuthOutcome {
        let (user, token) = match self.precheck() {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                return AuthOutcome::Denied(e);
            }
        };

        for method in &methods {
            match method {
                Method::Password(password) => {
                    let Some(verifier) = &user.credentials.password else {
                        self.error = Some(Error::AuthMethodNotSupported);
                        return AuthOutcome::Denied(Error::AuthMethodNotSupported);
                    };

                    if !verifier.verify(password) {
                        self.error = Some(Error::InvalidCredentials);
                        return AuthOutcome::Denied(Error::InvalidCredentials);
                    }

                    if verifier.is_legacy() {
                        self.upgrade_legacy_hash(password);
                    }

                    return self.grant(token).await;
                }
                Method::None => {
                    if user.credentials.password.is_none() {
                        return self.grant(token).await;
                    }
                    // A password can still satisfy this account.
                    self.remaining = vec![MethodKind::Password];
                }
            }
        }

        AuthOutcome::MethodsRemaining(self.remaining.clone())
    }

    fn stop(&mut self) {
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::host_address::{AddressFamily, HostIp, Ipv4Host};
    use pretty_assertions::assert_eq;

    fn request(name: &str, ip: [u8; 4]) -> AuthRequest {
        AuthRequest {
            name: name.to_string(),
            ip: HostIp::V4(Ipv4Host(ip)),
            family: AddressFamily::V4,
        }
    }

    fn authenticator_with(users: Vec<User>) -> FileBasedAuthenticator {
        FileBasedAuthenticator::builder()
            .users(users)
            .logger(Logger::root(slog::Discard, slog::o!()))
            .build()
    }

    #[tokio::test]
    async fn password_grant_and_deny() {
        let auth = authenticator_with(vec![User::with_password("alice", "s3cret")]);

        let mut op = auth.begin(request("alice", [10, 0, 0, 1])).await;
        match op.next(vec![Method::Password("s3cret".into())]).await {
            AuthOutcome::Granted(user) => assert_eq!(user.name().as_deref(), Some("alice")),
            other => panic!("expected grant, got {:?}", other),
        }

        let mut op = auth.begin(request("alice", [10, 0, 0, 1])).await;
        match op.next(vec![Method::Password("wrong".into())]).await {
            AuthOutcome::Denied(Error::InvalidCredentials) => {}
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_user_is_nonexisting() {
        let auth = authenticator_with(vec![]);
        let mut op = auth.begin(request("ghost", [10, 0, 0, 1])).await;
        match op.next(vec![Method::Password("x".into())]).await {
            AuthOutcome::Denied(Error::UserNonExisting) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn disabled_user_is_refused() {
        let mut user = User::with_password("carol", "pw");
        user.enabled = false;
        let auth = authenticator_with(vec![user]);

        let mut op = auth.begin(request("carol", [10, 0, 0, 1])).await;
        match op.next(vec![Method::Password("pw".into())]).await {
            AuthOutcome::Denied(Error::UserDisabled) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn disallowed_ip_overridden_by_allow() {
        let mut user = User::with_password("dave", "pw");
        user.disallowed_ips = "10.0.0.0/8".parse().unwrap();
        user.allowed_ips = "10.1.1.1".parse().unwrap();
        let auth = authenticator_with(vec![user]);

        let mut op = auth.begin(request("dave", [10, 0, 0, 7])).await;
        match op.next(vec![Method::Password("pw".into())]).await {
            AuthOutcome::Denied(Error::IpDisallowed) => {}
            other => panic!("unexpected {:?}", other),
        }

        let mut op = auth.begin(request("dave", [10, 1, 1, 1])).await;
        match op.next(vec![Method::Password("pw".into())]).await {
            AuthOutcome::Granted(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn probe_reports_password_remaining() {
        let auth = authenticator_with(vec![User::with_password("erin", "pw")]);
        let mut op = auth.begin(request("erin", [10, 0, 0, 1])).await;
        match op.next(vec![Method::None]).await {
            AuthOutcome::MethodsRemaining(kinds) => assert_eq!(kinds, vec![MethodKind::Password]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn reauthentication_reuses_shared_user() {
        let auth = authenticator_with(vec![User::with_password("frank", "pw")]);

        let mut op = auth.begin(request("frank", [10, 0, 0, 1])).await;
        let AuthOutcome::Granted(first) = op.next(vec![Method::Password("pw".into())]).await else {
            panic!("expected grant");
        };

        let mut op = auth.begin(request("frank", [10, 0, 0, 2])).await;
        let AuthOutcome::Granted(second) = op.next(vec![Method::Password("pw".into())]).await else {
            panic!("expected grant");
        };

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn deleting_user_invalidates_shared_handle() {
        let auth = authenticator_with(vec![User::with_password("grace", "pw")]);

        let mut op = auth.begin(request("grace", [10, 0, 0, 1])).await;
        let AuthOutcome::Granted(shared) = op.next(vec![Method::Password("pw".into())]).await else {
            panic!("expected grant");
        };
        let mut sub = shared.subscribe();

        auth.set_accounts(vec![], vec![]);

        sub.changed().await.unwrap();
        assert!(shared.is_invalidated());
    }

    #[tokio::test]
    async fn legacy_hash_is_upgraded_and_save_scheduled() {
        use base64::Engine;

        let digest = ring::digest::digest(&ring::digest::SHA256, b"oldpw");
        let mut user = User::with_password("henry", "ignored");
        user.credentials.password = Some(PasswordVerifier::LegacySha256 {
            digest: base64::engine::general_purpose::STANDARD.encode(digest.as_ref()),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = FileBasedAuthenticator::builder()
            .users(vec![user])
            .save_notifier(tx)
            .logger(Logger::root(slog::Discard, slog::o!()))
            .build();

        let mut op = auth.begin(request("henry", [10, 0, 0, 1])).await;
        let AuthOutcome::Granted(_) = op.next(vec![Method::Password("oldpw".into())]).await else {
            panic!("expected grant");
        };

        // The verifier is now the modern form and a save was requested.
        assert!(rx.try_recv().is_ok());
        let (users, _) = auth.snapshot();
        let stored = users.iter().find(|u| u.name == "henry").unwrap().credentials.password.clone().unwrap();
        assert!(!stored.is_legacy());
        assert!(stored.verify("oldpw"));
    }
}
