//! The throttling layer between sessions and the concrete authenticator.
//!
//! For every user name, every IPv4 address and every IPv6 /64 prefix it
//! keeps a sliding window of failure timepoints and a `next_try` deadline.
//! New attempts wait until the deadline; each failure pushes it further out,
//! exponential growth capped at a maximum. Throttling surfaces as *delay*,
//! never as an error, and only genuine credential or policy failures count.
//!
//! The "none" method gets special treatment: a client probing the server
//! without credentials and then authenticating properly must not have the
//! probe counted. The first failed "none" attempt is therefore *held*, and
//! only recorded if the operation is dropped without a real attempt, or if a
//! second "none" fails.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slog::Logger;
use tokio::time::Instant;

use crate::net::host_address::HostIp;

use super::authenticator::{AuthOperation, AuthOutcome, AuthRequest, Authenticator};
use super::shared_user::SharedUser;
use super::{Error, Method, MethodKind};

/// Tunables of the throttler.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleOptions {
    /// Base delay added per failure.
    pub delay: Duration,
    /// Hard cap on the distance of `next_try` from now.
    pub cap: Duration,
    /// Failures remembered per entity.
    pub max_failures: usize,
    /// Window after which failures are forgotten.
    pub window: Duration,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        ThrottleOptions {
            delay: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_failures: 5,
            window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct Failures {
    timepoints: VecDeque<Instant>,
    next_try: Option<Instant>,
}

impl Failures {
    /// Records a failure. Returns whether further attempts must now wait.
    fn add(&mut self, now: Instant, opts: &ThrottleOptions) -> bool {
        if opts.max_failures > 0 {
            self.purge_old(now, opts.window);
            if self.timepoints.len() < opts.max_failures {
                self.timepoints.push_back(now);
            } else if let Some(last) = self.timepoints.back_mut() {
                *last = now;
            }
        }
        self.set_next_try(now, opts)
    }

    fn purge_old(&mut self, now: Instant, window: Duration) -> bool {
        let oldest_useful = now.checked_sub(window);
        while let (Some(&front), Some(oldest)) = (self.timepoints.front(), oldest_useful) {
            if front > oldest {
                break;
            }
            self.timepoints.pop_front();
        }
        self.timepoints.is_empty()
    }

    fn set_next_try(&mut self, now: Instant, opts: &ThrottleOptions) -> bool {
        let must_delay = self.timepoints.len() >= opts.max_failures;
        self.next_try = if must_delay {
            let base = self.next_try.map_or(now, |t| t.max(now));
            Some((base + opts.delay).min(now + opts.cap))
        } else {
            Some(now)
        };
        must_delay
    }

    fn is_stale(&mut self, now: Instant, window: Duration) -> bool {
        self.purge_old(now, window) && self.next_try.is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    by_user: HashMap<String, Failures>,
    by_v4: HashMap<u32, Failures>,
    by_v6: HashMap<u64, Failures>,
}

enum IpKey {
    V4(u32),
    V6(u64),
    None,
}

fn ip_key(ip: &HostIp) -> IpKey {
    match ip {
        HostIp::V4(h) => IpKey::V4(h.to_u32()),
        // A /64 is the practical allocation unit; throttling single v6
        // addresses would be trivially evaded.
        HostIp::V6(h) => IpKey::V6(h.high_u64()),
        HostIp::Unknown => IpKey::None,
    }
}

impl ThrottleState {
    fn with_entries<R>(&mut self, name: &str, ip: &HostIp, mut f: impl FnMut(&mut Failures) -> R) -> Vec<R> {
        let mut out = Vec::with_capacity(3);
        out.push(f(self.by_user.entry(name.to_string()).or_default()));
        match ip_key(ip) {
            IpKey::V4(k) => out.push(f(self.by_v4.entry(k).or_default())),
            IpKey::V6(k) => out.push(f(self.by_v6.entry(k).or_default())),
            IpKey::None => {}
        }
        out
    }

    fn earliest_allowed(&mut self, name: &str, ip: &HostIp) -> Option<Instant> {
        let mut latest: Option<Instant> = None;

        let mut consider = |failures: &Failures| {
            if let Some(t) = failures.next_try {
                latest = Some(latest.map_or(t, |cur| cur.max(t)));
            }
        };

        if let Some(failures) = self.by_user.get(name) {
            consider(failures);
        }
        match ip_key(ip) {
            IpKey::V4(k) => {
                if let Some(failures) = self.by_v4.get(&k) {
                    consider(failures);
                }
            }
            IpKey::V6(k) => {
                if let Some(failures) = self.by_v6.get(&k) {
                    consider(failures);
                }
            }
            IpKey::None => {}
        }

        latest
    }

    fn purge(&mut self, now: Instant, window: Duration) {
        self.by_user.retain(|_, f| !f.is_stale(now, window));
        self.by_v4.retain(|_, f| !f.is_stale(now, window));
        self.by_v6.retain(|_, f| !f.is_stale(now, window));
    }
}

/// Wraps a concrete authenticator with per-entity delays.
#[derive(Debug)]
pub struct ThrottledAuthenticator {
    inner: Arc<dyn Authenticator>,
    state: Arc<Mutex<ThrottleState>>,
    opts: ThrottleOptions,
    logger: Logger,
}

impl ThrottledAuthenticator {
    /// Wraps `inner`. Spawns the periodic purge task on the current runtime.
    pub fn new(inner: Arc<dyn Authenticator>, opts: ThrottleOptions, logger: Logger) -> Arc<ThrottledAuthenticator> {
        let authenticator = Arc::new(ThrottledAuthenticator {
            inner,
            state: Arc::new(Mutex::new(ThrottleState::default())),
            opts,
            logger,
        });

        // A single purge timer at window granularity expunges stale entries.
        let state = Arc::downgrade(&authenticator.state);
        let window = opts.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else { return };
                state.lock().expect("throttle lock").purge(Instant::now(), window);
            }
        });

        authenticator
    }

    fn record_failure(state: &Mutex<ThrottleState>, opts: &ThrottleOptions, name: &str, ip: &HostIp) {
        let now = Instant::now();
        state
            .lock()
            .expect("throttle lock")
            .with_entries(name, ip, |failures| failures.add(now, opts));
    }
}

#[async_trait]
impl Authenticator for ThrottledAuthenticator {
    async fn begin(&self, request: AuthRequest) -> Box<dyn AuthOperation> {
        let inner_op = self.inner.begin(request.clone()).await;
        Box::new(ThrottledOperation {
            inner: Some(inner_op),
            request,
            state: self.state.clone(),
            opts: self.opts,
            logger: self.logger.clone(),
            held_none_failure: false,
            in_progress: false,
        })
    }

    fn stop_ongoing_authentications(&self) {
        self.inner.stop_ongoing_authentications();
    }
}

struct ThrottledOperation {
    inner: Option<Box<dyn AuthOperation>>,
    request: AuthRequest,
    state: Arc<Mutex<ThrottleState>>,
    opts: ThrottleOptions,
    logger: Logger,
    // The held first "none" failure (see module docs).
    held_none_failure: bool,
    in_progress: bool,
}

impl ThrottledOperation {
    fn record_failure(&self) {
        ThrottledAuthenticator::record_failure(&self.state, &self.opts, &self.request.name, &self.request.ip);
    }
}

#[async_trait]
impl AuthOperation for ThrottledOperation {
    fn user(&self) -> Option<SharedUser> {
        self.inner.as_ref().and_then(|op| op.user())
    }

    fn remaining_methods(&self) -> Vec<MethodKind> {
        self.inner.as_ref().map(|op| op.remaining_methods()).unwrap_or_default()
    }

    fn error(&self) -> Option<Error> {
        self.inner.as_ref().and_then(|op| op.error())
    }

    async fn next(&mut self, methods: Vec<Method>) -> AuthOutcome {
        let Some(inner) = self.inner.as_mut() else {
            return AuthOutcome::Denied(Error::Internal);
        };

        // Delay, not failure: wait out whatever deadline applies.
        let wait_until = self
            .state
            .lock()
            .expect("throttle lock")
            .earliest_allowed(&self.request.name, &self.request.ip);
        if let Some(deadline) = wait_until {
            if deadline > Instant::now() {
                slog::debug!(self.logger, "delaying authentication attempt";
                    "user" => self.request.name.as_str(), "until" => ?deadline);
                tokio::time::sleep_until(deadline).await;
            }
        }

        let only_none = methods.iter().all(|m| matches!(m, Method::None)) && !methods.is_empty();
        let real_attempt = methods.iter().any(|m| !matches!(m, Method::None));

        if real_attempt {
            // A real attempt supersedes the held probe either way.
            self.held_none_failure = false;
        }

        self.in_progress = true;
        let outcome = inner.next(methods).await;
        self.in_progress = false;

        match &outcome {
            AuthOutcome::Granted(_) => {
                self.held_none_failure = false;
            }
            AuthOutcome::Denied(_) => {
                if only_none {
                    if self.held_none_failure {
                        // Second failed "none": the held one counts too.
                        self.record_failure();
                        self.record_failure();
                        self.held_none_failure = false;
                    } else {
                        self.held_none_failure = true;
                    }
                } else {
                    self.record_failure();
                }
            }
            AuthOutcome::MethodsRemaining(_) => {
                // A probe that merely discovered what is required. For the
                // "none" method this is the attempt the hold rule covers.
                if only_none {
                    if self.held_none_failure {
                        self.record_failure();
                        self.record_failure();
                        self.held_none_failure = false;
                    } else {
                        self.held_none_failure = true;
                    }
                }
            }
        }

        outcome
    }

    fn stop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.stop();
        }
        self.in_progress = false;
        self.held_none_failure = false;
    }
}

impl Drop for ThrottledOperation {
    fn drop(&mut self) {
        if self.held_none_failure {
            slog::debug!(self.logger, "recording held credential-less failure on teardown";
                "user" => self.request.name.as_str());
            self.record_failure();
        } else if self.in_progress {
            // Torn down mid-authentication: count it, otherwise aborting
            // before the result would dodge the throttle entirely.
            self.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::file_based::FileBasedAuthenticator;
    use crate::auth::user::User;
    use crate::net::host_address::{AddressFamily, Ipv4Host};

    fn request(name: &str, ip: [u8; 4]) -> AuthRequest {
        AuthRequest {
            name: name.to_string(),
            ip: HostIp::V4(Ipv4Host(ip)),
            family: AddressFamily::V4,
        }
    }

    fn throttled(users: Vec<User>, opts: ThrottleOptions) -> Arc<ThrottledAuthenticator> {
        let inner = FileBasedAuthenticator::builder()
            .users(users)
            .logger(Logger::root(slog::Discard, slog::o!()))
            .build();
        ThrottledAuthenticator::new(Arc::new(inner), opts, Logger::root(slog::Discard, slog::o!()))
    }

    #[tokio::test(start_paused = true)]
    async fn failures_grow_the_delay_up_to_the_cap() {
        let opts = ThrottleOptions {
            delay: Duration::from_secs(2),
            cap: Duration::from_secs(5),
            max_failures: 1,
            window: Duration::from_secs(600),
        };
        let auth = throttled(vec![User::with_password("alice", "right")], opts);

        // First failure: immediate, records a failure.
        let mut op = auth.begin(request("alice", [10, 0, 0, 1])).await;
        let before = Instant::now();
        op.next(vec![Method::Password("wrong".into())]).await;
        assert!(Instant::now().duration_since(before) < Duration::from_millis(100));
        drop(op);

        // Second attempt must wait out the 2s deadline.
        let mut op = auth.begin(request("alice", [10, 0, 0, 1])).await;
        let before = Instant::now();
        op.next(vec![Method::Password("wrong".into())]).await;
        let waited = Instant::now().duration_since(before);
        assert!(waited >= Duration::from_secs(2), "waited only {:?}", waited);
        drop(op);

        // Repeated failures cannot push the deadline past the cap.
        for _ in 0..5 {
            let mut op = auth.begin(request("alice", [10, 0, 0, 1])).await;
            op.next(vec![Method::Password("wrong".into())]).await;
            drop(op);
        }
        let deadline = auth
            .state
            .lock()
            .unwrap()
            .earliest_allowed("alice", &HostIp::V4(Ipv4Host([10, 0, 0, 1])))
            .unwrap();
        assert!(deadline <= Instant::now() + opts.cap);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_login_after_probe_counts_nothing() {
        let opts = ThrottleOptions {
            max_failures: 1,
            ..ThrottleOptions::default()
        };
        let auth = throttled(vec![User::with_password("bob", "pw")], opts);

        let mut op = auth.begin(request("bob", [10, 0, 0, 2])).await;
        // The probe: "none" fails (password required) but is held.
        op.next(vec![Method::None]).await;
        // The real attempt succeeds; the probe must not have counted.
        let AuthOutcome::Granted(_) = op.next(vec![Method::Password("pw".into())]).await else {
            panic!("expected grant");
        };
        drop(op);

        assert!(auth.state.lock().unwrap().by_user.get("bob").map_or(true, |f| f.timepoints.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_is_recorded() {
        let opts = ThrottleOptions {
            max_failures: 1,
            ..ThrottleOptions::default()
        };
        let auth = throttled(vec![User::with_password("carol", "pw")], opts);

        let mut op = auth.begin(request("carol", [10, 0, 0, 3])).await;
        op.next(vec![Method::None]).await;
        drop(op); // never followed up

        let state = auth.state.lock().unwrap();
        assert_eq!(state.by_user.get("carol").unwrap().timepoints.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_none_failure_counts_both() {
        let opts = ThrottleOptions {
            max_failures: 5,
            ..ThrottleOptions::default()
        };
        let auth = throttled(vec![User::with_password("dora", "pw")], opts);

        let mut op = auth.begin(request("dora", [10, 0, 0, 4])).await;
        op.next(vec![Method::None]).await;
        op.next(vec![Method::None]).await;
        drop(op);

        let state = auth.state.lock().unwrap();
        assert_eq!(state.by_user.get("dora").unwrap().timepoints.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expunges_stale_entries() {
        let opts = ThrottleOptions {
            window: Duration::from_secs(10),
            max_failures: 3,
            ..ThrottleOptions::default()
        };
        let auth = throttled(vec![User::with_password("eve", "pw")], opts);

        let mut op = auth.begin(request("eve", [10, 0, 0, 5])).await;
        op.next(vec![Method::Password("wrong".into())]).await;
        drop(op);
        assert!(!auth.state.lock().unwrap().by_user.is_empty());

        tokio::time::advance(Duration::from_secs(25)).await;
        tokio::task::yield_now().await;

        auth.state.lock().unwrap().purge(Instant::now(), opts.window);
        assert!(auth.state.lock().unwrap().by_user.is_empty());
    }
}
