//! The automatic banner: permanently refuses abusive sources for a while.
//!
//! Failures are counted in a sliding window per IPv4 address or IPv6 /64
//! prefix. Crossing the threshold inside the window bans the source for the
//! configured duration and emits a [`BannedEvent`] to subscribers; the
//! listener consults [`AutoBanner::is_banned`] and closes banned peers before
//! any greeting is sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use slog::Logger;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::net::host_address::{AddressFamily, HostIp};

/// Autobanner tunables. `max_login_failures == 0` disables banning.
#[derive(Debug, Clone, Copy)]
pub struct BanOptions {
    /// Failures within the window that trigger a ban.
    pub max_login_failures: usize,
    /// The sliding window.
    pub login_failures_time_window: Duration,
    /// How long a ban lasts.
    pub ban_duration: Duration,
}

impl Default for BanOptions {
    fn default() -> Self {
        BanOptions {
            max_login_failures: 0,
            login_failures_time_window: Duration::from_secs(60),
            ban_duration: Duration::from_secs(3600),
        }
    }
}

/// Broadcast when a source crosses the ban threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedEvent {
    /// The banned address.
    pub address: HostIp,
    /// Its family.
    pub family: AddressFamily,
}

#[derive(Debug, Default)]
struct BanEntry {
    failed_timepoints: VecDeque<Instant>,
    banned_until: Option<Instant>,
}

impl BanEntry {
    fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|t| t > now)
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        !self.is_banned(now)
            && self
                .failed_timepoints
                .back()
                .is_none_or(|&last| now.duration_since(last) > window)
    }
}

#[derive(Debug, Default)]
struct BanState {
    v4: HashMap<u32, BanEntry>,
    v6: HashMap<u64, BanEntry>,
}

/// Counts login failures per source and bans repeat offenders.
#[derive(Debug)]
pub struct AutoBanner {
    opts: RwLock<BanOptions>,
    state: Arc<Mutex<BanState>>,
    events: broadcast::Sender<BannedEvent>,
    logger: Logger,
}

impl AutoBanner {
    /// A banner with the given options. Spawns the expiry sweeper on the
    /// current runtime.
    pub fn new(opts: BanOptions, logger: Logger) -> Arc<AutoBanner> {
        let (events, _) = broadcast::channel(64);
        let banner = Arc::new(AutoBanner {
            opts: RwLock::new(opts),
            state: Arc::new(Mutex::new(BanState::default())),
            events,
            logger,
        });

        let state = Arc::downgrade(&banner.state);
        let window = opts.login_failures_time_window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else { return };
                let now = Instant::now();
                let mut state = state.lock().expect("autobanner lock");
                state.v4.retain(|_, e| !e.is_stale(now, window));
                state.v6.retain(|_, e| !e.is_stale(now, window));
            }
        });

        banner
    }

    /// Replaces the options.
    pub fn set_options(&self, opts: BanOptions) {
        *self.opts.write().expect("autobanner opts lock") = opts;
    }

    /// Subscribes to [`BannedEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<BannedEvent> {
        self.events.subscribe()
    }

    /// Tells whether connections from `address` must be refused.
    pub fn is_banned(&self, address: &HostIp) -> bool {
        let opts = *self.opts.read().expect("autobanner opts lock");
        if opts.max_login_failures == 0 {
            return false;
        }

        let now = Instant::now();
        let state = self.state.lock().expect("autobanner lock");
        match address {
            HostIp::V4(h) => state.v4.get(&h.to_u32()).is_some_and(|e| e.is_banned(now)),
            HostIp::V6(h) => state.v6.get(&h.high_u64()).is_some_and(|e| e.is_banned(now)),
            HostIp::Unknown => false,
        }
    }

    /// Registers a failed login from `address`. Returns `true` when the
    /// source is banned as of this failure.
    pub fn set_failed_login(&self, address: &HostIp) -> bool {
        let opts = *self.opts.read().expect("autobanner opts lock");
        if opts.max_login_failures == 0 {
            return false;
        }

        let family = match address.family() {
            Some(f) => f,
            None => return false,
        };

        let now = Instant::now();
        let mut state = self.state.lock().expect("autobanner lock");
        let entry = match address {
            HostIp::V4(h) => state.v4.entry(h.to_u32()).or_default(),
            HostIp::V6(h) => state.v6.entry(h.high_u64()).or_default(),
            HostIp::Unknown => unreachable!("filtered above"),
        };

        if entry.is_banned(now) {
            return true;
        }

        entry.failed_timepoints.push_back(now);
        if entry.failed_timepoints.len() >= opts.max_login_failures {
            let spread = now.duration_since(*entry.failed_timepoints.front().expect("non-empty"));
            if spread <= opts.login_failures_time_window {
                entry.banned_until = Some(now + opts.ban_duration);
                entry.failed_timepoints.clear();

                slog::warn!(self.logger, "banning source address";
                    "address" => %address, "duration_secs" => opts.ban_duration.as_secs());
                let _ = self.events.send(BannedEvent {
                    address: address.clone(),
                    family,
                });
                return true;
            }
            entry.failed_timepoints.pop_front();
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::host_address::{Ipv4Host, Ipv6Host};
    use pretty_assertions::assert_eq;

    fn banner(max: usize, window: Duration, ban: Duration) -> Arc<AutoBanner> {
        AutoBanner::new(
            BanOptions {
                max_login_failures: max,
                login_failures_time_window: window,
                ban_duration: ban,
            },
            Logger::root(slog::Discard, slog::o!()),
        )
    }

    fn v4(ip: [u8; 4]) -> HostIp {
        HostIp::V4(Ipv4Host(ip))
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_within_window_bans_for_exactly_the_duration() {
        let banner = banner(3, Duration::from_secs(60), Duration::from_secs(3600));
        let ip = v4([10, 0, 0, 1]);
        let mut events = banner.subscribe();

        assert!(!banner.set_failed_login(&ip));
        assert!(!banner.set_failed_login(&ip));
        assert!(!banner.is_banned(&ip));
        assert!(banner.set_failed_login(&ip));
        assert!(banner.is_banned(&ip));

        let event = events.recv().await.unwrap();
        assert_eq!(event.address, ip);
        assert_eq!(event.family, AddressFamily::V4);

        // Still banned just before expiry, free right after.
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(banner.is_banned(&ip));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!banner.is_banned(&ip));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_failures_never_ban() {
        let banner = banner(3, Duration::from_secs(60), Duration::from_secs(3600));
        let ip = v4([10, 0, 0, 2]);

        for _ in 0..6 {
            assert!(!banner.set_failed_login(&ip));
            tokio::time::advance(Duration::from_secs(61)).await;
        }
        assert!(!banner.is_banned(&ip));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_threshold_disables_banning() {
        let banner = banner(0, Duration::from_secs(60), Duration::from_secs(3600));
        let ip = v4([10, 0, 0, 3]);
        for _ in 0..10 {
            assert!(!banner.set_failed_login(&ip));
        }
        assert!(!banner.is_banned(&ip));
    }

    #[tokio::test(start_paused = true)]
    async fn v6_sources_share_their_slash64() {
        let banner = banner(2, Duration::from_secs(60), Duration::from_secs(3600));
        let a = HostIp::V6(Ipv6Host([0x2001, 0xdb8, 0, 0, 0, 0, 0, 1]));
        let b = HostIp::V6(Ipv6Host([0x2001, 0xdb8, 0, 0, 0xffff, 0, 0, 2]));

        banner.set_failed_login(&a);
        assert!(banner.set_failed_login(&b), "same /64 must share the counter");
        assert!(banner.is_banned(&a));
        assert!(banner.is_banned(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_forgets_expired_entries() {
        let banner = banner(3, Duration::from_secs(10), Duration::from_secs(20));
        let ip = v4([10, 0, 0, 4]);
        banner.set_failed_login(&ip);

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;

        assert!(banner.state.lock().unwrap().v4.is_empty());
    }
}
