//! Per-entity traffic shaping.
//!
//! A [`RateLimiter`] is a shared token bucket measured in bytes per second.
//! Sessions compose several of them — their own, the user's, and one per
//! group — into a [`CompoundRateLimit`] wired into both the control and the
//! data socket through [`RateLimitedStream`]. Limiters are addressable by many
//! sessions concurrently and are intrinsically thread-safe.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// A transfer speed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No shaping.
    Unlimited,
    /// At most this many bytes per second.
    BytesPerSecond(u64),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => write!(f, "unlimited"),
            Limit::BytesPerSecond(n) => write!(f, "{}", n),
        }
    }
}

impl std::str::FromStr for Limit {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unlimited") {
            Ok(Limit::Unlimited)
        } else {
            s.parse::<u64>().map(Limit::BytesPerSecond)
        }
    }
}

#[derive(Debug)]
struct Bucket {
    limit: Limit,
    tokens: u64,
    refilled_at: Instant,
}

impl Bucket {
    /// Charges `bytes` against the bucket. Returns how long the caller should
    /// back off before transferring again, if the bucket ran dry.
    fn charge(&mut self, bytes: u64) -> Option<Duration> {
        let rate = match self.limit {
            Limit::Unlimited => return None,
            Limit::BytesPerSecond(rate) => rate.max(1),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at);
        let refill = (elapsed.as_secs_f64() * rate as f64) as u64;
        self.tokens = self.tokens.saturating_add(refill).min(rate);
        self.refilled_at = now;

        if self.tokens >= bytes {
            self.tokens -= bytes;
            return None;
        }

        let missing = bytes - self.tokens;
        self.tokens = 0;
        Some(Duration::from_secs_f64(missing as f64 / rate as f64))
    }
}

/// A shared, thread-safe token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter with the given limit. The burst size equals one second worth
    /// of the configured rate.
    pub fn new(limit: Limit) -> Arc<Self> {
        let tokens = match limit {
            Limit::Unlimited => 0,
            Limit::BytesPerSecond(rate) => rate,
        };
        Arc::new(RateLimiter {
            bucket: Mutex::new(Bucket {
                limit,
                tokens,
                refilled_at: Instant::now(),
            }),
        })
    }

    /// Replaces the limit, keeping accumulated debt.
    pub fn set_limit(&self, limit: Limit) {
        let mut bucket = self.bucket.lock().expect("rate limiter lock");
        bucket.limit = limit;
        if let Limit::BytesPerSecond(rate) = limit {
            bucket.tokens = bucket.tokens.min(rate);
        }
    }

    /// The configured limit.
    pub fn limit(&self) -> Limit {
        self.bucket.lock().expect("rate limiter lock").limit
    }

    fn charge(&self, bytes: u64) -> Option<Duration> {
        self.bucket.lock().expect("rate limiter lock").charge(bytes)
    }
}

/// An ordered, deduplicated stack of limiters that are all charged for the
/// same bytes. The effective delay is the longest any member demands.
#[derive(Debug, Clone, Default)]
pub struct CompoundRateLimit {
    limiters: Vec<Arc<RateLimiter>>,
}

impl CompoundRateLimit {
    /// An empty compound (no shaping).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the member set. The new set is sorted and deduplicated by
    /// identity so a limiter shared by several groups is charged once.
    pub fn set_limiters(&mut self, mut limiters: Vec<Arc<RateLimiter>>) {
        limiters.sort_by_key(|l| Arc::as_ptr(l) as usize);
        limiters.dedup_by(|a, b| Arc::ptr_eq(a, b));
        self.limiters = limiters;
    }

    /// The current members.
    pub fn limiters(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }

    fn charge(&self, bytes: u64) -> Option<Duration> {
        self.limiters.iter().filter_map(|l| l.charge(bytes)).max()
    }
}

/// A compound limit that can be swapped while streams already wrap it, e.g.
/// when login brings the user's and groups' limiters into an open control
/// connection.
pub type SharedRateLimit = Arc<Mutex<CompoundRateLimit>>;

/// Wraps a transport and shapes bytes in both directions.
#[derive(Debug)]
pub struct RateLimitedStream<T> {
    inner: T,
    limits: SharedRateLimit,
    read_delay: Option<Pin<Box<Sleep>>>,
    write_delay: Option<Pin<Box<Sleep>>>,
}

impl<T> RateLimitedStream<T> {
    /// Wraps `inner` with its own compound limit.
    pub fn new(inner: T, limits: CompoundRateLimit) -> Self {
        Self::with_shared(inner, Arc::new(Mutex::new(limits)))
    }

    /// Wraps `inner` over an externally owned compound, so the limiter set
    /// can change underneath the stream.
    pub fn with_shared(inner: T, limits: SharedRateLimit) -> Self {
        RateLimitedStream {
            inner,
            limits,
            read_delay: None,
            write_delay: None,
        }
    }

    /// The shared compound this stream charges.
    pub fn shared_limits(&self) -> SharedRateLimit {
        self.limits.clone()
    }

    /// Consumes the wrapper, yielding the transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// A reference to the wrapped transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn charge(&self, bytes: u64) -> Option<Duration> {
        self.limits.lock().expect("rate limit lock").charge(bytes)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for RateLimitedStream<T> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if let Some(delay) = self.read_delay.as_mut() {
            match delay.as_mut().poll(cx) {
                Poll::Ready(()) => self.read_delay = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let transferred = (buf.filled().len() - before) as u64;
                if transferred > 0 {
                    if let Some(wait) = self.charge(transferred) {
                        self.read_delay = Some(Box::pin(sleep(wait)));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for RateLimitedStream<T> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Some(delay) = self.write_delay.as_mut() {
            match delay.as_mut().poll(cx) {
                Poll::Ready(()) => self.write_delay = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        match Pin::new(&mut self.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                if written > 0 {
                    if let Some(wait) = self.charge(written as u64) {
                        self.write_delay = Some(Box::pin(sleep(wait)));
                    }
                }
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn limit_text_round_trip() {
        assert_eq!("unlimited".parse::<Limit>().unwrap(), Limit::Unlimited);
        assert_eq!("1048576".parse::<Limit>().unwrap(), Limit::BytesPerSecond(1048576));
        assert_eq!(Limit::Unlimited.to_string(), "unlimited");
        assert_eq!(Limit::BytesPerSecond(42).to_string(), "42");
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_allows_burst_then_delays() {
        let limiter = RateLimiter::new(Limit::BytesPerSecond(1000));
        // A full second worth goes through immediately.
        assert_eq!(limiter.charge(1000), None);
        // The next kilobyte must wait about a second.
        let wait = limiter.charge(1000).expect("bucket must be dry");
        assert!(wait > Duration::from_millis(900));
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn unlimited_never_delays() {
        let limiter = RateLimiter::new(Limit::Unlimited);
        assert_eq!(limiter.charge(u64::MAX), None);
    }

    #[test]
    fn compound_dedups_shared_limiters() {
        let shared = RateLimiter::new(Limit::BytesPerSecond(100));
        let mut compound = CompoundRateLimit::new();
        compound.set_limiters(vec![shared.clone(), shared.clone(), RateLimiter::new(Limit::Unlimited)]);
        assert_eq!(compound.limiters().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn compound_delay_is_the_maximum() {
        let slow = RateLimiter::new(Limit::BytesPerSecond(10));
        let fast = RateLimiter::new(Limit::BytesPerSecond(1000));
        let mut compound = CompoundRateLimit::new();
        compound.set_limiters(vec![slow, fast]);

        // Drain both buckets.
        compound.charge(1000);
        let wait = compound.charge(10).expect("slow bucket must dominate");
        assert!(wait >= Duration::from_millis(900));
    }
}
