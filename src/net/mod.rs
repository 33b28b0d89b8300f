//! Network-level building blocks: the host address model, coalesced address
//! range sets and per-entity traffic shaping.

pub mod address_list;
pub mod host_address;
pub mod rate_limit;

pub use address_list::BinaryAddressList;
pub use host_address::{AddressFamily, HostAddress, HostIp, Ipv4Host, Ipv6Host};
pub use rate_limit::{CompoundRateLimit, RateLimitedStream, RateLimiter};
