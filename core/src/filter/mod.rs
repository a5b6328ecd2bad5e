//! Record filtering and emission policy.
//!
//! All predicates are AND-joined and empty filters pass. The policy also owns
//! the cross-task budgets: the record quota, the body-dump budget, the
//! sampling ratio, and the shared rate limiter.

pub mod intset;
pub mod pattern;
pub mod ratelimit;

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::config::Level;
use crate::runtime::CancelToken;

pub use self::intset::{IntRange, IntSet};
pub use self::pattern::wildcard_match;
pub use self::ratelimit::RateLimiter;

/// Emission policy shared by every connection worker.
#[derive(Debug, Default)]
pub struct Policy {
    /// Request host wildcard; empty matches all.
    pub host: String,
    /// Request URI wildcard; empty matches all.
    pub uri: String,
    /// Comma-separated method list; empty matches all.
    pub method: String,
    /// Response status set; empty matches all.
    pub status: IntSet,
    pub level: Level,
    /// Body dump file prefix; empty disables dumping.
    pub dump_body: String,
    /// Maximum number of dump files; 0 is unlimited.
    pub dump_max: u32,
    /// Dump files written so far; managed through [`Policy::record_dump`].
    pub dump_num: AtomicU32,
    /// Whether response records are produced at all.
    pub resp: bool,
    /// Print unknown content types as text.
    pub force: bool,
    /// Render requests as curl commands.
    pub curl: bool,
    /// Emit one JSON object per message instead of text records.
    pub json: bool,
    /// Emit EOF sentinel records.
    pub eof: bool,
    /// Messages-per-second budget; `None` is unlimited.
    pub rate_limiter: Option<RateLimiter>,
    /// Maximum records to emit before shutting down; 0 is unlimited.
    pub n: i32,
    /// Remaining quota; seeded by [`Policy::reset_quota`].
    pub num: AtomicI32,
    /// Uniform sampling ratio in `[0, 1]`; 1 keeps everything.
    pub src_ratio: f64,
    /// Cancelled when the quota drains.
    pub cancel: Option<CancelToken>,
}

impl Policy {
    /// Seeds the quota counter; call once after setting `n`.
    pub fn reset_quota(&self) {
        self.num.store(self.n, Ordering::SeqCst);
    }

    pub fn permits_method(&self, method: &str) -> bool {
        self.method.is_empty()
            || self
                .method
                .split(',')
                .any(|m| m.trim().eq_ignore_ascii_case(method))
    }

    pub fn permits_code(&self, code: i32) -> bool {
        self.status.contains(code)
    }

    pub fn permits_host(&self, host: &str) -> bool {
        self.host.is_empty() || wildcard_match(host, &self.host)
    }

    pub fn permits_uri(&self, uri: &str) -> bool {
        self.uri.is_empty() || wildcard_match(uri, &self.uri)
    }

    /// The full request gate: host, uri, quota, and sampling, in that order.
    pub fn permits_request(&self, host: &str, uri: &str) -> bool {
        self.permits_host(host) && self.permits_uri(uri) && self.permit_quota() && self.permit_ratio()
    }

    /// Draws one unit from the record quota.
    fn permit_quota(&self) -> bool {
        self.n <= 0 || self.num.fetch_sub(1, Ordering::SeqCst) - 1 >= 0
    }

    pub fn permit_ratio(&self) -> bool {
        self.src_ratio >= 1.0 || rand::random::<f64>() <= self.src_ratio
    }

    /// `true` once the quota has drained; cancels the root context as a side
    /// effect.
    pub fn reached_quota(&self) -> bool {
        let reached = self.n > 0 && self.num.load(Ordering::SeqCst) <= 0;
        if reached {
            if let Some(cancel) = &self.cancel {
                cancel.cancel();
            }
        }
        reached
    }

    /// Rate gate; a policy without a limiter always allows.
    pub fn allow(&self) -> bool {
        self.rate_limiter.as_ref().map(|l| l.allow()).unwrap_or(true)
    }

    /// `true` while body dumping is enabled and under budget.
    pub fn can_dump(&self) -> bool {
        if self.dump_body.is_empty() {
            return false;
        }
        self.dump_max == 0 || self.dump_num.load(Ordering::SeqCst) < self.dump_max
    }

    /// Accounts one written dump file.
    pub fn record_dump(&self) {
        self.dump_num.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_pass_everything() {
        let policy = Policy {
            src_ratio: 1.0,
            ..Default::default()
        };
        assert!(policy.permits_method("GET"));
        assert!(policy.permits_code(500));
        assert!(policy.permits_request("any.host", "/any/uri"));
        assert!(policy.allow());
    }

    #[test]
    fn method_list_matches_exact_entries() {
        let policy = Policy {
            method: "GET,POST".to_owned(),
            ..Default::default()
        };
        assert!(policy.permits_method("GET"));
        assert!(policy.permits_method("post"));
        assert!(!policy.permits_method("PUT"));
    }

    #[test]
    fn quota_counts_down_and_reaches() {
        let policy = Policy {
            n: 2,
            src_ratio: 1.0,
            ..Default::default()
        };
        policy.reset_quota();
        assert!(policy.permits_request("", ""));
        assert!(!policy.reached_quota());
        assert!(policy.permits_request("", ""));
        assert!(policy.reached_quota());
        assert!(!policy.permits_request("", ""));
    }

    #[test]
    fn quota_only_drains_when_other_predicates_pass() {
        let policy = Policy {
            n: 1,
            host: "match.me".to_owned(),
            src_ratio: 1.0,
            ..Default::default()
        };
        policy.reset_quota();
        // host mismatch short-circuits before the quota draw
        assert!(!policy.permits_request("other.host", "/"));
        assert!(!policy.reached_quota());
        assert!(policy.permits_request("match.me", "/"));
    }

    #[test]
    fn dump_budget() {
        let policy = Policy {
            dump_body: "dump".to_owned(),
            dump_max: 1,
            ..Default::default()
        };
        assert!(policy.can_dump());
        policy.record_dump();
        assert!(!policy.can_dump());
    }
}
