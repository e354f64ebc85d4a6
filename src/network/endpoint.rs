// src/network/endpoint.rs
//! Pool endpoints and the failover state machine
//!
//! [`FailoverPolicy`] is the pure half of the connection manager: which
//! endpoint to dial next, how long to back off, and when a recovered
//! higher-priority pool should preempt the active one. It never touches a
//! socket, which is what keeps the failover transitions unit-testable.

use crate::types::AlgorithmType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// One configured pool. Read-only at runtime; the mutable connection
/// bookkeeping lives in [`ConnectionState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEndpoint {
    /// Pool URL, ws:// or wss://
    pub url: String,
    /// Wallet address or pool username
    pub user: String,
    /// Worker password, usually "x"
    #[serde(default = "default_password")]
    pub password: String,
    /// Require TLS transport
    #[serde(default)]
    pub tls: bool,
    /// Pin this pool to one algorithm regardless of job payloads
    #[serde(default, rename = "algo", skip_serializing_if = "Option::is_none")]
    pub algorithm_override: Option<AlgorithmType>,
    /// Failover order; lower connects first
    #[serde(default)]
    pub priority: u32,
}

fn default_password() -> String {
    "x".into()
}

/// Position in the per-connection protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No connection and no pending retry
    #[default]
    Disconnected,
    /// TCP/WebSocket dial in progress
    Connecting,
    /// Login sent, waiting for the pool's verdict
    Authenticating,
    /// Logged in and receiving jobs
    Active,
    /// Failed; waiting out the retry delay
    Backoff,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Authenticating => "authenticating",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Mutable per-endpoint bookkeeping, owned solely by the connection
/// manager and only ever touched from the control loop.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Index into the policy's endpoint list
    pub endpoint_index: usize,
    /// Current state machine position
    pub status: ConnectionStatus,
    /// Consecutive failures since the last success
    pub retry_count: u32,
    /// When the backoff expires, if backing off
    pub next_retry_at: Option<Instant>,
}

/// Endpoint selection and backoff policy.
///
/// Endpoints are held in priority order. At most one is Active; failures
/// move an endpoint to Backoff with an exponentially growing delay and
/// selection advances down the list, wrapping around once every endpoint
/// has been tried.
pub struct FailoverPolicy {
    endpoints: Vec<PoolEndpoint>,
    states: Vec<ConnectionState>,
    active: Option<usize>,
    base_delay: Duration,
    max_delay: Duration,
}

impl FailoverPolicy {
    /// Builds a policy over the configured endpoints, highest priority
    /// (lowest number) first. The sort is stable so equal priorities keep
    /// their configured order.
    pub fn new(mut endpoints: Vec<PoolEndpoint>, base_delay: Duration, max_delay: Duration) -> Self {
        endpoints.sort_by_key(|e| e.priority);
        let states = (0..endpoints.len())
            .map(|endpoint_index| ConnectionState {
                endpoint_index,
                status: ConnectionStatus::Disconnected,
                retry_count: 0,
                next_retry_at: None,
            })
            .collect();

        FailoverPolicy {
            endpoints,
            states,
            active: None,
            base_delay,
            max_delay,
        }
    }

    /// The configured endpoints in priority order.
    pub fn endpoints(&self) -> &[PoolEndpoint] {
        &self.endpoints
    }

    /// One endpoint by index.
    pub fn endpoint(&self, index: usize) -> &PoolEndpoint {
        &self.endpoints[index]
    }

    /// Connection bookkeeping for one endpoint.
    pub fn state(&self, index: usize) -> &ConnectionState {
        &self.states[index]
    }

    /// Index of the Active endpoint, if any.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Picks the endpoint to dial next and how long to wait first.
    ///
    /// The highest-priority endpoint not waiting out a backoff wins with a
    /// zero wait. When every endpoint is backing off, the one whose delay
    /// expires soonest wins, with the remaining wait returned.
    pub fn next_candidate(&self, now: Instant) -> Option<(usize, Duration)> {
        if self.endpoints.is_empty() {
            return None;
        }

        for (index, state) in self.states.iter().enumerate() {
            let ready = match state.next_retry_at {
                Some(at) => at <= now,
                None => true,
            };
            if ready && state.status != ConnectionStatus::Active {
                return Some((index, Duration::ZERO));
            }
        }

        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status != ConnectionStatus::Active)
            .filter_map(|(i, s)| s.next_retry_at.map(|at| (i, at)))
            .min_by_key(|(_, at)| *at)
            .map(|(i, at)| (i, at.saturating_duration_since(now)))
    }

    /// Endpoint dial started.
    pub fn note_connecting(&mut self, index: usize) {
        self.states[index].status = ConnectionStatus::Connecting;
        self.states[index].next_retry_at = None;
    }

    /// Login sent on an established transport.
    pub fn note_authenticating(&mut self, index: usize) {
        self.states[index].status = ConnectionStatus::Authenticating;
    }

    /// Login accepted: endpoint becomes the single Active one and its
    /// retry counter resets to the base.
    pub fn note_active(&mut self, index: usize) {
        if let Some(previous) = self.active.take() {
            if previous != index {
                self.states[previous].status = ConnectionStatus::Disconnected;
            }
        }
        let state = &mut self.states[index];
        state.status = ConnectionStatus::Active;
        state.retry_count = 0;
        state.next_retry_at = None;
        self.active = Some(index);
    }

    /// Any failure on an endpoint: counts the attempt, computes the
    /// exponential delay and parks the endpoint in Backoff. Returns the
    /// delay applied.
    pub fn note_failure(&mut self, index: usize, now: Instant) -> Duration {
        if self.active == Some(index) {
            self.active = None;
        }
        let retry_count = {
            let state = &mut self.states[index];
            state.retry_count = state.retry_count.saturating_add(1);
            state.retry_count
        };
        let delay = self.backoff_delay(retry_count);
        let state = &mut self.states[index];
        state.status = ConnectionStatus::Backoff;
        state.next_retry_at = Some(now + delay);
        delay
    }

    /// Graceful close without penalty.
    pub fn note_disconnected(&mut self, index: usize) {
        if self.active == Some(index) {
            self.active = None;
        }
        self.states[index].status = ConnectionStatus::Disconnected;
        self.states[index].next_retry_at = None;
    }

    /// Delay for the nth consecutive failure: base doubled per failure,
    /// held at the configured cap.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// A higher-priority endpoint than the active one whose backoff has
    /// expired, if any. The driver uses this to preempt the active
    /// connection per failover preference.
    pub fn preferred_recovery(&self, now: Instant) -> Option<usize> {
        let active = self.active?;
        self.states[..active]
            .iter()
            .position(|s| match s.next_retry_at {
                Some(at) => at <= now,
                None => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str, priority: u32) -> PoolEndpoint {
        PoolEndpoint {
            url: url.into(),
            user: "wallet".into(),
            password: "x".into(),
            tls: false,
            algorithm_override: None,
            priority,
        }
    }

    fn policy(urls: &[(&str, u32)]) -> FailoverPolicy {
        FailoverPolicy::new(
            urls.iter().map(|(u, p)| endpoint(u, *p)).collect(),
            Duration::from_millis(100),
            Duration::from_millis(1600),
        )
    }

    #[test]
    fn highest_priority_dials_first() {
        let p = policy(&[("b", 1), ("a", 0), ("c", 2)]);
        assert_eq!(p.endpoint(0).url, "a");
        let (idx, wait) = p.next_candidate(Instant::now()).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn backoff_grows_and_holds_at_cap() {
        let mut p = policy(&[("a", 0)]);
        let now = Instant::now();
        let mut last = Duration::ZERO;
        for _ in 0..4 {
            let delay = p.note_failure(0, now);
            assert!(delay > last, "delay must strictly increase below the cap");
            last = delay;
        }
        // 100 * 2^4 = 1600 hits the cap; further failures hold there
        assert_eq!(p.note_failure(0, now), Duration::from_millis(1600));
        assert_eq!(p.note_failure(0, now), Duration::from_millis(1600));
    }

    #[test]
    fn success_resets_the_retry_counter() {
        let mut p = policy(&[("a", 0)]);
        let now = Instant::now();
        p.note_failure(0, now);
        p.note_failure(0, now);
        assert_eq!(p.state(0).retry_count, 2);

        p.note_active(0);
        assert_eq!(p.state(0).retry_count, 0);
        assert_eq!(p.backoff_delay(1), Duration::from_millis(100));
    }

    #[test]
    fn three_endpoint_failover_scenario() {
        // A(prio 0) refuses three times, B(prio 1) then succeeds
        let mut p = policy(&[("a", 0), ("b", 1), ("c", 2)]);
        let now = Instant::now();

        let mut retry_at = now;
        for attempt in 0..3 {
            // each retry happens once A's previous backoff has expired
            let (idx, wait) = p.next_candidate(retry_at).unwrap();
            assert_eq!(idx, 0, "attempt {} should dial A", attempt);
            retry_at += wait;
            p.note_connecting(0);
            let delay = p.note_failure(0, retry_at);
            retry_at += delay;
        }
        assert_eq!(p.state(0).retry_count, 3);

        // B is dialable right away while A waits out its third backoff
        let now = retry_at - p.backoff_delay(3);

        let (idx, wait) = p.next_candidate(now).unwrap();
        assert_eq!(idx, 1, "selection advances to B while A backs off");
        assert_eq!(wait, Duration::ZERO);

        p.note_connecting(1);
        p.note_authenticating(1);
        p.note_active(1);

        assert_eq!(p.active(), Some(1));
        assert_eq!(p.state(1).status, ConnectionStatus::Active);
        assert_eq!(p.state(1).retry_count, 0);
        assert_eq!(p.state(0).retry_count, 3);
        assert_eq!(p.state(0).status, ConnectionStatus::Backoff);
        assert!(p.state(0).next_retry_at.unwrap() > now);
    }

    #[test]
    fn wraps_to_earliest_expiry_when_all_back_off() {
        let mut p = policy(&[("a", 0), ("b", 1)]);
        let now = Instant::now();
        p.note_failure(0, now); // 100ms
        p.note_failure(1, now);
        p.note_failure(1, now); // 200ms

        let (idx, wait) = p.next_candidate(now).unwrap();
        assert_eq!(idx, 0);
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));

        // once A's delay elapses it is dialable again with no wait
        let later = now + Duration::from_millis(150);
        let (idx, wait) = p.next_candidate(later).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn at_most_one_endpoint_is_active() {
        let mut p = policy(&[("a", 0), ("b", 1)]);
        p.note_active(1);
        p.note_active(0);
        assert_eq!(p.active(), Some(0));
        assert_eq!(p.state(1).status, ConnectionStatus::Disconnected);
        let active_count = (0..2)
            .filter(|&i| p.state(i).status == ConnectionStatus::Active)
            .count();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn recovered_priority_pool_preempts() {
        let mut p = policy(&[("a", 0), ("b", 1)]);
        let now = Instant::now();
        p.note_failure(0, now);
        p.note_active(1);

        // A still backing off: no preemption yet
        assert_eq!(p.preferred_recovery(now), None);

        // A's backoff expired: the driver should switch back
        let later = now + Duration::from_millis(200);
        assert_eq!(p.preferred_recovery(later), Some(0));
    }

    #[test]
    fn empty_endpoint_list_yields_no_candidate() {
        let p = policy(&[]);
        assert!(p.next_candidate(Instant::now()).is_none());
    }
}
