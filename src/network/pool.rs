// src/network/pool.rs
//! Pool connection manager
//!
//! Owns the WebSocket session with the active pool, the login handshake,
//! job-notify decoding and share submission, and drives the
//! [`FailoverPolicy`] across the configured endpoint list. Network and
//! protocol failures never leave this module as hard errors; they park the
//! endpoint in backoff and surface upstream only as "no job".

use crate::config::RetryConfig;
use crate::miner::broadcast::{JobTemplate, Share};
use crate::miner::controller::ControlEvent;
use crate::network::endpoint::{ConnectionStatus, FailoverPolicy, PoolEndpoint};
use crate::stats::StatsRegistry;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_ID: u64 = 1;

/// A share waiting for, or recovering from, submission.
struct PendingSubmit {
    share: Share,
    /// Shares are requeued at most once across a reconnection; pool-side
    /// job state is too ephemeral for more.
    retried: bool,
}

/// Why a session ended without a protocol failure.
enum SessionEnd {
    Shutdown,
    /// A higher-priority endpoint recovered and takes over
    Preempted(usize),
}

/// Submission-side session state: decodes inbound frames, tracks shares
/// until the pool answers, and applies the one-retry rule across
/// reconnections.
struct ShareSubmitter {
    events: crossbeam_channel::Sender<ControlEvent>,
    stats: Arc<StatsRegistry>,
    /// Submitted shares keyed by request id, awaiting a pool verdict
    in_flight: HashMap<u64, PendingSubmit>,
    /// Shares to replay on the next activated connection
    retry_queue: VecDeque<PendingSubmit>,
    next_request_id: u64,
}

impl ShareSubmitter {
    /// Handles one inbound frame. Returns whether it carried a job.
    fn handle_frame(
        &mut self,
        text: &str,
        endpoint: &PoolEndpoint,
        pool_id: usize,
    ) -> Result<bool, MinerError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            return match method {
                "job" => {
                    let params = value
                        .get("params")
                        .ok_or_else(|| MinerError::ProtocolError("Job without params".into()))?;
                    let job = decode_job(params, endpoint, pool_id)?;
                    self.events.send(ControlEvent::Job(job))?;
                    Ok(true)
                }
                other => {
                    debug!("Ignoring unknown method '{}'", other);
                    Ok(false)
                }
            };
        }

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(pending) = self.in_flight.remove(&id) {
                if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
                    // terminal: rejected shares are counted, never retried
                    warn!("Share for job {} rejected: {}", pending.share.job_id, error);
                    self.stats.record_rejected();
                } else {
                    self.stats.record_accepted();
                }
            }
        }

        Ok(false)
    }

    /// Submits one share and tracks it until the pool answers.
    async fn submit(&mut self, sink: &mut WsSink, pending: PendingSubmit) -> Result<(), MinerError> {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let payload = submit_payload(&pending.share, id);
        if pending.share.stale {
            debug!(
                "Submitting stale share for job {} (epoch {})",
                pending.share.job_id, pending.share.job_epoch
            );
        }

        self.in_flight.insert(id, pending);
        sink.send(Message::Text(payload.to_string().into())).await?;
        Ok(())
    }

    /// Replays the shares that survived the previous connection.
    async fn drain_retries(&mut self, sink: &mut WsSink) -> Result<(), MinerError> {
        while let Some(pending) = self.retry_queue.pop_front() {
            self.submit(sink, pending).await?;
        }
        Ok(())
    }

    /// The connection died: unanswered shares get their single replay
    /// chance, already-retried ones are dropped with a logged rejection.
    fn recover_in_flight(&mut self) {
        for (_, pending) in self.in_flight.drain() {
            if pending.retried {
                warn!(
                    "Dropping share for job {} after failed retry",
                    pending.share.job_id
                );
                self.stats.record_rejected();
            } else {
                self.retry_queue.push_back(PendingSubmit {
                    retried: true,
                    ..pending
                });
            }
        }
    }
}

/// Drives connections, failover and share submission for the configured
/// pool list.
pub struct PoolConnectionManager {
    policy: FailoverPolicy,
    retry: RetryConfig,
    stats: Arc<StatsRegistry>,
    shutdown: watch::Receiver<bool>,
    submissions: mpsc::UnboundedReceiver<Share>,
    sub: ShareSubmitter,
}

impl PoolConnectionManager {
    /// Builds the manager and bridges the controller's crossbeam share
    /// channel into the async world. Endpoints are tried in priority
    /// order with exponential per-endpoint backoff.
    pub fn new(
        endpoints: Vec<PoolEndpoint>,
        retry: RetryConfig,
        events: crossbeam_channel::Sender<ControlEvent>,
        shares: crossbeam_channel::Receiver<Share>,
        stats: Arc<StatsRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let policy = FailoverPolicy::new(
            endpoints,
            Duration::from_millis(retry.base_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
        );

        // one blocking bridge task; select! can then await shares
        // cancel-safely without risking a lost recv
        let (bridge_tx, submissions) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            for share in shares.iter() {
                if bridge_tx.send(share).is_err() {
                    break;
                }
            }
        });

        PoolConnectionManager {
            policy,
            retry,
            stats: Arc::clone(&stats),
            shutdown,
            submissions,
            sub: ShareSubmitter {
                events,
                stats,
                in_flight: HashMap::new(),
                retry_queue: VecDeque::new(),
                next_request_id: LOGIN_ID + 1,
            },
        }
    }

    /// Main failover loop. Returns when shutdown is signalled or no
    /// endpoint remains configured.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let Some((index, wait)) = self.policy.next_candidate(Instant::now()) else {
                warn!("No pool endpoints configured, connection manager exiting");
                return;
            };

            if !wait.is_zero() {
                debug!(
                    "All endpoints backing off, retrying {} in {:?}",
                    self.policy.endpoint(index).url,
                    wait
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.shutdown.changed() => return,
                }
                continue;
            }

            match self.run_session(index).await {
                Ok(SessionEnd::Shutdown) => return,
                Ok(SessionEnd::Preempted(better)) => {
                    info!(
                        "Switching from {} to recovered higher-priority pool {}",
                        self.policy.endpoint(index).url,
                        self.policy.endpoint(better).url
                    );
                    self.policy.note_disconnected(index);
                    self.on_connection_lost(index);
                }
                Err(e) => {
                    let delay = self.policy.note_failure(index, Instant::now());
                    warn!(
                        "Pool {} failed ({}), backing off {:?} (attempt {})",
                        self.policy.endpoint(index).url,
                        e,
                        delay,
                        self.policy.state(index).retry_count,
                    );
                    self.on_connection_lost(index);
                }
            }
        }
    }

    /// Workers idle on "no job" rather than grind a dead target, and
    /// unanswered shares line up for their single replay.
    fn on_connection_lost(&mut self, index: usize) {
        self.stats.set_connection(
            Some(self.policy.endpoint(index).url.clone()),
            self.policy.state(index).status,
        );
        let _ = self.sub.events.send(ControlEvent::PoolSwitch);
        self.sub.recover_in_flight();
    }

    /// One full connect/login/serve cycle against a single endpoint.
    async fn run_session(&mut self, index: usize) -> Result<SessionEnd, MinerError> {
        let endpoint = self.policy.endpoint(index).clone();

        self.policy.note_connecting(index);
        self.stats
            .set_connection(Some(endpoint.url.clone()), ConnectionStatus::Connecting);

        let url = url::Url::parse(&endpoint.url).map_err(|e| {
            MinerError::ConnectionError(format!("Invalid URL '{}': {}", endpoint.url, e))
        })?;
        if endpoint.tls && url.scheme() != "wss" {
            warn!("Pool '{}' requests TLS but is not a wss:// URL", endpoint.url);
        }

        let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(endpoint.url.as_str()))
            .await
            .map_err(|_| {
                MinerError::ConnectionError(format!("Connect to '{}' timed out", endpoint.url))
            })?
            .map_err(|e| {
                MinerError::ConnectionError(format!("Connect to '{}' failed: {}", endpoint.url, e))
            })?;

        self.policy.note_authenticating(index);
        self.stats
            .set_connection(Some(endpoint.url.clone()), ConnectionStatus::Authenticating);
        let first_job = login(&mut ws, &endpoint, index).await?;

        self.policy.note_active(index);
        self.stats
            .set_connection(Some(endpoint.url.clone()), ConnectionStatus::Active);
        info!("Connected to pool {}", endpoint.url);

        if let Some(job) = first_job {
            self.sub.events.send(ControlEvent::Job(job))?;
        }

        let (mut sink, mut source) = ws.split();
        self.sub.drain_retries(&mut sink).await?;
        self.serve(&mut sink, &mut source, &endpoint, index).await
    }

    /// Active-session loop: jobs in, shares out, keepalive and idle
    /// policing, plus the periodic check for a recovered priority pool.
    async fn serve(
        &mut self,
        sink: &mut WsSink,
        source: &mut WsSource,
        endpoint: &PoolEndpoint,
        index: usize,
    ) -> Result<SessionEnd, MinerError> {
        let mut keepalive = tokio::time::interval(Duration::from_secs(self.retry.keepalive_secs));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let idle_timeout = Duration::from_secs(self.retry.idle_timeout_secs);
        let mut last_job = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Ok(SessionEnd::Shutdown),

                msg = source.next() => {
                    let msg = msg.ok_or_else(|| {
                        MinerError::ConnectionError("Pool closed the connection".into())
                    })??;
                    match msg {
                        Message::Text(text) => {
                            if self.sub.handle_frame(&text, endpoint, index)? {
                                last_job = Instant::now();
                            }
                        }
                        Message::Close(_) => {
                            return Err(MinerError::ConnectionError("Pool sent close".into()));
                        }
                        _ => {}
                    }
                }

                share = self.submissions.recv() => {
                    let Some(share) = share else {
                        // controller gone; treat as shutdown
                        return Ok(SessionEnd::Shutdown);
                    };
                    self.sub.submit(sink, PendingSubmit { share, retried: false }).await?;
                }

                _ = keepalive.tick() => {
                    if last_job.elapsed() > idle_timeout {
                        return Err(MinerError::ConnectionError(format!(
                            "No job from pool for {:?}", idle_timeout
                        )));
                    }
                    if let Some(better) = self.policy.preferred_recovery(Instant::now()) {
                        return Ok(SessionEnd::Preempted(better));
                    }
                    sink.send(Message::Text(json!({"method": "keepalived"}).to_string().into())).await?;
                }
            }
        }
    }
}

/// Sends the login request and waits for the pool's verdict. Some pools
/// hand the first job straight back in the login result.
async fn login(
    ws: &mut WsStream,
    endpoint: &PoolEndpoint,
    pool_id: usize,
) -> Result<Option<JobTemplate>, MinerError> {
    let request = json!({
        "method": "login",
        "params": {
            "login": endpoint.user,
            "pass": endpoint.password,
            "agent": format!("hashforge/{}", env!("CARGO_PKG_VERSION")),
        },
        "id": LOGIN_ID,
    });
    ws.send(Message::Text(request.to_string().into())).await?;

    let deadline = tokio::time::Instant::now() + LOGIN_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| MinerError::ConnectionError("Login timed out".into()))?;

        let Some(msg) = msg else {
            return Err(MinerError::ConnectionError(
                "Connection closed during login".into(),
            ));
        };

        if let Message::Text(text) = msg? {
            let value: Value = serde_json::from_str(&text)?;
            if value.get("id").and_then(Value::as_u64) != Some(LOGIN_ID) {
                continue;
            }

            if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
                return Err(MinerError::ConnectionError(format!(
                    "Login rejected: {}",
                    error
                )));
            }

            let job = value
                .get("result")
                .and_then(|r| r.get("job"))
                .map(|params| decode_job(params, endpoint, pool_id))
                .transpose()?;
            return Ok(job);
        }
    }
}

/// Decodes a job-notify payload. The endpoint's algorithm override wins
/// over whatever the pool advertises.
fn decode_job(
    params: &Value,
    endpoint: &PoolEndpoint,
    pool_id: usize,
) -> Result<JobTemplate, MinerError> {
    let field = |name: &str| -> Result<&str, MinerError> {
        params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::ProtocolError(format!("Missing {}", name)))
    };

    let algorithm = match endpoint.algorithm_override {
        Some(algo) => algo,
        None => AlgorithmType::from_str(field("algo")?).map_err(MinerError::ProtocolError)?,
    };

    Ok(JobTemplate {
        id: field("job_id")?.to_string(),
        algorithm,
        blob: hex::decode(field("blob")?)?,
        target: hex::decode(field("target")?)?,
        height: params.get("height").and_then(Value::as_u64).unwrap_or(0),
        pool_id,
    })
}

/// Submission payload. The stale flag rides along so the pool can apply
/// its own grace window.
fn submit_payload(share: &Share, id: u64) -> Value {
    json!({
        "method": "submit",
        "params": {
            "job_id": share.job_id,
            "nonce": format!("{:016x}", share.nonce),
            "result": hex::encode(share.result),
            "stale": share.stale,
        },
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> PoolEndpoint {
        PoolEndpoint {
            url: "wss://pool.example.com:3333".into(),
            user: "wallet".into(),
            password: "x".into(),
            tls: true,
            algorithm_override: None,
            priority: 0,
        }
    }

    fn share(job_id: &str) -> Share {
        Share {
            job_id: job_id.into(),
            job_epoch: 7,
            nonce: 0xdead,
            result: [0x11; 32],
            worker_index: 2,
            stale: false,
        }
    }

    fn submitter() -> (ShareSubmitter, crossbeam_channel::Receiver<ControlEvent>) {
        let (events, events_rx) = crossbeam_channel::unbounded();
        let sub = ShareSubmitter {
            events,
            stats: StatsRegistry::new(),
            in_flight: HashMap::new(),
            retry_queue: VecDeque::new(),
            next_request_id: LOGIN_ID + 1,
        };
        (sub, events_rx)
    }

    #[test]
    fn decode_job_reads_all_fields() {
        let params = json!({
            "job_id": "abc123",
            "blob": "00ff10",
            "target": "ffff0000",
            "algo": "randomx",
            "height": 42,
        });
        let job = decode_job(&params, &endpoint(), 3).unwrap();
        assert_eq!(job.id, "abc123");
        assert_eq!(job.blob, vec![0x00, 0xff, 0x10]);
        assert_eq!(job.target, vec![0xff, 0xff, 0x00, 0x00]);
        assert_eq!(job.algorithm, AlgorithmType::RandomX);
        assert_eq!(job.height, 42);
        assert_eq!(job.pool_id, 3);
    }

    #[test]
    fn decode_job_rejects_missing_fields() {
        let params = json!({ "job_id": "abc", "blob": "00" });
        assert!(matches!(
            decode_job(&params, &endpoint(), 0),
            Err(MinerError::ProtocolError(_))
        ));
    }

    #[test]
    fn endpoint_override_beats_advertised_algorithm() {
        let params = json!({
            "job_id": "abc",
            "blob": "00",
            "target": "ff",
            "algo": "randomx",
        });
        let mut ep = endpoint();
        ep.algorithm_override = Some(AlgorithmType::CryptoNightR);
        let job = decode_job(&params, &ep, 0).unwrap();
        assert_eq!(job.algorithm, AlgorithmType::CryptoNightR);
    }

    #[test]
    fn submit_payload_carries_the_stale_flag() {
        let mut s = share("abc");
        s.stale = true;
        let payload = submit_payload(&s, 9);
        assert_eq!(payload["id"], 9);
        assert_eq!(payload["method"], "submit");
        assert_eq!(payload["params"]["job_id"], "abc");
        assert_eq!(payload["params"]["nonce"], "000000000000dead");
        assert_eq!(payload["params"]["stale"], true);
        assert_eq!(
            payload["params"]["result"],
            hex::encode([0x11u8; 32]).as_str()
        );
    }

    #[test]
    fn job_frames_reach_the_controller() {
        let (mut sub, events_rx) = submitter();
        let frame = json!({
            "method": "job",
            "params": {
                "job_id": "j1",
                "blob": "0a0b",
                "target": "ffff",
                "algo": "randomx",
            }
        })
        .to_string();

        let carried_job = sub.handle_frame(&frame, &endpoint(), 0).unwrap();
        assert!(carried_job);
        match events_rx.try_recv().unwrap() {
            ControlEvent::Job(job) => assert_eq!(job.id, "j1"),
            _ => panic!("expected a job event"),
        }
    }

    #[test]
    fn submit_responses_settle_in_flight_shares() {
        let (mut sub, _events_rx) = submitter();
        sub.in_flight.insert(
            5,
            PendingSubmit {
                share: share("a"),
                retried: false,
            },
        );
        sub.in_flight.insert(
            6,
            PendingSubmit {
                share: share("b"),
                retried: false,
            },
        );

        let ok = json!({"id": 5, "result": {"status": "OK"}}).to_string();
        let rejected = json!({"id": 6, "error": {"message": "low difficulty"}}).to_string();
        sub.handle_frame(&ok, &endpoint(), 0).unwrap();
        sub.handle_frame(&rejected, &endpoint(), 0).unwrap();

        assert!(sub.in_flight.is_empty());
        let snap = sub.stats.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.rejected, 1);
    }

    #[test]
    fn unanswered_shares_are_requeued_exactly_once() {
        let (mut sub, _events_rx) = submitter();
        sub.in_flight.insert(
            5,
            PendingSubmit {
                share: share("fresh"),
                retried: false,
            },
        );
        sub.in_flight.insert(
            6,
            PendingSubmit {
                share: share("already-retried"),
                retried: true,
            },
        );

        sub.recover_in_flight();

        // the fresh share waits for the next connection, the retried one
        // is gone for good
        assert_eq!(sub.retry_queue.len(), 1);
        assert_eq!(sub.retry_queue[0].share.job_id, "fresh");
        assert!(sub.retry_queue[0].retried);
        assert_eq!(sub.stats.snapshot().rejected, 1);
    }
}
