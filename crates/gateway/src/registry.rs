//! In-memory executor registry (§4.3) — process-local, never persisted.
//!
//! Online presence only exists while a WebSocket connection is held; the
//! durable half (identity, capabilities, token hash, revocation) lives in
//! `db::repository::executors`.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{DispatchKind, GatewayFrame, Pool, RemoteEvent, RemoteResult, Selector};

/// A live executor connection. Cheap to clone (atomics + an mpsc sender).
pub struct Connection {
    pub executor_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub pool: Pool,
    pub name: String,
    pub labels: Vec<String>,
    pub kinds: Vec<String>,
    pub connectors: Vec<String>,
    pub max_in_flight: i32,
    pub in_flight: AtomicI32,
    pub revoked: std::sync::atomic::AtomicBool,
    pub sender: mpsc::UnboundedSender<GatewayFrame>,
}

impl Connection {
    fn is_eligible(&self, request_org: Uuid, kind: DispatchKind, connector_id: Option<&str>, selector: Option<&Selector>) -> bool {
        if self.revoked.load(Ordering::Relaxed) {
            return false;
        }
        if self.in_flight.load(Ordering::Relaxed) >= self.max_in_flight {
            return false;
        }
        let kind_str = kind_label(kind);
        if !self.kinds.iter().any(|k| k == kind_str) {
            return false;
        }
        if kind == DispatchKind::ConnectorAction && !self.connectors.is_empty() {
            let Some(connector_id) = connector_id else { return false };
            if !self.connectors.iter().any(|c| c == connector_id) {
                return false;
            }
        }
        match self.pool {
            Pool::Byon => {
                if self.organization_id != Some(request_org) {
                    return false;
                }
            }
            Pool::Managed => {}
        }
        if let Some(selector) = selector {
            if let Some(pool) = &selector.pool {
                let wants_byon = pool == "byon";
                if wants_byon != (self.pool == Pool::Byon) {
                    return false;
                }
            }
            if let Some(executor_id) = selector.executor_id {
                if executor_id != self.executor_id {
                    return false;
                }
            }
            if let Some(tag) = &selector.tag {
                if !self.labels.iter().any(|l| l == tag) {
                    return false;
                }
            }
            if let Some(group) = &selector.group {
                let group_label = format!("group:{group}");
                if !self.labels.iter().any(|l| l == &group_label) {
                    return false;
                }
            }
            if !selector.labels.is_empty() && !selector.labels.iter().all(|l| self.labels.contains(l)) {
                return false;
            }
        }
        true
    }
}

fn kind_label(kind: DispatchKind) -> &'static str {
    match kind {
        DispatchKind::ConnectorAction => "connector.action",
        DispatchKind::AgentExecute => "agent.execute",
        DispatchKind::AgentRun => "agent.run",
    }
}

/// Selection strategy between eligible executors (`GATEWAY_AGENT_SELECTION`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    RoundRobin,
    LeastInFlight,
}

/// Metadata kept for a dispatch awaiting a result, keyed by `requestId`.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub organization_id: Uuid,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub kind: DispatchKind,
    pub executor_id: Uuid,
    pub started_at: Instant,
    pub timeout: Duration,
}

/// A result or event buffered under a `requestId` the local process has no
/// pending record for (§4.3: "orphan result"). Bounded by a TTL sweep, not a
/// hard capacity limit — the registry is process-local and results are small.
struct OrphanEntry {
    result: Option<RemoteResult>,
    events: Vec<RemoteEvent>,
    inserted_at: Instant,
}

const ORPHAN_TTL: Duration = Duration::from_secs(600);

pub struct ExecutorRegistry {
    connections: DashMap<Uuid, Arc<Connection>>,
    pending: DashMap<Uuid, PendingEntry>,
    orphan: DashMap<Uuid, OrphanEntry>,
    round_robin: DashMap<String, AtomicUsize>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { connections: DashMap::new(), pending: DashMap::new(), orphan: DashMap::new(), round_robin: DashMap::new() }
    }

    pub fn register(&self, connection: Connection) {
        self.connections.insert(connection.executor_id, Arc::new(connection));
    }

    pub fn unregister(&self, executor_id: Uuid) {
        self.connections.remove(&executor_id);
    }

    pub fn revoke(&self, executor_id: Uuid) {
        if let Some(connection) = self.connections.get(&executor_id) {
            connection.revoked.store(true, Ordering::Relaxed);
        }
    }

    pub fn get(&self, executor_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&executor_id).map(|c| c.clone())
    }

    /// Eligible executors, narrowed by a default pool preference: unless the
    /// caller's selector names a pool explicitly, a Managed executor is
    /// preferred over a BYON one whenever at least one Managed candidate is
    /// online. An explicit `selector.pool` has already pinned `is_eligible`
    /// to one pool, so this tiebreak only applies when the caller didn't ask.
    fn eligible(
        &self,
        request_org: Uuid,
        kind: DispatchKind,
        connector_id: Option<&str>,
        selector: Option<&Selector>,
    ) -> Vec<Arc<Connection>> {
        let mut candidates: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_eligible(request_org, kind, connector_id, selector))
            .map(|entry| entry.value().clone())
            .collect();
        candidates.sort_by_key(|c| c.executor_id);

        let pool_requested = selector.and_then(|s| s.pool.as_deref()).is_some();
        if !pool_requested {
            let managed: Vec<Arc<Connection>> = candidates.iter().filter(|c| c.pool == Pool::Managed).cloned().collect();
            if !managed.is_empty() {
                return managed;
            }
        }
        candidates
    }

    /// Pick one eligible executor for `kind`, or `None` (`NO_ELIGIBLE_EXECUTOR`).
    pub fn select(
        &self,
        strategy: SelectionStrategy,
        request_org: Uuid,
        kind: DispatchKind,
        connector_id: Option<&str>,
        selector: Option<&Selector>,
    ) -> Option<Arc<Connection>> {
        let candidates = self.eligible(request_org, kind, connector_id, selector);
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            SelectionStrategy::LeastInFlight => candidates
                .into_iter()
                .min_by_key(|c| c.in_flight.load(Ordering::Relaxed)),
            SelectionStrategy::RoundRobin => {
                let key = format!("{}:{}", kind_label(kind), selector.and_then(|s| s.group.clone()).unwrap_or_default());
                let counter = self.round_robin.entry(key).or_insert_with(|| AtomicUsize::new(0));
                let idx = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx].clone())
            }
        }
    }

    pub fn register_pending(&self, request_id: Uuid, entry: PendingEntry) {
        self.pending.insert(request_id, entry);
    }

    pub fn take_pending(&self, request_id: Uuid) -> Option<PendingEntry> {
        self.pending.remove(&request_id).map(|(_, v)| v)
    }

    pub fn peek_pending(&self, request_id: Uuid) -> Option<PendingEntry> {
        self.pending.get(&request_id).map(|e| e.clone())
    }

    pub fn store_orphan_result(&self, result: RemoteResult) {
        self.orphan
            .entry(result.request_id)
            .and_modify(|e| e.result = Some(result.clone()))
            .or_insert_with(|| OrphanEntry { result: Some(result), events: Vec::new(), inserted_at: Instant::now() });
    }

    pub fn store_orphan_event(&self, event: RemoteEvent) {
        self.orphan
            .entry(event.request_id)
            .and_modify(|e| e.events.push(event.clone()))
            .or_insert_with(|| OrphanEntry { result: None, events: vec![event], inserted_at: Instant::now() });
    }

    pub fn take_orphan_result(&self, request_id: Uuid) -> Option<RemoteResult> {
        self.orphan.get(&request_id).and_then(|e| e.result.clone())
    }

    /// Drop orphan entries older than [`ORPHAN_TTL`]. Intended to be called
    /// periodically from a background sweep task.
    pub fn sweep_orphans(&self) {
        self.orphan.retain(|_, entry| entry.inserted_at.elapsed() < ORPHAN_TTL);
    }
}
