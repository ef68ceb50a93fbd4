//! NAT mapping table
//!
//! Maps internal (address, port-or-query-id) endpoints to ports on the
//! router's external address. Mappings are keyed by `(type, external port)`
//! with a secondary index on `(type, internal ip, internal port)`. Stream
//! (TCP) mappings own per-peer connection records.
//!
//! All state sits behind one mutex. Public operations and each reaper sweep
//! take it exactly once and never call back into the table while holding it,
//! so there is no nested locking. Lookups hand out cloned snapshots.

use super::port_allocator::PortAllocator;
use crate::protocol::ipv4::Protocol;
use crate::protocol::tcp::TcpFlags;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Translation family of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingType {
    /// Query/response traffic keyed by ICMP echo identifier
    Query,
    /// Connection-oriented traffic keyed by TCP port
    Stream,
}

impl MappingType {
    pub fn from_protocol(protocol: u8) -> Option<Self> {
        match Protocol::from_u8(protocol)? {
            Protocol::Icmp => Some(MappingType::Query),
            Protocol::Tcp => Some(MappingType::Stream),
        }
    }
}

/// Idle timeouts and sweep cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatTimeouts {
    pub query: Duration,
    pub established: Duration,
    pub transitory: Duration,
    pub sweep_interval: Duration,
}

impl Default for NatTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(60),
            established: Duration::from_secs(7440),
            transitory: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake not complete, or closing
    Transitory,
    /// SYN seen in both directions
    Established,
}

/// Which side of the NAT a segment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One flow between a mapping's internal endpoint and an external peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub peer_ip: Ipv4Addr,
    pub peer_port: u16,
    pub status: ConnectionStatus,
    pub last_active: Instant,
    syn_out: bool,
    syn_in: bool,
}

impl Connection {
    fn new(peer_ip: Ipv4Addr, peer_port: u16, now: Instant) -> Self {
        Self {
            peer_ip,
            peer_port,
            status: ConnectionStatus::Transitory,
            last_active: now,
            syn_out: false,
            syn_in: false,
        }
    }

    fn observe(&mut self, flags: TcpFlags, direction: Direction, now: Instant) {
        self.last_active = now;

        if flags.is_closing() {
            self.status = ConnectionStatus::Transitory;
            self.syn_out = false;
            self.syn_in = false;
            return;
        }

        if flags.syn {
            match direction {
                Direction::Outbound => self.syn_out = true,
                Direction::Inbound => self.syn_in = true,
            }
        }
        if self.syn_out && self.syn_in {
            self.status = ConnectionStatus::Established;
        }
    }

    fn idle_limit(&self, timeouts: &NatTimeouts) -> Duration {
        match self.status {
            ConnectionStatus::Established => timeouts.established,
            ConnectionStatus::Transitory => timeouts.transitory,
        }
    }
}

/// Snapshot of a mapping. Later table changes are not reflected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub mapping_type: MappingType,
    pub internal_ip: Ipv4Addr,
    pub internal_port: u16,
    pub external_ip: Ipv4Addr,
    pub external_port: u16,
    pub last_updated: Instant,
    pub created: Instant,
    pub connections: Vec<Connection>,
}

/// Outcome of one reaper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub mappings_evicted: usize,
    pub connections_pruned: usize,
}

type ExternalKey = (MappingType, u16);
type InternalKey = (MappingType, Ipv4Addr, u16);

#[derive(Debug)]
struct NatState {
    mappings: HashMap<ExternalKey, Mapping>,
    by_internal: HashMap<InternalKey, u16>,
    ports: PortAllocator,
    external_ip: Ipv4Addr,
    timeouts: NatTimeouts,
}

impl NatState {
    fn insert(
        &mut self,
        internal_ip: Ipv4Addr,
        internal_port: u16,
        mapping_type: MappingType,
        now: Instant,
    ) -> Result<(Mapping, bool)> {
        if let Some(&port) = self.by_internal.get(&(mapping_type, internal_ip, internal_port))
            && let Some(existing) = self.mappings.get_mut(&(mapping_type, port))
        {
            existing.last_updated = now;
            return Ok((existing.clone(), false));
        }

        let external_port = self.ports.allocate()?;
        let mapping = Mapping {
            mapping_type,
            internal_ip,
            internal_port,
            external_ip: self.external_ip,
            external_port,
            last_updated: now,
            created: now,
            connections: Vec::new(),
        };

        self.by_internal
            .insert((mapping_type, internal_ip, internal_port), external_port);
        self.mappings
            .insert((mapping_type, external_port), mapping.clone());
        Ok((mapping, true))
    }

    fn lookup_external(
        &mut self,
        external_port: u16,
        mapping_type: MappingType,
        now: Instant,
    ) -> Option<Mapping> {
        let mapping = self.mappings.get_mut(&(mapping_type, external_port))?;
        mapping.last_updated = now;
        Some(mapping.clone())
    }

    fn lookup_internal(
        &mut self,
        internal_ip: Ipv4Addr,
        internal_port: u16,
        mapping_type: MappingType,
        now: Instant,
    ) -> Option<Mapping> {
        let port = *self
            .by_internal
            .get(&(mapping_type, internal_ip, internal_port))?;
        self.lookup_external(port, mapping_type, now)
    }

    fn record_tcp(
        &mut self,
        external_port: u16,
        peer_ip: Ipv4Addr,
        peer_port: u16,
        flags: TcpFlags,
        direction: Direction,
        now: Instant,
    ) -> Option<ConnectionStatus> {
        let mapping = self.mappings.get_mut(&(MappingType::Stream, external_port))?;
        mapping.last_updated = now;

        let index = match mapping
            .connections
            .iter()
            .position(|c| c.peer_ip == peer_ip && c.peer_port == peer_port)
        {
            Some(index) => index,
            None => {
                mapping
                    .connections
                    .push(Connection::new(peer_ip, peer_port, now));
                mapping.connections.len() - 1
            }
        };

        let conn = &mut mapping.connections[index];
        conn.observe(flags, direction, now);
        Some(conn.status)
    }

    fn sweep(&mut self, now: Instant) -> SweepStats {
        let timeouts = self.timeouts;
        let mut stats = SweepStats::default();
        let mut expired = Vec::new();

        for (key, mapping) in self.mappings.iter_mut() {
            let evict = match mapping.mapping_type {
                MappingType::Query => {
                    now.saturating_duration_since(mapping.last_updated) > timeouts.query
                }
                MappingType::Stream => {
                    let before = mapping.connections.len();
                    mapping.connections.retain(|c| {
                        now.saturating_duration_since(c.last_active) <= c.idle_limit(&timeouts)
                    });
                    stats.connections_pruned += before - mapping.connections.len();

                    mapping.connections.is_empty()
                        && now.saturating_duration_since(mapping.created)
                            >= timeouts.sweep_interval
                }
            };
            if evict {
                expired.push(*key);
            }
        }

        for key in expired {
            if let Some(mapping) = self.mappings.remove(&key) {
                self.by_internal.remove(&(
                    mapping.mapping_type,
                    mapping.internal_ip,
                    mapping.internal_port,
                ));
                self.ports.release(mapping.external_port);
                stats.mappings_evicted += 1;
                trace!(
                    "NAT: evicted {:?} mapping {}:{} -> {}",
                    mapping.mapping_type,
                    mapping.internal_ip,
                    mapping.internal_port,
                    mapping.external_port
                );
            }
        }

        stats
    }

    fn clear(&mut self) {
        self.mappings.clear();
        self.by_internal.clear();
        self.ports.release_all();
    }
}

/// Shared NAT table with an optional background reaper.
pub struct NatTable {
    state: Arc<Mutex<NatState>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<MetricsRegistry>,
}

impl NatTable {
    pub fn new(
        external_ip: Ipv4Addr,
        timeouts: NatTimeouts,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(NatState {
                mappings: HashMap::new(),
                by_internal: HashMap::new(),
                ports: PortAllocator::new(),
                external_ip,
                timeouts,
            })),
            reaper: Mutex::new(None),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NatState> {
        lock_state(&self.state)
    }

    pub fn external_ip(&self) -> Ipv4Addr {
        self.lock().external_ip
    }

    pub fn timeouts(&self) -> NatTimeouts {
        self.lock().timeouts
    }

    /// Spawn the periodic reaper on the current Tokio runtime.
    ///
    /// Fails with [`Error::Startup`] when called outside a runtime or
    /// when the sweep interval is zero.
    pub fn start_reaper(&self) -> Result<()> {
        let period = self.timeouts().sweep_interval;
        if period.is_zero() {
            return Err(Error::Startup(
                "NAT sweep interval must be greater than zero".into(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Startup(format!("NAT reaper needs a Tokio runtime: {e}")))?;

        let task = runtime.spawn(reap(self.state.clone(), period, self.metrics.clone()));

        let mut slot = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!("NAT reaper started (every {:?})", period);
        Ok(())
    }

    pub fn is_reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Create a mapping for an internal endpoint, allocating an external port.
    ///
    /// An endpoint that already has a mapping of this type gets that mapping back.
    pub fn insert(
        &self,
        internal_ip: Ipv4Addr,
        internal_port: u16,
        mapping_type: MappingType,
    ) -> Result<Mapping> {
        let result = self
            .lock()
            .insert(internal_ip, internal_port, mapping_type, Instant::now());

        match result {
            Ok((mapping, created)) => {
                if created {
                    self.metrics.nat_mappings_created.inc();
                    debug!(
                        "NAT: {:?} {}:{} -> {}:{}",
                        mapping_type,
                        internal_ip,
                        internal_port,
                        mapping.external_ip,
                        mapping.external_port
                    );
                }
                Ok(mapping)
            }
            Err(e) => {
                self.metrics.nat_port_exhausted.inc();
                warn!(
                    "NAT: port pool exhausted, cannot map {:?} {}:{}",
                    mapping_type, internal_ip, internal_port
                );
                Err(e)
            }
        }
    }

    pub fn lookup_external(
        &self,
        external_port: u16,
        mapping_type: MappingType,
    ) -> Option<Mapping> {
        self.lock()
            .lookup_external(external_port, mapping_type, Instant::now())
    }

    /// Whether a mapping owns `external_port`, without refreshing it.
    pub fn contains(&self, external_port: u16, mapping_type: MappingType) -> bool {
        self.lock()
            .mappings
            .contains_key(&(mapping_type, external_port))
    }

    pub fn lookup_internal(
        &self,
        internal_ip: Ipv4Addr,
        internal_port: u16,
        mapping_type: MappingType,
    ) -> Option<Mapping> {
        self.lock()
            .lookup_internal(internal_ip, internal_port, mapping_type, Instant::now())
    }

    /// Account a TCP segment against a stream mapping's connection to `peer`.
    ///
    /// Returns the connection status afterwards, or `None` if no stream
    /// mapping owns `external_port`.
    pub fn record_tcp(
        &self,
        external_port: u16,
        peer_ip: Ipv4Addr,
        peer_port: u16,
        flags: TcpFlags,
        direction: Direction,
    ) -> Option<ConnectionStatus> {
        self.lock().record_tcp(
            external_port,
            peer_ip,
            peer_port,
            flags,
            direction,
            Instant::now(),
        )
    }

    /// Run one reaper pass as of `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepStats {
        let (stats, remaining) = {
            let mut state = self.lock();
            let stats = state.sweep(now);
            (stats, state.mappings.len())
        };
        record_sweep(&self.metrics, stats, remaining);
        stats
    }

    /// Stop the reaper and drop every mapping, connection and port.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.lock().clear();
        self.metrics.set_nat_table_size(0);
        info!("NAT table shut down");
    }

    pub fn len(&self) -> usize {
        self.lock().mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ports_in_use(&self) -> usize {
        self.lock().ports.in_use()
    }
}

impl Drop for NatTable {
    fn drop(&mut self) {
        if let Some(task) = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

fn lock_state(state: &Mutex<NatState>) -> MutexGuard<'_, NatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_sweep(metrics: &MetricsRegistry, stats: SweepStats, remaining: usize) {
    metrics.nat_mappings_evicted.add(stats.mappings_evicted as u64);
    metrics
        .nat_connections_pruned
        .add(stats.connections_pruned as u64);
    metrics.set_nat_table_size(remaining);
    if stats.mappings_evicted > 0 || stats.connections_pruned > 0 {
        debug!(
            "NAT sweep: {} mappings evicted, {} connections pruned, {} live",
            stats.mappings_evicted, stats.connections_pruned, remaining
        );
    }
}

async fn reap(state: Arc<Mutex<NatState>>, period: Duration, metrics: Arc<MetricsRegistry>) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let (stats, remaining) = {
            let mut guard = lock_state(&state);
            let stats = guard.sweep(Instant::now());
            (stats, guard.mappings.len())
        };
        record_sweep(&metrics, stats, remaining);
    }
}
