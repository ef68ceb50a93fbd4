//! ARP cache (IP to MAC mapping) and pending resolution requests

use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// A frame waiting for its next hop to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    /// Ready-to-send frame; only the destination MAC is still unset
    pub frame: Vec<u8>,
    /// Interface the frame leaves on once resolved
    pub egress: String,
    /// Interface the packet arrived on
    pub ingress: String,
    /// The frame as received, quoted if resolution fails
    pub original: Vec<u8>,
}

/// Outcome of queueing a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub ip: Ipv4Addr,
    /// Interface the ARP request goes out of
    pub interface: String,
    /// First frame for this IP: a request has to be broadcast now
    pub send_request: bool,
    pub queued: usize,
}

/// Work produced by a cache sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpEvent {
    /// Broadcast another request for `ip`
    Resend { ip: Ipv4Addr, interface: String },
    /// Retries exhausted; the queued frames are handed back
    GiveUp {
        ip: Ipv4Addr,
        interface: String,
        frames: Vec<QueuedFrame>,
    },
}

/// The ARP cache contract the forwarding path depends on
pub trait ArpCache {
    fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr>;

    fn contains(&self, ip: Ipv4Addr) -> bool {
        self.lookup(ip).is_some()
    }

    /// Record a binding and release any frames waiting on it.
    fn insert(&mut self, mac: MacAddr, ip: Ipv4Addr) -> Vec<QueuedFrame>;

    /// Park `frame` until `ip` resolves on `interface`.
    fn queue(&mut self, ip: Ipv4Addr, frame: QueuedFrame, interface: &str) -> PendingRequest;

    /// Expire entries and drive request retries.
    fn sweep(&mut self, now: Instant) -> Vec<ArpEvent>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Retry and aging policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpTimers {
    pub cache_timeout: Duration,
    pub request_interval: Duration,
    pub max_requests: u32,
}

impl Default for ArpTimers {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_secs(15),
            request_interval: Duration::from_secs(1),
            max_requests: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct ArpEntry {
    mac: MacAddr,
    added: Instant,
}

#[derive(Debug)]
struct Request {
    interface: String,
    times_sent: u32,
    last_sent: Instant,
    frames: Vec<QueuedFrame>,
}

/// In-memory ARP cache
#[derive(Debug, Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    requests: HashMap<Ipv4Addr, Request>,
    timers: ArpTimers,
}

impl ArpTable {
    pub fn new(timers: ArpTimers) -> Self {
        Self {
            entries: HashMap::new(),
            requests: HashMap::new(),
            timers,
        }
    }

    pub fn timers(&self) -> ArpTimers {
        self.timers
    }

    /// Number of IPs with frames waiting
    pub fn pending_len(&self) -> usize {
        self.requests.len()
    }

    fn queue_at(
        &mut self,
        ip: Ipv4Addr,
        frame: QueuedFrame,
        interface: &str,
        now: Instant,
    ) -> PendingRequest {
        let mut send_request = false;
        let request = self.requests.entry(ip).or_insert_with(|| {
            send_request = true;
            Request {
                interface: interface.to_string(),
                times_sent: 1,
                last_sent: now,
                frames: Vec::new(),
            }
        });
        request.frames.push(frame);

        PendingRequest {
            ip,
            interface: request.interface.clone(),
            send_request,
            queued: request.frames.len(),
        }
    }
}

impl ArpCache for ArpTable {
    fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).map(|e| e.mac)
    }

    fn insert(&mut self, mac: MacAddr, ip: Ipv4Addr) -> Vec<QueuedFrame> {
        self.entries.insert(
            ip,
            ArpEntry {
                mac,
                added: Instant::now(),
            },
        );
        self.requests
            .remove(&ip)
            .map(|r| r.frames)
            .unwrap_or_default()
    }

    fn queue(&mut self, ip: Ipv4Addr, frame: QueuedFrame, interface: &str) -> PendingRequest {
        self.queue_at(ip, frame, interface, Instant::now())
    }

    fn sweep(&mut self, now: Instant) -> Vec<ArpEvent> {
        let timeout = self.timers.cache_timeout;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.added) < timeout);

        let mut events = Vec::new();
        let mut exhausted = Vec::new();

        for (ip, request) in self.requests.iter_mut() {
            if now.saturating_duration_since(request.last_sent) < self.timers.request_interval {
                continue;
            }
            if request.times_sent >= self.timers.max_requests {
                exhausted.push(*ip);
            } else {
                request.times_sent += 1;
                request.last_sent = now;
                events.push(ArpEvent::Resend {
                    ip: *ip,
                    interface: request.interface.clone(),
                });
            }
        }

        for ip in exhausted {
            if let Some(request) = self.requests.remove(&ip) {
                events.push(ArpEvent::GiveUp {
                    ip,
                    interface: request.interface,
                    frames: request.frames,
                });
            }
        }

        events
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 100);
    const MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn make_frame(tag: u8) -> QueuedFrame {
        QueuedFrame {
            frame: vec![tag; 20],
            egress: "eth1".into(),
            ingress: "eth2".into(),
            original: vec![tag; 20],
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = ArpTable::default();
        assert!(table.lookup(HOP).is_none());

        assert!(table.insert(MAC, HOP).is_empty());
        assert_eq!(table.lookup(HOP), Some(MAC));
        assert!(table.contains(HOP));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_queue_then_resolve() {
        let mut table = ArpTable::default();

        let first = table.queue(HOP, make_frame(1), "eth1");
        assert!(first.send_request);
        assert_eq!(first.interface, "eth1");

        let second = table.queue(HOP, make_frame(2), "eth1");
        assert!(!second.send_request);
        assert_eq!(second.queued, 2);

        let released = table.insert(MAC, HOP);
        assert_eq!(released, vec![make_frame(1), make_frame(2)]);
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_retry_then_give_up() {
        let mut table = ArpTable::default();
        let start = Instant::now();
        table.queue_at(HOP, make_frame(7), "eth1", start);

        // Too early for a resend
        assert!(table.sweep(start + Duration::from_millis(500)).is_empty());

        for n in 1..5u64 {
            let events = table.sweep(start + Duration::from_secs(n));
            assert_eq!(
                events,
                vec![ArpEvent::Resend {
                    ip: HOP,
                    interface: "eth1".into()
                }]
            );
        }

        let events = table.sweep(start + Duration::from_secs(5));
        match events.as_slice() {
            [ArpEvent::GiveUp { ip, frames, .. }] => {
                assert_eq!(*ip, HOP);
                assert_eq!(frames, &vec![make_frame(7)]);
            }
            other => panic!("expected give-up, got {:?}", other),
        }
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_entries_expire() {
        let mut table = ArpTable::new(ArpTimers {
            cache_timeout: Duration::from_secs(15),
            ..ArpTimers::default()
        });
        table.insert(MAC, HOP);

        table.sweep(Instant::now() + Duration::from_secs(14));
        assert!(table.contains(HOP));

        table.sweep(Instant::now() + Duration::from_secs(16));
        assert!(!table.contains(HOP));
    }
}
