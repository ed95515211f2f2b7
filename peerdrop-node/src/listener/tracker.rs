//! Concurrent receive limits for one listener
//!
//! Caps how many inbound transfers a listener runs at once, both in total
//! and per peer IP. A connection over either limit is dropped right after
//! accept; the sender sees the socket close before `ACCEPT`.
//!
//! A limit of 0 means unlimited.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

/// Tracks in-flight receives of one listener
#[derive(Debug)]
pub struct ReceiveTracker {
    counts: Arc<Mutex<Counts>>,
    /// Maximum concurrent receives (0 = unlimited)
    max_total: usize,
    /// Maximum concurrent receives from one IP (0 = unlimited)
    max_per_ip: usize,
}

impl ReceiveTracker {
    #[must_use]
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            counts: Arc::new(Mutex::new(Counts::default())),
            max_total,
            max_per_ip,
        }
    }

    /// Try to take a receive slot for `ip`
    ///
    /// Returns `None` if the listener or the IP is at its limit. The slot is
    /// released when the returned guard drops.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<ReceiveGuard> {
        let mut counts = self.counts.lock().expect("receive tracker lock");

        if self.max_total > 0 && counts.total >= self.max_total {
            return None;
        }

        let count = counts.per_ip.entry(ip).or_insert(0);
        if self.max_per_ip > 0 && *count >= self.max_per_ip {
            return None;
        }

        *count += 1;
        counts.total += 1;
        Some(ReceiveGuard {
            ip,
            counts: self.counts.clone(),
        })
    }

    /// Number of receives currently holding a slot
    pub fn active(&self) -> usize {
        self.counts.lock().expect("receive tracker lock").total
    }
}

/// RAII guard that releases a receive slot when dropped
#[derive(Debug)]
pub struct ReceiveGuard {
    ip: IpAddr,
    counts: Arc<Mutex<Counts>>,
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().expect("receive tracker lock");
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.per_ip.remove(&self.ip);
            }
        }
    }
}
