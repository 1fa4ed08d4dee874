//! Coarse-grained inactivity timeout tracking for the flow table.
//!
//! A classic timer wheel: connections are inserted into the bucket they're due to expire in, and
//! each tick advances through buckets whose time has passed, re-inserting anything that turned out
//! to still be alive.

use super::conn_id::ConnId;
use super::flow::Flow;

use crossbeam::channel::{tick, Receiver};
use hashlink::linked_hash_map::{LinkedHashMap, RawEntryMut};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub(crate) struct TimerWheel {
    /// Period to check for inactive connections.
    period: Duration,
    start_ts: Instant,
    ticker: Receiver<Instant>,
    next_bucket: usize,
    timers: Vec<VecDeque<ConnId>>,
}

impl TimerWheel {
    pub(crate) fn new(max_timeout: Duration, timeout_resolution: Duration) -> Self {
        assert!(
            timeout_resolution <= max_timeout,
            "timeout check period must be smaller than the maximum inactivity timeout"
        );
        let nb_buckets = (max_timeout.as_millis() / timeout_resolution.as_millis().max(1)) as usize;
        TimerWheel {
            period: timeout_resolution,
            start_ts: Instant::now(),
            ticker: tick(timeout_resolution),
            next_bucket: 0,
            timers: vec![VecDeque::new(); nb_buckets.max(1)],
        }
    }

    pub(crate) fn insert(&mut self, conn_id: &ConnId, last_seen: Instant, inactivity_window: Duration) {
        let current_ms = (last_seen - self.start_ts).as_millis() as usize;
        let period_ms = self.period.as_millis().max(1) as usize;
        let timer_index = (current_ms + inactivity_window.as_millis() as usize) / period_ms
            % self.timers.len();
        self.timers[timer_index].push_back(conn_id.clone());
    }

    /// Called once per processing loop iteration; does nothing unless the tick period has
    /// elapsed. Returns the number of connections terminated for inactivity.
    pub(crate) fn check_inactive(
        &mut self,
        table: &mut LinkedHashMap<ConnId, Flow>,
        on_expire: &mut dyn FnMut(Flow),
    ) -> usize {
        if let Ok(now) = self.ticker.try_recv() {
            self.remove_inactive(now, table, on_expire)
        } else {
            0
        }
    }

    fn remove_inactive(
        &mut self,
        now: Instant,
        table: &mut LinkedHashMap<ConnId, Flow>,
        on_expire: &mut dyn FnMut(Flow),
    ) -> usize {
        let period_ms = self.period.as_millis().max(1) as usize;
        let nb_buckets = self.timers.len();
        let check_time = ((now - self.start_ts).as_millis() as usize / period_ms) * period_ms;
        let last_expire_bucket = check_time / period_ms;

        let mut not_expired = Vec::new();
        let mut expired = 0;
        for bucket in self.next_bucket..last_expire_bucket {
            let list = &mut self.timers[bucket % nb_buckets];
            for conn_id in list.drain(..) {
                if let RawEntryMut::Occupied(occupied) = table.raw_entry_mut().from_key(&conn_id) {
                    let flow = occupied.get();
                    let last_seen_ms = (flow.last_seen - self.start_ts).as_millis() as usize;
                    let expire_time = last_seen_ms + flow.inactivity_window.as_millis() as usize;
                    if expire_time < check_time {
                        expired += 1;
                        let (_, flow) = occupied.remove_entry();
                        on_expire(flow);
                    } else {
                        let timer_index = (expire_time / period_ms) % nb_buckets;
                        not_expired.push((timer_index, conn_id));
                    }
                }
            }
            for (timer_index, conn_id) in not_expired.drain(..) {
                self.timers[timer_index].push_back(conn_id);
            }
        }
        self.next_bucket = last_expire_bucket;
        expired
    }
}
