use std::time::Duration;

/// Spin-then-sleep backoff shared by the page-in loop and the LSM
/// write-admission gate.
///
/// Mirrors the pattern used all over the page cache code this crate is
/// grounded on: spin via `yield_now()` while the wait count is small, then
/// fall back to a sleep whose length doubles each round, capped so a single
/// stuck waiter can't sleep forever.
pub struct Backoff {
    max_spin: u64,
    sleep_cap_us: u64,
    wait_cnt: u64,
    pub total_sleep_us: u64,
}

impl Backoff {
    pub fn new(max_spin: u64, sleep_cap_us: u64) -> Self {
        Self {
            max_spin,
            sleep_cap_us,
            wait_cnt: 0,
            total_sleep_us: 0,
        }
    }

    /// The backoff this crate uses for the page-in retry loop: spin up to
    /// 1000 times, then sleep, doubling up to 10ms.
    pub fn page_in() -> Self {
        Self::new(1000, 10_000)
    }

    pub fn step(&mut self) {
        self.wait_cnt += 1;
        if self.wait_cnt < self.max_spin {
            std::thread::yield_now();
            return;
        }
        let sleep_us = self.wait_cnt.min(self.sleep_cap_us);
        std::thread::sleep(Duration::from_micros(sleep_us));
        self.total_sleep_us += sleep_us;
        self.wait_cnt = self.wait_cnt.saturating_mul(2);
    }

    pub fn reset(&mut self) {
        self.wait_cnt = 0;
    }
}

/// Spin on `predicate` with a fixed sleep between attempts, invoking
/// `on_period` every `period` iterations (used by C6's write-admission gate
/// to periodically re-enqueue a chunk switch while it waits).
pub fn spin_until<F, P>(mut predicate: F, period: u64, sleep_us: u64, mut on_period: P)
where
    F: FnMut() -> bool,
    P: FnMut(),
{
    let mut i: u64 = 0;
    loop {
        if predicate() {
            return;
        }
        if i % period == 0 {
            on_period();
        }
        std::thread::sleep(Duration::from_micros(sleep_us));
        i += 1;
    }
}
