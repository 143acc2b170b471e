//! Call counts, wall time and flop estimates per preconditioner phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// `f64` stored as its bit pattern.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, v: f64) {
        // single writer per phase, a load/store pair is enough
        self.set(self.get() + v);
    }
}

/// Counter for one phase. Interior mutability lets `&self` methods
/// (e.g. `apply_inverse`) record their work.
#[derive(Debug, Default)]
pub struct PhaseCounter {
    count: AtomicUsize,
    seconds: AtomicF64,
    flops: AtomicF64,
}

impl PhaseCounter {
    /// Start timing; the returned guard records the call when dropped.
    pub fn start(&self) -> PhaseTimer<'_> {
        PhaseTimer { counter: self, started: Instant::now() }
    }

    pub fn add_flops(&self, flops: f64) {
        self.flops.add(flops);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn seconds(&self) -> f64 {
        self.seconds.get()
    }

    pub fn flops(&self) -> f64 {
        self.flops.get()
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.seconds.set(0.0);
        self.flops.set(0.0);
    }
}

/// Guard returned by [`PhaseCounter::start`].
pub struct PhaseTimer<'a> {
    counter: &'a PhaseCounter,
    started: Instant,
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        let c = self.counter;
        c.count.fetch_add(1, Ordering::Relaxed);
        c.seconds.add(self.started.elapsed().as_secs_f64());
    }
}

/// Counters of the three phases of a preconditioner.
#[derive(Debug, Default)]
pub struct Counters {
    pub initialize: PhaseCounter,
    pub compute: PhaseCounter,
    pub apply_inverse: PhaseCounter,
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, c) in [("Initialize", &self.initialize), ("Compute", &self.compute), ("ApplyInverse", &self.apply_inverse)] {
            writeln!(f, "  {name:<13} {:>6} calls {:>12.4e} s {:>12.4e} flops", c.count(), c.seconds(), c.flops())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_guard_counts_calls() {
        let c = PhaseCounter::default();
        {
            let _t = c.start();
            c.add_flops(10.0);
        }
        let _t = c.start();
        drop(_t);
        assert_eq!(c.count(), 2);
        assert_eq!(c.flops(), 10.0);
        assert!(c.seconds() >= 0.0);
        c.reset();
        assert_eq!(c.count(), 0);
    }
}
