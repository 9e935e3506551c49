//! Kernel time accounting
//!
//! A process-wide microsecond counter fed by the HSA completion reapers and
//! the CUDA event timing. `kf_get_kernel_time` reads it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static KERNEL_TIME_US: AtomicU64 = AtomicU64::new(0);

/// Add one kernel's execution time to the accumulator.
pub fn add_micros(us: u64) {
    KERNEL_TIME_US.fetch_add(us, Ordering::Relaxed);
}

/// Total accumulated kernel time in microseconds.
pub fn total_micros() -> u64 {
    KERNEL_TIME_US.load(Ordering::Relaxed)
}

/// Reset the accumulator. Test support.
pub fn reset() {
    KERNEL_TIME_US.store(0, Ordering::Relaxed);
}

/// Wall-clock time in microseconds since the Unix epoch.
pub fn micro_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn accumulates_across_samples() {
        reset();
        add_micros(120);
        add_micros(80);
        assert_eq!(total_micros(), 200);
        reset();
        assert_eq!(total_micros(), 0);
    }

    #[test]
    #[serial]
    fn concurrent_updates_are_not_lost() {
        reset();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..100 {
                        add_micros(1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(total_micros(), 800);
        reset();
    }

    #[test]
    fn micro_time_is_monotonic_enough() {
        let a = micro_time();
        let b = micro_time();
        assert!(b >= a);
    }
}
