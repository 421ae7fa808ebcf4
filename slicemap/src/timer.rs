//! Reading the cycle counter.
//!
//! On x86_64 this is `RDTSC` (fenced with `MFENCE; LFENCE` beforehand and
//! `LFENCE` afterwards). On AArch64 this is `CNTVCT_EL0` with an `ISB` on
//! either side. In both cases the read is not reordered against
//! surrounding memory operations.

/// Read the cycle counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn now() -> u64 {
    use core::arch::x86_64::{ _mm_lfence, _mm_mfence, _rdtsc };
    unsafe {
        _mm_mfence();
        _mm_lfence();
        let t = _rdtsc();
        _mm_lfence();
        t
    }
}

/// Read the cycle counter.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn now() -> u64 {
    let t: u64;
    unsafe {
        core::arch::asm!(
            "isb",
            "mrs {t}, cntvct_el0",
            "isb",
            t = out(reg) t,
            options(nostack),
        );
    }
    t
}

/// Start a measurement.
#[inline(always)]
pub fn start() -> u64 { now() }

/// Stop a measurement.
#[inline(always)]
pub fn stop() -> u64 { now() }

/// Cycles between two counter reads.
///
/// Callers are expected to pass `start` and `end` in program order; the
/// counter is wide enough that wraparound isn't a concern.
#[inline(always)]
pub fn elapsed(start: u64, end: u64) -> u64 {
    debug_assert!(end >= start, "{}-{}", end, start);
    end.wrapping_sub(start)
}

/// Busy-poll the counter until at least `delay` cycles have passed.
///
/// This never yields to the scheduler.
#[inline(always)]
pub fn wait_cycles(delay: u64) {
    let end = now().saturating_add(delay);
    while now() < end {}
}

/// Measure the number of cycles spent in `f`.
#[inline(always)]
pub fn time<F: FnOnce()>(f: F) -> u64 {
    let t0 = start();
    f();
    let t1 = stop();
    elapsed(t0, t1)
}
