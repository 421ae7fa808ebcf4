//! Racing a prober thread against a loader thread on real cores.

use std::sync::{ Condvar, Mutex, PoisonError };
use std::sync::atomic::{ AtomicBool, Ordering };
use crate::access::{ bump, touch, word_of };
use crate::error::Result;
use crate::geometry::VirtAddr;
use crate::locator::{ CorePair, RaceBackend };
use crate::timer;
use crate::util::HostEnv;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// The loader hasn't signalled yet
    Waiting,
    /// The loader is running
    Started,
    /// One of the threads failed to pin
    Aborted,
}

/// Synchronization shared by the two threads in a single race.
///
/// A new handshake is created for every race and dropped afterwards.
/// The prober blocks on the condition variable until the loader has
/// started; the loader busy-polls the "running" flag, since blocking
/// would change the contention we're trying to measure.
#[derive(Debug)]
pub struct Handshake {
    state: Mutex<State>,
    cvar: Condvar,
    running: AtomicBool,
}
impl Handshake {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Waiting),
            cvar: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    fn signal(&self, next: State) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next;
        self.cvar.notify_all();
    }

    /// Called by the loader once it's ready to generate contention.
    pub fn start(&self) {
        self.signal(State::Started);
    }

    /// Called by either thread when it can't continue. Wakes the prober
    /// and stops the loader.
    pub fn abort(&self) {
        self.stop();
        self.signal(State::Aborted);
    }

    /// Block until the loader has started. Returns `false` if the race
    /// was aborted instead.
    pub fn wait_started(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.cvar
            .wait_while(state, |s| *s == State::Waiting)
            .unwrap_or_else(PoisonError::into_inner);
        *state == State::Started
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Tell the loader to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Races two pinned OS threads against each other.
///
/// Only two threads exist at any point, and both are joined before
/// [RaceBackend::race] returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadedRace {
    /// Number of cycles the prober waits after the loader has started
    settle: u64,
}
impl ThreadedRace {
    pub fn new() -> Self { Self { settle: 0 } }

    /// Delay the prober's burst by `cycles` after the handshake, giving
    /// the loader time to warm up.
    pub fn settle(mut self, cycles: u64) -> Self {
        self.settle = cycles;
        self
    }
}

/// Run `prober` and `loader` on two scoped threads sharing a fresh
/// [Handshake].
///
/// The loader is told to stop once the prober has finished, even when the
/// prober panicked; panics are propagated after both threads are joined.
/// The prober returns `None` when the race was aborted, in which case the
/// loader is expected to have returned the error that caused it.
fn contend<T, P, L>(prober: P, loader: L) -> Result<T>
where
    T: Send,
    P: FnOnce(&Handshake) -> Result<Option<T>> + Send,
    L: FnOnce(&Handshake) -> Result<()> + Send,
{
    let handshake = Handshake::new();
    let hs = &handshake;

    std::thread::scope(|s| {
        let loader = s.spawn(move || loader(hs));
        let prober = s.spawn(move || prober(hs));

        let probed = prober.join();
        hs.stop();
        let loaded = loader.join();

        let probed = probed.unwrap_or_else(|e| std::panic::resume_unwind(e));
        let loaded = loaded.unwrap_or_else(|e| std::panic::resume_unwind(e));
        match (probed, loaded) {
            (Err(e), _) | (_, Err(e)) => Err(e),
            (Ok(Some(res)), Ok(())) => Ok(res),
            (Ok(None), Ok(())) => {
                unreachable!("race aborted without a pinning failure")
            },
        }
    })
}

impl RaceBackend for ThreadedRace {
    unsafe fn race(&mut self, addr: VirtAddr, pair: &CorePair, repeat: usize)
        -> Result<u64>
    {
        // Both threads operate on the aligned word containing 'addr'
        let word = word_of(addr.0);
        let settle = self.settle;
        let (prober_core, loader_core) = (pair.prober, pair.loader);

        let prober = move |hs: &Handshake| -> Result<Option<u64>> {
            if let Err(e) = HostEnv::pin_to_core(prober_core) {
                hs.abort();
                return Err(e);
            }
            if !hs.wait_started() {
                return Ok(None);
            }
            timer::wait_cycles(settle);
            let ptr = word as *const u64;
            let elapsed = timer::time(|| {
                for _ in 0..repeat {
                    unsafe { touch(ptr); }
                }
            });
            Ok(Some(elapsed))
        };

        let loader = move |hs: &Handshake| -> Result<()> {
            if let Err(e) = HostEnv::pin_to_core(loader_core) {
                hs.abort();
                return Err(e);
            }
            hs.start();
            let ptr = word as *mut u64;
            while hs.running() {
                unsafe { bump(ptr); }
            }
            Ok(())
        };

        contend(prober, loader)
    }
}
