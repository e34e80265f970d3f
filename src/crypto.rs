//! Process-wide random source.
//!
//! Masking keys and handshake nonces come from one shared generator seeded from the operating
//! system. Its lifetime is reference counted with explicit [`acquire`] and [`release`] calls,
//! every [`PoolManager`] and [`Server`] holds a [`Guard`] for as long as it lives.
//!
//! [`PoolManager`]: crate::client::PoolManager
//! [`Server`]: crate::server::Server
use rand::{RngCore, SeedableRng, rngs::StdRng};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::log::debug;

struct Shared {
    refs: usize,
    rng: StdRng,
}

/// Reference counted generator slot.
struct Source(Mutex<Option<Shared>>);

static STATE: Source = Source::new();

impl Source {
    const fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Shared>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) {
        let mut state = self.lock();
        match &mut *state {
            Some(shared) => shared.refs += 1,
            None => {
                debug!("seeding shared random source");
                *state = Some(Shared { refs: 1, rng: StdRng::from_entropy() });
            }
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        if let Some(shared) = &mut *state {
            shared.refs -= 1;
            if shared.refs == 0 {
                debug!("releasing shared random source");
                *state = None;
            }
        }
    }

    fn references(&self) -> usize {
        self.lock().as_ref().map_or(0, |shared| shared.refs)
    }
}

/// Take a reference on the shared generator, seeding it on first use.
pub fn acquire() {
    STATE.acquire();
}

/// Drop a reference, the generator is discarded with the last one.
pub fn release() {
    STATE.release();
}

/// Returns the number of outstanding references.
pub fn references() -> usize {
    STATE.references()
}

/// Fill `dst` with random bytes.
///
/// Without any outstanding reference the thread local generator is used instead.
pub fn fill_random(dst: &mut [u8]) {
    match &mut *STATE.lock() {
        Some(shared) => shared.rng.fill_bytes(dst),
        None => rand::thread_rng().fill_bytes(dst),
    }
}

/// Fresh masking key for a client frame.
pub fn mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    fill_random(&mut key);
    key
}

/// Holds one reference for its lifetime.
#[derive(Debug)]
pub struct Guard(&'static Source);

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("references", &self.references()).finish()
    }
}

impl Guard {
    pub fn new() -> Self {
        Self::on(&STATE)
    }

    fn on(source: &'static Source) -> Self {
        source.acquire();
        Guard(source)
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_guard_references() {
        static SOURCE: Source = Source::new();
        assert_eq!(SOURCE.references(), 0);

        let first = Guard::on(&SOURCE);
        let second = Guard::on(&SOURCE);
        assert_eq!(SOURCE.references(), 2);
        assert!(SOURCE.lock().is_some());

        drop(first);
        assert_eq!(SOURCE.references(), 1);
        drop(second);
        assert_eq!(SOURCE.references(), 0);
        assert!(SOURCE.lock().is_none(), "generator discarded with the last reference");
    }

    #[test]
    fn test_fill_random() {
        let _guard = Guard::new();
        assert!(references() >= 1);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_random(&mut a);
        fill_random(&mut b);
        assert_ne!(a, b);
    }
}
