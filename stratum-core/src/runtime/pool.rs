//! Bounded free-list of reusable evaluators, internally synchronized and
//! non-blocking: when the free list is empty a fresh evaluator is minted
//! even past the nominal size, and discarded on return rather than kept if
//! the list is already full. Evaluation itself is stateless (see
//! [`crate::runtime::eval`]) — this pool only bounds steady-state memory,
//! never backpressure.

use std::sync::Mutex;

/// Default pool size. A soft target for the free list's steady-state size,
/// not a hard ceiling — bursts mint beyond it and shed back down to it.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// A reusable evaluator slot. Holds no state today beyond an identity used
/// for tests; reserved for caching compiled expressions in a later pass.
#[derive(Debug)]
pub struct Evaluator {
    id: usize,
}

impl Evaluator {
    fn new(id: usize) -> Self {
        Evaluator { id }
    }

    /// Clears any per-render state before the evaluator is handed to the
    /// next caller. A no-op today since `Evaluator` carries none, but kept
    /// as an explicit step so future caches (e.g. a parsed-expression
    /// memo) have one place to invalidate.
    fn reset(&mut self) {}

    pub fn id(&self) -> usize {
        self.id
    }
}

struct Inner {
    free: Vec<Evaluator>,
    next_id: usize,
}

pub struct Pool {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl Pool {
    pub fn new(max_size: usize) -> Self {
        Pool {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner { free: Vec::new(), next_id: 0 }),
        }
    }

    /// Never blocks: reuses a free evaluator if one exists, otherwise mints
    /// a fresh one regardless of `max_size`.
    pub fn acquire(&self) -> PooledEvaluator<'_> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let ev = match inner.free.pop() {
            Some(mut ev) => {
                ev.reset();
                ev
            }
            None => {
                inner.next_id += 1;
                Evaluator::new(inner.next_id)
            }
        };
        PooledEvaluator { pool: self, evaluator: Some(ev) }
    }

    /// Discards the evaluator instead of keeping it if the free list is
    /// already at `max_size` — bursts above capacity shed back down rather
    /// than growing the list unbounded.
    fn release(&self, evaluator: Evaluator) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if inner.free.len() < self.max_size {
            inner.free.push(evaluator);
        }
    }
}

/// RAII handle returned by [`Pool::acquire`]; returns its evaluator to the
/// pool's free list on drop.
pub struct PooledEvaluator<'a> {
    pool: &'a Pool,
    evaluator: Option<Evaluator>,
}

impl<'a> Drop for PooledEvaluator<'a> {
    fn drop(&mut self) {
        if let Some(ev) = self.evaluator.take() {
            self.pool.release(ev);
        }
    }
}

impl<'a> std::ops::Deref for PooledEvaluator<'a> {
    type Target = Evaluator;

    fn deref(&self) -> &Evaluator {
        self.evaluator.as_ref().expect("evaluator taken before drop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_a_released_evaluator_instead_of_minting_a_new_one() {
        let pool = Pool::new(2);
        let a = pool.acquire();
        let first_id = a.id();
        drop(a);
        let b = pool.acquire();
        assert_eq!(b.id(), first_id);
    }

    #[test]
    fn never_blocks_past_max_size() {
        let pool = Pool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn sheds_evaluators_beyond_max_size_on_release() {
        let pool = Pool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        let c = pool.acquire();
        // only one of the two released evaluators survives in the free list
        assert!(c.id() == 1 || c.id() == 2);
    }
}
