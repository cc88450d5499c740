//! the parallel engine. A single `parallel_for(begin, end, grain, f)`
//! entry point, backed by `rayon`'s work-stealing pool, with the nesting
//! and thread-identity rules the rest of the engine depends on:
//! nested calls collapse to the calling thread, and the calling thread
//! always participates in the split rather than merely waiting.

use std::cell::Cell;
use std::sync::{Mutex, OnceLock};

use crate::error::GPResult;

thread_local! {
    static IN_PARALLEL_REGION: Cell<bool> = Cell::new(false);
    static THREAD_ID: Cell<i32> = Cell::new(-1);
}

static NUM_THREADS: OnceLock<Mutex<usize>> = OnceLock::new();
static INTEROP_POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();

fn num_threads_cell() -> &'static Mutex<usize> {
    NUM_THREADS.get_or_init(|| Mutex::new(rayon::current_num_threads().max(1)))
}

pub fn get_num_threads() -> usize {
    *num_threads_cell().lock().unwrap()
}

pub fn set_num_threads(n: usize) {
    *num_threads_cell().lock().unwrap() = n.max(1);
}

pub fn init_num_threads() {
    let _ = get_num_threads();
}

pub fn in_parallel_region() -> bool {
    IN_PARALLEL_REGION.with(|c| c.get())
}

pub fn get_thread_num() -> i32 {
    THREAD_ID.with(|c| c.get())
}

/// RAII save/restore of the current thread's logical id, used when handing
/// work to a specific worker slot.
pub struct ThreadIdGuard {
    previous: i32,
}

impl ThreadIdGuard {
    pub fn new(id: i32) -> ThreadIdGuard {
        let previous = THREAD_ID.with(|c| c.replace(id));
        ThreadIdGuard { previous }
    }
}

impl Drop for ThreadIdGuard {
    fn drop(&mut self) {
        THREAD_ID.with(|c| c.set(self.previous));
    }
}

fn divup(x: i64, y: i64) -> i64 {
    (x + y - 1) / y
}

/// Splits `[begin, end)` into chunks of at least `grain_size` and runs `f`
/// on each chunk, possibly concurrently. A call made while already inside
/// a parallel region, or spanning fewer than `grain_size` elements, runs
/// `f` directly on the calling thread instead of spawning further work.
pub fn parallel_for<F>(begin: i64, end: i64, grain_size: i64, f: F) -> GPResult<()>
where
    F: Fn(i64, i64) -> GPResult<()> + Sync,
{
    if end <= begin {
        return Ok(());
    }
    let grain_size = grain_size.max(1);
    if in_parallel_region() || (end - begin) <= grain_size {
        return f(begin, end);
    }

    let num_chunks = divup(end - begin, grain_size).min(get_num_threads() as i64).max(1);
    let chunk_size = divup(end - begin, num_chunks);

    let mut chunks = Vec::with_capacity(num_chunks as usize);
    let mut chunk_begin = begin;
    while chunk_begin < end {
        let chunk_end = (chunk_begin + chunk_size).min(end);
        chunks.push((chunk_begin, chunk_end));
        chunk_begin = chunk_end;
    }

    // The calling thread drains the last chunk itself instead of waiting
    // idle on the pool; only the remaining chunks are handed to rayon.
    let (own_chunk, spawned_chunks) = chunks.split_last().expect("end > begin implies >=1 chunk");

    let first_error: Mutex<Option<crate::error::GPError>> = Mutex::new(None);
    rayon::scope(|scope| {
        for &(chunk_begin, chunk_end) in spawned_chunks {
            let f = &f;
            let first_error = &first_error;
            scope.spawn(move |_| {
                IN_PARALLEL_REGION.with(|c| c.set(true));
                if let Err(e) = f(chunk_begin, chunk_end) {
                    let mut slot = first_error.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
                IN_PARALLEL_REGION.with(|c| c.set(false));
            });
        }

        let (own_begin, own_end) = *own_chunk;
        let was_in_region = in_parallel_region();
        IN_PARALLEL_REGION.with(|c| c.set(true));
        if let Err(e) = f(own_begin, own_end) {
            let mut slot = first_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(e);
            }
        }
        IN_PARALLEL_REGION.with(|c| c.set(was_in_region));
    });

    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs `f` on a pool distinct from the intra-op pool `parallel_for` uses,
/// for background work that shouldn't compete with kernel execution.
pub fn intraop_launch<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let pool = INTEROP_POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .thread_name(|i| format!("nnlite-interop-{i}"))
            .build()
            .expect("interop pool builds")
    });
    pool.spawn(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn visits_every_index_exactly_once() {
        let seen = (0..1000).map(|_| AtomicI64::new(0)).collect::<Vec<_>>();
        parallel_for(0, 1000, 16, |b, e| {
            for i in b..e {
                seen[i as usize].fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();
        assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn nested_call_collapses_to_caller() {
        parallel_for(0, 100, 1, |begin, end| {
            assert!(in_parallel_region());
            // A nested call inside an active parallel region must run
            // directly on the calling thread rather than re-splitting.
            parallel_for(begin, end, 1, |b, e| {
                assert_eq!((b, e), (begin, end));
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn error_propagates_out() {
        let res = parallel_for(0, 1000, 16, |_, _| {
            Err(crate::error::GPError::RuntimeKernelError("boom".into()))
        });
        assert!(res.is_err());
    }
}
