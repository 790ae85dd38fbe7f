//! Bounded parallel maps over slices.
//!
//! Wraps rayon's `par_iter` so that at most `max_in_flight` items are being
//! processed at once (each item may itself hold large buffers), while keeping
//! results in input order.

use rayon::prelude::*;

/// Resolves a requested in-flight limit. `0` means one item per rayon thread.
pub fn in_flight_limit(requested: usize) -> usize {
    if requested == 0 {
        rayon::current_num_threads().max(1)
    } else {
        requested
    }
}

/// Maps `f` over `items` in parallel with at most `max_in_flight` items in flight.
///
/// Results keep the order of `items`. Processing stops after the first window
/// that contains a failure, and the error of the earliest failing item in
/// input order is returned, so the reported error does not depend on thread
/// scheduling.
pub fn try_par_map_bounded<T, R, E, F>(
    items: &[T],
    max_in_flight: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync,
{
    let window = in_flight_limit(max_in_flight);

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(window) {
        let outcomes: Vec<Result<R, E>> = chunk.par_iter().map(&f).collect();
        for outcome in outcomes {
            results.push(outcome?);
        }
    }
    Ok(results)
}
