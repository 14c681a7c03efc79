//! The optimization pass pipeline.
//!
//! A fixed, ordered sequence of pure graph-to-graph rewrites over one
//! [`Function`](crate::Function). Each pass reports whether it changed the
//! graph; the pipeline as a whole is idempotent: running it twice never
//! changes program semantics, only (possibly) the amount of cleanup achieved.
//! Passes never observe the translation cache.

pub mod passes;

use crate::function::{Function, HirError};

/// Run the full pipeline once: fold constants, tunnel moves, simplify,
/// then eliminate dead instructions to a fixpoint.
pub fn optimize(func: &mut Function) -> Result<bool, HirError> {
    let mut changed = false;
    changed |= passes::constant_folding::run(func)?;
    changed |= passes::mov_tunneling::run(func)?;
    changed |= passes::simplify::run(func)?;
    changed |= passes::dce::run(func)?;
    debug_assert_eq!(func.check_consistency(), Ok(()));
    Ok(changed)
}
