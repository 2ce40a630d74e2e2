//! Run a whole group inside one process, one thread per rank.
//!
//! Used by the test suite and by the demo programs' `--local` mode.
//!
//! ```
//! let sums = smpi::local::launch(3, |ctx| {
//!     let world = ctx.world();
//!     world.reduce_value(0, world.rank() + 1, smpi::ReduceOp::Sum).unwrap()
//! });
//! assert_eq!(sums, vec![Some(6), None, None]);
//! ```
use std::panic;
use std::thread;
use log::debug;
use smpi_p2p_node::NodeP2P;
use crate::Context;

/// Start `size` ranks, run `f` on each with its own context and return the
/// results in rank order.
///
/// A rank that returns or panics closes its links, so peers still waiting
/// on it fail with `NoMatch` instead of hanging. A panic in any rank is
/// re-raised once every rank has finished.
pub fn launch<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(Context) -> R + Sync,
    R: Send,
{
    let _ = env_logger::builder().is_test(true).try_init();
    debug!("launching {} local ranks", size);
    let providers = NodeP2P::group(size);
    let f = &f;
    thread::scope(|s| {
        let ranks: Vec<_> = providers
            .into_iter()
            .map(|provider| s.spawn(move || f(Context::new(Box::new(provider)))))
            .collect();
        let results: Vec<thread::Result<R>> = ranks.into_iter().map(|rank| rank.join()).collect();
        results
            .into_iter()
            .map(|result| result.unwrap_or_else(|err| panic::resume_unwind(err)))
            .collect()
    })
}
