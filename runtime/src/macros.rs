//! Macros shared by actors built on the runtime.

/// Wait for the first of several futures to complete, then run the matching branch.
///
/// Branches are polled in the order they are written, so when multiple futures are ready at
/// the same logical time the first branch wins. Futures are fused and pinned by the macro.
///
/// # Example
///
/// ```rust
/// use qnet_runtime::{deterministic, select, Clock, Runner};
/// use std::time::Duration;
///
/// let executor = deterministic::Runner::default();
/// executor.start(|context| async move {
///     let winner = select! {
///         _ = context.sleep(Duration::from_secs(1)) => { "short" },
///         _ = context.sleep(Duration::from_secs(2)) => { "long" },
///     };
///     assert_eq!(winner, "short");
/// });
/// ```
#[macro_export]
macro_rules! select {
    ($($pattern:pat = $future:expr => $body:block),+ $(,)?) => {{
        use $crate::futures::FutureExt as _;
        $crate::futures::select_biased! {
            $($pattern = ($future).fuse() => $body,)+
        }
    }};
}
