//! Combines condition results under a rule's match mode.

use crate::rules::types::MatchMode;

/// Combine lazily produced condition results.
///
/// Stops pulling results as soon as the outcome is decided: at the first
/// `false` for `All`, at the first `true` for `Any`. An empty sequence is
/// `true` under `All` and `false` under `Any`.
pub fn combine<I>(mode: MatchMode, results: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    let mut results = results.into_iter();
    match mode {
        MatchMode::All => results.all(|r| r),
        MatchMode::Any => results.any(|r| r),
    }
}
