//! Error formatting helpers shared across Heron crates
//!
//! Errors are structured with fields, and the first failure reported to an
//! operator carries the whole `source()` chain so the root cause is visible
//! without enabling debug logging.

use std::error::Error as StdError;

/// Render an error followed by every error in its `source()` chain.
///
/// Links are joined with `": "`, matching how wrapped errors usually read:
/// `unable to reach agent: transport error: connection refused`.
/// Consecutive duplicates are skipped since some wrappers repeat their
/// source in their own message.
pub fn format_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut last = out.clone();
    let mut current = err.source();
    while let Some(source) = current {
        let msg = source.to_string();
        if !msg.is_empty() && !last.ends_with(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        last = msg;
        current = source.source();
    }
    out
}
