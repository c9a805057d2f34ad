//! Filter Engine
//!
//! Drives the `hidden` flag of records from a filter expression. Records are
//! never removed or reordered; a tree rebuild makes the result visible.

mod expr;

pub use expr::{wildcard_match, CompareOp, FilterExpr};

use crate::error::DirectoryError;
use crate::store::{keys, RecordStore};
use tracing::debug;

/// Properties searched by free-text quick filtering.
const QUICK_FILTER_KEYS: [&str; 4] = [keys::ID, keys::TITLE, keys::DESCRIPTION, keys::CATEGORY];

/// Result of applying a filter to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Expression actually evaluated.
    pub expression: String,
    pub matched: usize,
    pub hidden: usize,
}

/// Evaluate `expression` over the store and set every record's hidden flag.
///
/// A parse error leaves all flags untouched.
pub fn apply_filter(
    store: &mut RecordStore,
    expression: &str,
) -> Result<FilterOutcome, DirectoryError> {
    let expr = FilterExpr::parse(expression)?;
    let visible = store.scan(&expr);
    let hidden = store.set_hidden_except(&visible);
    debug!(
        expression,
        matched = visible.len(),
        hidden,
        "Applied filter expression"
    );
    Ok(FilterOutcome {
        expression: expression.to_string(),
        matched: visible.len(),
        hidden,
    })
}

/// Make every record visible again.
pub fn clear_filter(store: &mut RecordStore) {
    store.clear_hidden();
}

/// Translate free text into a filter expression.
///
/// Text that already parses as a single comparison (`bib_year>2010`) is used
/// as-is. Otherwise comma-separated words become an OR of substring matches.
pub fn quick_filter_expression(text: &str) -> String {
    let text = text.trim();
    if text.contains(['=', '<', '>']) {
        if let Ok(expr) = FilterExpr::parse(text) {
            if expr.is_comparison() {
                return text.to_string();
            }
        }
    }
    let key_list = QUICK_FILTER_KEYS.join(",");
    text.split(',')
        .map(|w| w.trim().replace(['"', '*'], ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("{}=\"*{}*\"", key_list, w))
        .collect::<Vec<_>>()
        .join(" || ")
}

/// Apply a free-text filter. Empty text clears the filter.
pub fn quick_filter(
    store: &mut RecordStore,
    text: &str,
) -> Result<FilterOutcome, DirectoryError> {
    let expression = quick_filter_expression(text);
    if expression.is_empty() {
        clear_filter(store);
        return Ok(FilterOutcome {
            expression,
            matched: store.len(),
            hidden: 0,
        });
    }
    apply_filter(store, &expression)
}
