//! Static matcher for the begin/plain/end operation naming convention.
//!
//! [`partition_operations`] is a pure function from a set of declared
//! operation names to the confirmed [`OperationTriad`] records plus the
//! remainder of plain passthrough names. It is computed once per adapted
//! object; nothing here touches a live service.

use std::collections::BTreeSet;

/// Prefix marking the asynchronous send-phase variant of an operation.
pub const BEGIN_PREFIX: &str = "begin_";

/// Prefix marking the polling completion variant of an operation.
pub const END_PREFIX: &str = "end_";

/// The three related names of one logical asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperationTriad {
    /// `begin_`-prefixed send-phase name.
    pub begin: String,
    /// Plain name the adapter registers the awaitable under.
    pub plain: String,
    /// `end_`-prefixed polling name (never called by the adapter).
    pub end: String,
}

impl OperationTriad {
    /// Derive the full triad from a plain operation name.
    pub fn from_plain(plain: &str) -> Self {
        Self {
            begin: format!("{}{}", BEGIN_PREFIX, plain),
            plain: plain.to_string(),
            end: format!("{}{}", END_PREFIX, plain),
        }
    }
}

/// Result of partitioning an operation-name set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPartition {
    /// Confirmed triads, ordered by plain name.
    pub triads: Vec<OperationTriad>,
    /// Names left over for direct passthrough, sorted.
    pub passthrough: Vec<String>,
}

/// Partition declared operation names into triads and passthroughs.
///
/// Names with the internal `_` prefix are excluded up front. A triad is
/// confirmed only when its begin, plain, and end names all appear in the
/// input; a `begin_` name missing either counterpart stays an ordinary
/// passthrough. Triads are confirmed against the full input set, so a plain
/// name that itself starts with `begin_` partitions deterministically
/// instead of shadowing its neighbors.
pub fn partition_operations<I, S>(names: I) -> OperationPartition
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let visible: BTreeSet<String> = names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .filter(|n| !n.starts_with('_'))
        .collect();

    let mut triads = Vec::new();
    let mut consumed: BTreeSet<String> = BTreeSet::new();

    for name in &visible {
        let Some(plain) = name.strip_prefix(BEGIN_PREFIX) else {
            continue;
        };
        if plain.is_empty() {
            continue;
        }
        let end = format!("{}{}", END_PREFIX, plain);
        if visible.contains(plain) && visible.contains(&end) {
            consumed.insert(name.clone());
            consumed.insert(plain.to_string());
            consumed.insert(end.clone());
            triads.push(OperationTriad {
                begin: name.clone(),
                plain: plain.to_string(),
                end,
            });
        }
    }

    triads.sort_by(|a, b| a.plain.cmp(&b.plain));
    let passthrough = visible
        .into_iter()
        .filter(|n| !consumed.contains(n))
        .collect();

    OperationPartition {
        triads,
        passthrough,
    }
}
