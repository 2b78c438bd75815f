//! Majority-vote name resolution over a boolean match list.

use crate::types::DescriptorRecord;

/// Resolve a recognized name from order-aligned match flags.
///
/// Every enrolled record flagged as matching casts one vote for its name;
/// the name with the most votes wins. Ties break toward the name whose first
/// record was enrolled earliest: tallies are accumulated in store order and
/// only a strictly greater count displaces the current best. Returns `None`
/// when no record matched (an unknown face).
pub fn resolve_name(records: &[DescriptorRecord], flags: &[bool]) -> Option<String> {
    let mut tallies: Vec<(&str, usize)> = Vec::new();

    for (record, &hit) in records.iter().zip(flags.iter()) {
        if !hit {
            continue;
        }
        match tallies.iter_mut().find(|(name, _)| *name == record.name) {
            Some((_, count)) => *count += 1,
            None => tallies.push((record.name.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (name, count) in tallies {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((name, count));
        }
    }

    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Descriptor;

    fn record(name: &str) -> DescriptorRecord {
        DescriptorRecord {
            name: name.into(),
            descriptor: Descriptor { values: vec![0.0] },
        }
    }

    #[test]
    fn test_no_matches_is_unknown() {
        let records = vec![record("alice"), record("bob")];
        assert_eq!(resolve_name(&records, &[false, false]), None);
    }

    #[test]
    fn test_single_match() {
        let records = vec![record("alice"), record("bob")];
        assert_eq!(resolve_name(&records, &[false, true]), Some("bob".into()));
    }

    #[test]
    fn test_majority_wins() {
        let records = vec![
            record("alice"),
            record("bob"),
            record("alice"),
            record("alice"),
        ];
        let resolved = resolve_name(&records, &[true, true, false, true]);
        assert_eq!(resolved, Some("alice".into()));
    }

    #[test]
    fn test_tie_breaks_to_first_enrolled() {
        // bob and alice each get two votes; alice's first record comes first
        let records = vec![
            record("alice"),
            record("bob"),
            record("alice"),
            record("bob"),
        ];
        let resolved = resolve_name(&records, &[true, true, true, true]);
        assert_eq!(resolved, Some("alice".into()));
    }

    #[test]
    fn test_tie_break_is_positional_not_alphabetical() {
        let records = vec![record("zoe"), record("alice")];
        let resolved = resolve_name(&records, &[true, true]);
        assert_eq!(resolved, Some("zoe".into()));
    }

    #[test]
    fn test_empty_store() {
        assert_eq!(resolve_name(&[], &[]), None);
    }
}
