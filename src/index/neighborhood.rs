//! Enumeration of the mismatch/indel neighborhood of a tag sequence.
//!
//! Given a canonical sequence and a [`Distance`] budget, [`generate_neighbors`]
//! produces every sequence reachable with at most `mismatch` substitutions, at
//! most `indel` single-base insertions or deletions, and at most `total` edits
//! overall. Each variant is mapped to the minimum number of edits over all
//! generation paths that reach it. The canonical sequence itself is never
//! included.

use crate::index::attributes::Distance;
use foldhash::HashMap;

/// The generated variants of one sequence, mapped to their error distance.
pub(crate) type Neighborhood = HashMap<Vec<u8>, u16>;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Enumerates the neighborhood of `seq` under the given edit budget.
///
/// The generator is pure; ordering of emission is irrelevant. Only the final
/// `variant -> distance` map is observable.
pub(crate) fn generate_neighbors(seq: &[u8], dist: Distance) -> Neighborhood {
    let total = if dist.total == 0 { dist.mismatch + dist.indel } else { dist.total };
    let mismatch = dist.mismatch.min(total);
    let indel = dist.indel.min(total);

    if indel == 0 {
        let mut results = Neighborhood::default();
        expand_mismatches(seq, 0, mismatch, 0, &mut results);
        return results;
    }

    let mut indel_results = Neighborhood::default();
    expand_indels(seq, seq, indel, 0, &mut indel_results);

    let mut results = indel_results.clone();
    expand_mismatches(seq, 0, mismatch, 0, &mut results);
    for (variant, &indels_used) in &indel_results {
        let budget = (total - indels_used).min(mismatch);
        expand_mismatches(variant, 0, budget, indels_used, &mut results);
    }

    // A deletion-insertion pair restores the length, so a later substitution
    // can recreate the canonical sequence
    results.remove(seq);
    results
}

/// Records `variant` at `used` edits, keeping the minimum over paths.
#[inline]
fn record(results: &mut Neighborhood, variant: &[u8], used: u16) -> bool {
    match results.get_mut(variant) {
        Some(prev) if *prev <= used => false,
        Some(prev) => {
            *prev = used;
            true
        }
        None => {
            results.insert(variant.to_vec(), used);
            true
        }
    }
}

/// Substitutes positions of `seq` starting at `from`, in increasing order so
/// that each substitution set is visited exactly once.
fn expand_mismatches(seq: &[u8], from: usize, budget: u16, used: u16, results: &mut Neighborhood) {
    if budget == 0 {
        return;
    }
    for i in from..seq.len() {
        for base in BASES {
            if base == seq[i] {
                continue;
            }
            let mut variant = seq.to_vec();
            variant[i] = base;
            record(results, &variant, used + 1);
            expand_mismatches(&variant, i + 1, budget - 1, used + 1, results);
        }
    }
}

/// Applies single-base insertions and deletions to `seq`, recursing only when
/// a variant is new or was reached more cheaply. Variants equal to the
/// canonical sequence or emptied out entirely are discarded.
fn expand_indels(original: &[u8], seq: &[u8], budget: u16, used: u16, results: &mut Neighborhood) {
    if budget == 0 {
        return;
    }
    for i in 0..=seq.len() {
        for base in BASES {
            let mut variant = Vec::with_capacity(seq.len() + 1);
            variant.extend_from_slice(&seq[..i]);
            variant.push(base);
            variant.extend_from_slice(&seq[i..]);
            if variant != original && record(results, &variant, used + 1) {
                expand_indels(original, &variant, budget - 1, used + 1, results);
            }
        }
        if i < seq.len() {
            let mut variant = seq.to_vec();
            variant.remove(i);
            if !variant.is_empty() && variant != original && record(results, &variant, used + 1) {
                expand_indels(original, &variant, budget - 1, used + 1, results);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dist(mismatch: u16, indel: u16, total: u16) -> Distance {
        Distance { mismatch, indel, total }
    }

    /// Hamming distance for equal-length sequences, or None otherwise.
    fn hamming(a: &[u8], b: &[u8]) -> Option<u16> {
        (a.len() == b.len()).then(|| a.iter().zip(b).filter(|(x, y)| x != y).count() as u16)
    }

    #[test]
    fn single_mismatch_neighborhood() {
        let results = generate_neighbors(b"ACGT", dist(1, 0, 0));
        // 4 positions x 3 alternative bases
        assert_eq!(results.len(), 12);
        assert_eq!(results.get(b"AGGT".as_slice()), Some(&1));
        assert_eq!(results.get(b"ACGA".as_slice()), Some(&1));
        assert!(!results.contains_key(b"ACGT".as_slice()));
        for (variant, &d) in &results {
            assert_eq!(hamming(variant, b"ACGT"), Some(d));
        }
    }

    #[test]
    fn mismatch_distances_are_exact() {
        let results = generate_neighbors(b"AAA", dist(2, 0, 0));
        // 3*3 singles + C(3,2)*9 doubles
        assert_eq!(results.len(), 36);
        for (variant, &d) in &results {
            assert_eq!(hamming(variant, b"AAA"), Some(d), "variant {variant:?}");
            assert!(d <= 2);
        }
        assert_eq!(results.get(b"ACA".as_slice()), Some(&1));
        assert_eq!(results.get(b"CCA".as_slice()), Some(&2));
    }

    #[test]
    fn indel_neighborhood_contains_insertions_and_deletions() {
        let results = generate_neighbors(b"AC", dist(0, 1, 0));
        // Deletions
        assert_eq!(results.get(b"A".as_slice()), Some(&1));
        assert_eq!(results.get(b"C".as_slice()), Some(&1));
        // Insertions at every position
        assert_eq!(results.get(b"TAC".as_slice()), Some(&1));
        assert_eq!(results.get(b"ATC".as_slice()), Some(&1));
        assert_eq!(results.get(b"ACT".as_slice()), Some(&1));
        assert!(!results.contains_key(b"AC".as_slice()));
        for variant in results.keys() {
            assert!(variant.len() == 1 || variant.len() == 3);
        }
    }

    #[test]
    fn canonical_never_regenerated_through_combined_edits() {
        // One deletion plus one insertion can rebuild the original length, and
        // a substitution can then restore the content
        let results = generate_neighbors(b"ACGT", dist(1, 2, 3));
        assert!(!results.contains_key(b"ACGT".as_slice()));
    }

    #[test]
    fn combined_budget_caps_total_edits() {
        let results = generate_neighbors(b"ACGT", dist(1, 1, 1));
        // With a total budget of 1, every variant is a single edit
        for (variant, &d) in &results {
            assert_eq!(d, 1, "variant {variant:?}");
            let len = variant.len();
            assert!((3..=5).contains(&len));
            if len == 4 {
                assert_eq!(hamming(variant, b"ACGT"), Some(1));
            }
        }
        // Single substitutions and single indels are both present
        assert!(results.contains_key(b"ACGA".as_slice()));
        assert!(results.contains_key(b"CGT".as_slice()));
        assert!(results.contains_key(b"AACGT".as_slice()));
    }

    #[test]
    fn minimum_distance_wins_across_paths() {
        // AACGT is reachable from ACGT by one insertion, but also by longer
        // routes; the recorded distance must be the minimum
        let results = generate_neighbors(b"ACGT", dist(2, 2, 4));
        assert_eq!(results.get(b"AACGT".as_slice()), Some(&1));
        assert_eq!(results.get(b"AGGT".as_slice()), Some(&1));
    }

    #[test]
    fn zero_budget_is_empty() {
        assert!(generate_neighbors(b"ACGT", dist(0, 0, 0)).is_empty());
    }

    #[test]
    fn mismatch_completeness_against_brute_force() {
        // Every sequence within hamming distance 2 of CAT must be generated
        let results = generate_neighbors(b"CAT", dist(2, 0, 0));
        let mut expected = 0;
        for a in BASES {
            for b in BASES {
                for c in BASES {
                    let candidate = [a, b, c];
                    let d = hamming(&candidate, b"CAT").unwrap();
                    if d == 0 || d > 2 {
                        continue;
                    }
                    expected += 1;
                    assert_eq!(results.get(candidate.as_slice()), Some(&d), "candidate {candidate:?}");
                }
            }
        }
        assert_eq!(results.len(), expected);
    }
}
