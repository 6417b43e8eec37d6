//! The scan plan: for each input stream, the minimal sequence of
//! (k-mer length, offset) probes a read must be examined at. Plans are built
//! once at index close from the merged positional windows of all dictionary
//! literals, so the scanner never brute-scans a read.

use crate::{
    errors::DemuxError,
    index::{TagRecord, dictionary::VariantDict},
};
use std::collections::BTreeMap;

/// One step of a scan plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanStep {
    /// Examine the length-`k` slice at `pos`.
    Probe { k: usize, pos: usize },
    /// Continue probing length-`k` slices from `from` onward, advancing one
    /// base at a time while the slice fits in the read. Emitted for windows
    /// that are open toward the end of the read.
    ToEnd { k: usize, from: usize },
}

/// The probe sequence for one input stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanPlan {
    pub steps: Vec<PlanStep>,
}

/// A position interval; `None` as the end bound means "to end of read".
type Interval = (usize, Option<usize>);

/// Builds one [`ScanPlan`] per input stream from the windows of every literal
/// in the dictionary. Windows of wildcard tags (`file == -1`) are cloned into
/// every stream, so the scanner needs no wildcard handling.
///
/// ## Errors
///
/// [`Config`](DemuxError::Config) if a wildcard window exists while no streams
/// are configured, or a tag names a stream beyond the configured count.
pub(crate) fn build_plans(tags: &[TagRecord], dict: &VariantDict, n_files: usize) -> Result<Vec<ScanPlan>, DemuxError> {
    let mut windows: Vec<BTreeMap<usize, Vec<Interval>>> = vec![BTreeMap::new(); n_files];

    for (literal, hits) in dict.iter() {
        let k = literal.len();
        for hit in hits {
            let tag = &tags[hit.tag as usize];
            let interval = (tag.pos_start, (tag.pos_end != 0).then_some(tag.pos_end));

            if tag.file < 0 {
                if n_files == 0 {
                    return Err(DemuxError::Config(
                        "a tag applies to any stream, but the number of input streams is zero".to_string(),
                    ));
                }
                for file_windows in &mut windows {
                    file_windows.entry(k).or_default().push(interval);
                }
            } else {
                let file = tag.file as usize;
                let Some(file_windows) = windows.get_mut(file) else {
                    return Err(DemuxError::Config(format!(
                        "tag \"{name}\" names stream {file}, but only {n_files} stream(s) are configured",
                        name = tag.name
                    )));
                };
                file_windows.entry(k).or_default().push(interval);
            }
        }
    }

    let mut plans = Vec::with_capacity(n_files);
    for file_windows in windows {
        let mut steps = Vec::new();
        for (k, intervals) in file_windows {
            for (start, end) in merge_intervals(intervals) {
                match end {
                    Some(end) => {
                        let mut pos = start;
                        while pos + k <= end {
                            steps.push(PlanStep::Probe { k, pos });
                            pos += 1;
                        }
                    }
                    None => {
                        steps.push(PlanStep::Probe { k, pos: start });
                        steps.push(PlanStep::ToEnd { k, from: start + 1 });
                    }
                }
            }
        }
        plans.push(ScanPlan { steps });
    }

    Ok(plans)
}

/// Coalesces intervals by sorting on the start bound and sweeping; `[a, b)`
/// and `[c, d)` merge iff `c <= b`. An open-ended interval absorbs everything
/// starting at or after its start, so at most one survives, in last position.
fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_unstable_by_key(|&(start, _)| start);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        if let Some((_, last_end)) = merged.last_mut() {
            let reaches = match *last_end {
                None => true,
                Some(bound) => start <= bound,
            };
            if reaches {
                *last_end = match (*last_end, end) {
                    (None, _) | (_, None) => None,
                    (Some(a), Some(b)) => Some(a.max(b)),
                };
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::{TagIndex, TagSpec, attributes::Location};

    fn closed_index(specs: Vec<TagSpec>, n_files: usize) -> TagIndex {
        let mut index = TagIndex::new(n_files);
        for spec in specs {
            index.add_tag(spec).unwrap();
        }
        index.close().unwrap();
        index
    }

    fn spec_at(barcode: &str, location: Location) -> TagSpec {
        TagSpec {
            barcode: barcode.to_string(),
            location,
            ..TagSpec::default()
        }
    }

    #[test]
    fn merging_coalesces_overlaps() {
        let merged = merge_intervals(vec![(4, Some(8)), (0, Some(5)), (10, Some(12))]);
        assert_eq!(merged, vec![(0, Some(8)), (10, Some(12))]);
    }

    #[test]
    fn adjacent_intervals_merge() {
        // [0,4) and [4,8) touch: 4 <= 4
        let merged = merge_intervals(vec![(0, Some(4)), (4, Some(8))]);
        assert_eq!(merged, vec![(0, Some(8))]);
    }

    #[test]
    fn open_interval_absorbs_later_windows() {
        let merged = merge_intervals(vec![(2, None), (5, Some(9)), (0, Some(1))]);
        assert_eq!(merged, vec![(0, Some(1)), (2, None)]);
    }

    #[test]
    fn probe_enumeration_covers_exact_slots() {
        // Window [0,8) for a 4-mer: offsets 0..=4
        let index = closed_index(
            vec![spec_at("ACGT", Location {
                file:  0,
                start: 0,
                end:   8,
            })],
            1,
        );
        let steps = &index.plan(0).steps;
        let expected: Vec<PlanStep> = (0..=4).map(|pos| PlanStep::Probe { k: 4, pos }).collect();
        assert_eq!(steps, &expected);
    }

    #[test]
    fn open_window_emits_to_end_step() {
        let index = closed_index(
            vec![spec_at("ACGT", Location {
                file:  0,
                start: 3,
                end:   0,
            })],
            1,
        );
        assert_eq!(index.plan(0).steps, vec![PlanStep::Probe { k: 4, pos: 3 }, PlanStep::ToEnd {
            k:    4,
            from: 4,
        }]);
    }

    #[test]
    fn wildcard_windows_clone_into_every_stream() {
        let index = closed_index(
            vec![spec_at("ACGT", Location {
                file:  -1,
                start: 0,
                end:   4,
            })],
            3,
        );
        for file in 0..3 {
            assert_eq!(index.plan(file).steps, vec![PlanStep::Probe { k: 4, pos: 0 }]);
        }
    }

    #[test]
    fn no_duplicate_probes_across_tags() {
        // Two 4-mer tags with overlapping windows in the same stream
        let index = closed_index(
            vec![
                spec_at("ACGT", Location {
                    file:  0,
                    start: 0,
                    end:   6,
                }),
                spec_at("TTTT", Location {
                    file:  0,
                    start: 2,
                    end:   10,
                }),
            ],
            1,
        );
        let steps = &index.plan(0).steps;
        let expected: Vec<PlanStep> = (0..=6).map(|pos| PlanStep::Probe { k: 4, pos }).collect();
        assert_eq!(steps, &expected);
    }

    #[test]
    fn variant_lengths_contribute_their_own_probes() {
        // An indel budget produces 3-mer and 5-mer literals, which need their
        // own probe lengths
        let mut index = TagIndex::new(1);
        index
            .add_tag(TagSpec {
                barcode: "ACGT".to_string(),
                distance: crate::index::attributes::Distance {
                    mismatch: 0,
                    indel:    1,
                    total:    1,
                },
                location: Location {
                    file:  0,
                    start: 0,
                    end:   6,
                },
                ..TagSpec::default()
            })
            .unwrap();
        index.close().unwrap();

        let mut lengths: Vec<usize> = index
            .plan(0)
            .steps
            .iter()
            .map(|step| match *step {
                PlanStep::Probe { k, .. } | PlanStep::ToEnd { k, .. } => k,
            })
            .collect();
        lengths.dedup();
        assert_eq!(lengths, vec![3, 4, 5]);
    }
}
