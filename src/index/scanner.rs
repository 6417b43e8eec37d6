//! The read scanner: walks a read group along the scan plan, collects
//! dictionary hits, applies the per-tag find caps and placement rules, and
//! folds the surviving hits into a classification vector plus per-stream trim
//! ranges.

use crate::index::{TagId, TagIndex, Trim, plan::PlanStep};

/// One accepted tag occurrence in a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub tag:  TagId,
    /// Stream index within the read group.
    pub file: usize,
    /// Start offset of the matched slice within the read.
    pub pos:  usize,
    /// Length of the matched slice (the variant's length, not the canonical).
    pub len:  usize,
    /// Error distance of the matched variant.
    pub dist: u16,
}

/// The outcome of scanning one read group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResult {
    /// Whether the group hit at least one tag and passed the min-find and
    /// placement rules. Unassigned groups carry an empty vector.
    pub assigned: bool,
    /// The ordered ids of include-eligible tags hit in the group; this keys
    /// the output bucket.
    pub vector: Vec<TagId>,
    /// Per stream, the half-open range of the read that survives trimming.
    pub keep: Vec<(usize, usize)>,
}

/// A scanner with per-worker scratch space. The index must be closed; the
/// scanner only reads it, so one index can back any number of scanners.
pub struct ReadScanner<'a> {
    index: &'a TagIndex,
    finds: Vec<u16>,
    hits:  Vec<Hit>,
}

impl<'a> ReadScanner<'a> {
    /// Creates a scanner over a closed index.
    ///
    /// ## Panics
    ///
    /// The index must be closed.
    pub fn new(index: &'a TagIndex) -> Self {
        assert!(index.is_closed(), "the tag index must be closed before scanning");
        Self {
            index,
            finds: vec![0; index.num_tags()],
            hits: Vec::new(),
        }
    }

    /// Scans one read group, `reads[f]` being the sequence of stream `f`.
    pub fn scan_group(&mut self, reads: &[&[u8]]) -> GroupResult {
        self.hits.clear();
        self.finds.fill(0);

        let n = self.index.n_files().min(reads.len());
        for file in 0..n {
            let seq = reads[file];
            for &step in &self.index.plan(file).steps {
                match step {
                    PlanStep::Probe { k, pos } => {
                        if pos + k <= seq.len() {
                            self.probe(file, seq, pos, k);
                        }
                    }
                    PlanStep::ToEnd { k, from } => {
                        let mut pos = from;
                        while pos + k <= seq.len() {
                            self.probe(file, seq, pos, k);
                            pos += 1;
                        }
                    }
                }
            }
        }

        let assigned = !self.hits.is_empty() && self.check_min_finds() && self.check_placement(n);
        let keep = self.trim_ranges(reads, n);
        let vector = if assigned {
            self.hits
                .iter()
                .filter(|hit| self.index.tag(hit.tag).include_in_barcode)
                .map(|hit| hit.tag)
                .collect()
        } else {
            Vec::new()
        };

        GroupResult { assigned, vector, keep }
    }

    /// The accepted hits of the most recent [`scan_group`] call, in scan
    /// order.
    ///
    /// [`scan_group`]: ReadScanner::scan_group
    #[inline]
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Looks up the length-`k` slice at `pos` and records the accepted hits.
    /// Slices containing non-ATCG bases simply miss the dictionary, so
    /// malformed reads are tolerated.
    fn probe(&mut self, file: usize, seq: &[u8], pos: usize, k: usize) {
        let Some(entries) = self.index.lookup(&seq[pos..pos + k]) else {
            return;
        };
        for entry in entries {
            let tag = self.index.tag(entry.tag);
            // The plan is built per stream and window, but a dictionary
            // literal is shared by all tags that accept it, so the hit must be
            // revalidated against this tag's stream and window
            if tag.file >= 0 && tag.file as usize != file {
                continue;
            }
            if pos < tag.pos_start || (tag.pos_end != 0 && pos + k > tag.pos_end) {
                continue;
            }
            if tag.max_finds != 0 && self.finds[entry.tag as usize] >= tag.max_finds {
                continue;
            }
            self.finds[entry.tag as usize] += 1;
            self.hits.push(Hit {
                tag: entry.tag,
                file,
                pos,
                len: k,
                dist: entry.dist,
            });
        }
    }

    fn check_min_finds(&self) -> bool {
        self.index
            .min_find_tags()
            .iter()
            .all(|&id| self.finds[id as usize] >= self.index.tag(id).min_finds)
    }

    /// Initiator hits must be the leftmost accepted hit of their stream and
    /// terminator hits the rightmost.
    fn check_placement(&self, n_files: usize) -> bool {
        for file in 0..n_files {
            let mut bounds: Option<(usize, usize)> = None;
            for hit in self.hits.iter().filter(|hit| hit.file == file) {
                bounds = match bounds {
                    None => Some((hit.pos, hit.pos)),
                    Some((lo, hi)) => Some((lo.min(hit.pos), hi.max(hit.pos))),
                };
            }
            let Some((leftmost, rightmost)) = bounds else {
                continue;
            };
            for hit in self.hits.iter().filter(|hit| hit.file == file) {
                let tag = self.index.tag(hit.tag);
                if tag.initiator && hit.pos != leftmost {
                    return false;
                }
                if tag.terminator && hit.pos != rightmost {
                    return false;
                }
            }
        }
        true
    }

    /// Derives the surviving range per stream: a left-trimming hit discards
    /// everything through the end of the tag plus its extra offset, a
    /// right-trimming hit everything from the start of the tag minus its
    /// extra offset.
    fn trim_ranges(&self, reads: &[&[u8]], n_files: usize) -> Vec<(usize, usize)> {
        let mut keep: Vec<(usize, usize)> = reads.iter().take(n_files).map(|seq| (0, seq.len())).collect();
        for hit in &self.hits {
            let (start, end) = &mut keep[hit.file];
            match self.index.tag(hit.tag).trim {
                Trim::None => {}
                Trim::Left(extra) => *start = (*start).max((hit.pos + hit.len + extra).min(reads[hit.file].len())),
                Trim::Right(extra) => *end = (*end).min(hit.pos.saturating_sub(extra)),
            }
        }
        for (start, end) in &mut keep {
            if start > end {
                *start = *end;
            }
        }
        keep
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::{
        TagIndex, TagSpec,
        attributes::{Distance, Location},
    };

    fn location(file: i32, start: usize, end: usize) -> Location {
        Location { file, start, end }
    }

    fn build(specs: Vec<TagSpec>, n_files: usize) -> TagIndex {
        let mut index = TagIndex::new(n_files);
        for spec in specs {
            index.add_tag(spec).unwrap();
        }
        index.close().unwrap();
        index
    }

    #[test]
    fn exact_hit_classifies_and_trims_left() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                location: location(0, 0, 4),
                trim: Trim::Left(0),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTGGGG".as_slice()]);
        assert!(result.assigned);
        assert_eq!(result.vector, vec![0]);
        assert_eq!(result.keep, vec![(4, 8)]);
        assert_eq!(scanner.hits(), &[Hit {
            tag:  0,
            file: 0,
            pos:  0,
            len:  4,
            dist: 0,
        }]);
    }

    #[test]
    fn mismatched_variant_reports_its_error_distance() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                distance: Distance {
                    mismatch: 1,
                    indel:    0,
                    total:    1,
                },
                location: location(0, 0, 4),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"AGGTGGGG".as_slice()]);
        assert!(result.assigned);
        assert_eq!(scanner.hits().len(), 1);
        assert_eq!(scanner.hits()[0].dist, 1);
    }

    #[test]
    fn max_finds_caps_hits_in_scan_order() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                max_finds: 1,
                location: location(0, 0, 0),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTACGT".as_slice()]);
        assert!(result.assigned);
        assert_eq!(scanner.hits().len(), 1);
        assert_eq!(scanner.hits()[0].pos, 0);
        assert_eq!(result.vector, vec![0]);
    }

    #[test]
    fn unmet_min_finds_leaves_the_read_unassigned() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                min_finds: 2,
                location: location(0, 0, 0),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTGGGG".as_slice()]);
        assert!(!result.assigned);
        assert!(result.vector.is_empty());

        let result = scanner.scan_group(&[b"ACGTACGT".as_slice()]);
        assert!(result.assigned);
        assert_eq!(result.vector, vec![0, 0]);
    }

    #[test]
    fn excluded_tags_hit_but_stay_out_of_the_vector() {
        let index = build(
            vec![
                TagSpec {
                    barcode: "ACGT".to_string(),
                    location: location(0, 0, 4),
                    ..TagSpec::default()
                },
                TagSpec {
                    barcode: "TTGG".to_string(),
                    location: location(0, 4, 8),
                    exclude: true,
                    ..TagSpec::default()
                },
            ],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTTTGG".as_slice()]);
        assert!(result.assigned);
        assert_eq!(scanner.hits().len(), 2);
        assert_eq!(result.vector, vec![0]);
    }

    #[test]
    fn window_is_enforced_even_when_plans_overlap() {
        // Both tags are 4-mers in stream 0, so the merged plan probes the
        // union of the windows; each hit must still fall in its own window
        let index = build(
            vec![
                TagSpec {
                    barcode: "ACGT".to_string(),
                    location: location(0, 0, 4),
                    ..TagSpec::default()
                },
                TagSpec {
                    barcode: "TTGG".to_string(),
                    location: location(0, 4, 8),
                    ..TagSpec::default()
                },
            ],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        // TTGG appears at offset 0, outside its [4,8) window; with no
        // accepted hits at all, the read cannot key a bucket
        let result = scanner.scan_group(&[b"TTGGACGT".as_slice()]);
        assert!(scanner.hits().is_empty());
        assert!(!result.assigned);
        assert!(result.vector.is_empty());
    }

    #[test]
    fn stream_binding_is_enforced_across_files() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                location: location(1, 0, 4),
                ..TagSpec::default()
            }],
            2,
        );
        let mut scanner = ReadScanner::new(&index);

        scanner.scan_group(&[b"ACGTGGGG".as_slice(), b"GGGGGGGG".as_slice()]);
        assert!(scanner.hits().is_empty());

        scanner.scan_group(&[b"GGGGGGGG".as_slice(), b"ACGTGGGG".as_slice()]);
        assert_eq!(scanner.hits().len(), 1);
        assert_eq!(scanner.hits()[0].file, 1);
    }

    #[test]
    fn initiator_must_be_leftmost() {
        let index = build(
            vec![
                TagSpec {
                    barcode: "*ACGT".to_string(),
                    location: location(0, 0, 0),
                    ..TagSpec::default()
                },
                TagSpec {
                    barcode: "TTGG".to_string(),
                    location: location(0, 0, 0),
                    ..TagSpec::default()
                },
            ],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTTTGG".as_slice()]);
        assert!(result.assigned);

        let result = scanner.scan_group(&[b"TTGGACGT".as_slice()]);
        assert!(!result.assigned);
    }

    #[test]
    fn terminator_must_be_rightmost() {
        let index = build(
            vec![
                TagSpec {
                    barcode: "ACGT*".to_string(),
                    location: location(0, 0, 0),
                    ..TagSpec::default()
                },
                TagSpec {
                    barcode: "TTGG".to_string(),
                    location: location(0, 0, 0),
                    ..TagSpec::default()
                },
            ],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"TTGGACGT".as_slice()]);
        assert!(result.assigned);

        let result = scanner.scan_group(&[b"ACGTTTGG".as_slice()]);
        assert!(!result.assigned);
    }

    #[test]
    fn right_trim_with_extra_offset() {
        let index = build(
            vec![TagSpec {
                barcode: "TTGG".to_string(),
                location: location(0, 4, 8),
                trim: Trim::Right(2),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"AACCTTGGAA".as_slice()]);
        assert!(result.assigned);
        // The hit starts at 4; two extra bases are removed before it
        assert_eq!(result.keep, vec![(0, 2)]);
    }

    #[test]
    fn trimming_everything_yields_an_empty_range() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                location: location(0, 0, 4),
                trim: Trim::Left(10),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        let result = scanner.scan_group(&[b"ACGTGG".as_slice()]);
        let (start, end) = result.keep[0];
        assert_eq!(start, end);
    }

    #[test]
    fn open_window_scans_through_the_read_end() {
        let index = build(
            vec![TagSpec {
                barcode: "ACGT".to_string(),
                location: location(0, 2, 0),
                ..TagSpec::default()
            }],
            1,
        );
        let mut scanner = ReadScanner::new(&index);

        scanner.scan_group(&[b"GGGGGGACGT".as_slice()]);
        assert_eq!(scanner.hits().len(), 1);
        assert_eq!(scanner.hits()[0].pos, 6);
    }
}
