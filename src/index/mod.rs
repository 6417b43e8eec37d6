//! The tag index: a dense registry of tag records plus the inverted variant
//! dictionary and the per-stream scan plans derived from them.
//!
//! The index is open for insertion until [`close`] is called; afterwards it is
//! read-only and safe to share across scanner threads without synchronization.
//!
//! [`close`]: TagIndex::close

use crate::errors::DemuxError;
use std::collections::BTreeSet;

pub mod attributes;
pub(crate) mod dictionary;
pub(crate) mod neighborhood;
pub(crate) mod plan;
pub mod scanner;

mod config;

use attributes::{Distance, Location};
use dictionary::{VariantDict, VariantHit};
use plan::ScanPlan;

/// A dense tag identifier, assigned in registration order.
pub type TagId = u32;

/// The trim action attached to a tag: no trimming, or removal of everything
/// left/right of a hit plus an extra number of bases beyond the tag itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Trim {
    #[default]
    None,
    Left(usize),
    Right(usize),
}

/// One registered tag. Immutable once the index is closed.
#[derive(Debug, Clone)]
pub struct TagRecord {
    pub name: String,
    /// The canonical sequences, uppercase ATCG, split on `/`.
    pub sequences: Vec<Vec<u8>>,
    /// Hits of this tag must be the leftmost accepted hit in their stream.
    pub initiator: bool,
    /// Hits of this tag must be the rightmost accepted hit in their stream.
    pub terminator: bool,
    /// The stream index, or -1 for any stream.
    pub file: i32,
    /// Start of the half-open positional window.
    pub pos_start: usize,
    /// End of the positional window; 0 means "to end of read".
    pub pos_end: usize,
    /// Minimum number of hits per read for the read to be assigned.
    pub min_finds: u16,
    /// Maximum number of hits kept per read; 0 means unlimited.
    pub max_finds: u16,
    /// Whether hits contribute to the read's classification vector.
    pub include_in_barcode: bool,
    pub trim: Trim,
}

/// The unvalidated description of a tag, as assembled from a tag table row or
/// from the command-line lists.
///
/// `barcode` is the raw sequence field: a leading or trailing `*` marks the
/// tag as initiator or terminator, and `/` separates alternative sequences.
/// An empty `name` defaults to the raw barcode string.
#[derive(Debug, Clone, Default)]
pub struct TagSpec {
    pub barcode:   String,
    pub name:      String,
    pub distance:  Distance,
    pub location:  Location,
    pub min_finds: u16,
    pub max_finds: u16,
    pub exclude:   bool,
    pub trim:      Trim,
}

/// The registry of tags, their variant dictionary, and the scan plans.
pub struct TagIndex {
    tags: Vec<TagRecord>,
    dict: VariantDict,
    /// Variant entries scheduled for removal at close. Removal is deferred so
    /// that a later registration can still fail cleanly against a variant that
    /// has already collided.
    pending_removals: BTreeSet<(Vec<u8>, TagId)>,
    plans: Vec<ScanPlan>,
    /// Tags with a nonzero `min_finds`, precomputed for the scanner.
    min_find_tags: Vec<TagId>,
    n_files: usize,
    closed: bool,
}

impl TagIndex {
    /// Creates an empty index for `n_files` input streams per read unit.
    pub fn new(n_files: usize) -> Self {
        Self {
            tags: Vec::new(),
            dict: VariantDict::default(),
            pending_removals: BTreeSet::new(),
            plans: Vec::new(),
            min_find_tags: Vec::new(),
            n_files,
            closed: false,
        }
    }

    #[inline]
    pub fn n_files(&self) -> usize {
        self.n_files
    }

    #[inline]
    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn tag(&self, id: TagId) -> &TagRecord {
        &self.tags[id as usize]
    }

    /// Finds a tag id by name. The first registration wins for repeated names.
    pub fn tag_id_by_name(&self, name: &str) -> Option<TagId> {
        self.tags.iter().position(|tag| tag.name == name).map(|i| i as TagId)
    }

    /// The number of distinct literals in the dictionary (`unique`), or the
    /// total number of `(literal, tag)` entries.
    pub fn dict_size(&self, unique: bool) -> usize {
        if unique {
            self.dict.num_literals()
        } else {
            self.dict.num_entries()
        }
    }

    #[inline]
    pub(crate) fn lookup(&self, seq: &[u8]) -> Option<&[VariantHit]> {
        self.dict.get(seq)
    }

    #[inline]
    pub(crate) fn plan(&self, file: usize) -> &ScanPlan {
        &self.plans[file]
    }

    #[inline]
    pub(crate) fn min_find_tags(&self) -> &[TagId] {
        &self.min_find_tags
    }

    /// Registers a tag: validates the record, registers its canonical
    /// sequences, generates the mismatch/indel neighborhood under the tag's
    /// edit budget, and registers every neighbor with its error distance.
    ///
    /// Collision policy: a canonical sequence that lands on any existing
    /// entry of an overlapping tag is fatal, as is a generated neighbor that
    /// lands on an overlapping tag's canonical sequence. Two *generated*
    /// variants colliding schedules both for removal at [`close`]; the
    /// canonical sequences remain.
    ///
    /// Returns the dense id assigned to the tag.
    ///
    /// ## Errors
    ///
    /// [`IndexClosed`] after [`close`]; [`InvalidTag`] on syntactic
    /// violations; [`CanonicalCollision`] on fatal collisions.
    ///
    /// [`close`]: TagIndex::close
    /// [`IndexClosed`]: DemuxError::IndexClosed
    /// [`InvalidTag`]: DemuxError::InvalidTag
    /// [`CanonicalCollision`]: DemuxError::CanonicalCollision
    pub fn add_tag(&mut self, spec: TagSpec) -> Result<TagId, DemuxError> {
        if self.closed {
            return Err(DemuxError::IndexClosed);
        }

        let id = self.tags.len() as TagId;
        let name = if spec.name.is_empty() { spec.barcode.clone() } else { spec.name };
        let invalid = |reason: &str| DemuxError::InvalidTag {
            tag:    name.clone(),
            reason: reason.to_string(),
        };

        let mut barcode = spec.barcode;
        let initiator = barcode.starts_with('*');
        if initiator {
            barcode.remove(0);
        }
        let terminator = barcode.ends_with('*');
        if terminator {
            barcode.pop();
        }
        if barcode.is_empty() {
            return Err(invalid("sequence is empty"));
        }
        barcode.make_ascii_uppercase();

        if spec.max_finds != 0 && spec.max_finds < spec.min_finds {
            return Err(invalid("max finds cannot be less than min finds"));
        }

        let Location { file, start: pos_start, end: pos_end } = spec.location;
        if file >= 0 && file as usize >= self.n_files {
            return Err(invalid("stream index is beyond the configured number of streams"));
        }
        if pos_end != 0 && pos_end <= pos_start {
            return Err(invalid("the positional window is empty"));
        }

        let mut sequences: Vec<Vec<u8>> = Vec::new();
        for seq in barcode.split('/').filter(|s| !s.is_empty()) {
            if !seq.bytes().all(|b| matches!(b, b'A' | b'T' | b'C' | b'G')) {
                return Err(invalid("sequence contains a non-ATCG character"));
            }
            if pos_end != 0 && pos_end - pos_start < seq.len() {
                return Err(invalid("sequence is too long to fit in the supplied location"));
            }
            sequences.push(seq.as_bytes().to_vec());
        }
        if sequences.is_empty() {
            return Err(invalid("sequence is empty"));
        }

        self.tags.push(TagRecord {
            name,
            sequences: sequences.clone(),
            initiator,
            terminator,
            file,
            pos_start,
            pos_end,
            min_finds: spec.min_finds,
            max_finds: spec.max_finds,
            include_in_barcode: !spec.exclude,
            trim: spec.trim,
        });

        for seq in &sequences {
            // A canonical sequence colliding with any overlapping entry,
            // canonical or generated, is fatal
            if let Some(collider) = self.first_collision(id, seq) {
                return Err(self.collision_error(id, collider, seq));
            }

            let neighbors = neighborhood::generate_neighbors(seq, spec.distance);
            for (variant, &error) in &neighbors {
                if let Some(hits) = self.dict.get(variant) {
                    let colliding: Vec<TagId> = hits
                        .iter()
                        .filter(|hit| hit.tag != id && self.windows_overlap(id, hit.tag))
                        .map(|hit| hit.tag)
                        .collect();
                    for other in colliding {
                        if self.tags[other as usize].sequences.iter().any(|s| s == variant) {
                            // Generated neighbor landing on a canonical sequence
                            return Err(self.collision_error(id, other, variant));
                        }
                        // Generated vs generated: both lose the variant
                        self.pending_removals.insert((variant.clone(), other));
                        self.pending_removals.insert((variant.clone(), id));
                    }
                }
                self.dict.insert(variant, id, error);
            }

            self.dict.insert(seq, id, 0);
        }

        Ok(id)
    }

    /// Closes the index: applies the pending variant removals, drops emptied
    /// dictionary entries, and builds the per-stream scan plans. Idempotent.
    ///
    /// ## Errors
    ///
    /// [`Config`](DemuxError::Config) from plan construction when stream
    /// counts and tag locations are inconsistent.
    pub fn close(&mut self) -> Result<(), DemuxError> {
        if self.closed {
            return Ok(());
        }

        for (seq, tag) in std::mem::take(&mut self.pending_removals) {
            self.dict.remove_pair(&seq, tag);
        }

        self.plans = plan::build_plans(&self.tags, &self.dict, self.n_files)?;
        self.min_find_tags = (0..self.tags.len() as TagId)
            .filter(|&id| self.tags[id as usize].min_finds > 0)
            .collect();
        self.closed = true;
        Ok(())
    }

    /// Whether the positional windows of two tags can overlap: their stream
    /// indices must be equal or at least one must be the wildcard, and the
    /// `[start, end)` ranges must intersect (an `end` of 0 is unbounded).
    fn windows_overlap(&self, a: TagId, b: TagId) -> bool {
        let (a, b) = (&self.tags[a as usize], &self.tags[b as usize]);
        if a.file != b.file && a.file != -1 && b.file != -1 {
            return false;
        }
        if a.pos_start < b.pos_start && a.pos_end <= b.pos_start && a.pos_end != 0 {
            return false;
        }
        if b.pos_start < a.pos_start && b.pos_end <= a.pos_start && b.pos_end != 0 {
            return false;
        }
        true
    }

    /// The first overlapping acceptor of `seq` other than `id`, if any.
    fn first_collision(&self, id: TagId, seq: &[u8]) -> Option<TagId> {
        self.dict
            .get(seq)?
            .iter()
            .find(|hit| hit.tag != id && self.windows_overlap(id, hit.tag))
            .map(|hit| hit.tag)
    }

    fn collision_error(&self, id: TagId, other: TagId, variant: &[u8]) -> DemuxError {
        DemuxError::CanonicalCollision {
            tag:     self.tags[id as usize].name.clone(),
            other:   self.tags[other as usize].name.clone(),
            variant: String::from_utf8_lossy(variant).into_owned(),
        }
    }
}
