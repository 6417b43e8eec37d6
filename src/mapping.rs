//! Bookkeeping for output buckets: the mapping from classification vectors to
//! dense bucket ids, the on-disk mapping table, and the optional keep/remove
//! filter lists.
//!
//! Each bucket id is also rendered as a fixed-length DNA word (two bits per
//! base, most significant first), which is what appears in the barcode output
//! stream, in `--mod-names` suffixes, and in the first column of the mapping
//! table.

use crate::{
    errors::DemuxError,
    index::{TagId, TagIndex},
};
use foldhash::HashMap;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Length of the DNA rendering of a bucket id.
pub const BUCKET_BARCODE_LEN: usize = 16;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Renders a bucket id as its DNA word.
pub fn bucket_barcode(id: usize) -> String {
    let mut word = String::with_capacity(BUCKET_BARCODE_LEN);
    for i in (0..BUCKET_BARCODE_LEN).rev() {
        word.push(BASES[(id >> (2 * i)) & 3] as char);
    }
    word
}

/// Decodes a DNA word back into a bucket id. `None` for malformed words.
pub fn parse_bucket_barcode(word: &str) -> Option<usize> {
    if word.len() != BUCKET_BARCODE_LEN {
        return None;
    }
    let mut id = 0usize;
    for b in word.bytes() {
        let bits = BASES.iter().position(|&base| base == b)?;
        id = (id << 2) | bits;
    }
    Some(id)
}

/// Placeholder for the empty classification vector in the mapping table,
/// where an empty name list would otherwise produce an empty field.
const EMPTY_VECTOR_FIELD: &str = ".";

/// The vector -> bucket assignment, hit counts, and the optional keep/remove
/// filter. Mutated only behind the pipeline's writer gate, so assignment
/// order (and therefore bucket numbering) follows input order.
pub struct BarcodeMapping {
    vectors: Vec<Vec<TagId>>,
    lookup:  HashMap<Vec<TagId>, usize>,
    counts:  Vec<u64>,
    filter:  Option<BucketFilter>,
}

struct BucketFilter {
    /// Listed vectors, each optionally routed to a dedicated output prefix.
    listed: HashMap<Vec<TagId>, Option<String>>,
    /// When set, listed vectors are discarded rather than kept.
    discard: bool,
}

impl Default for BarcodeMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeMapping {
    pub fn new() -> Self {
        Self {
            vectors: Vec::new(),
            lookup:  HashMap::default(),
            counts:  Vec::new(),
            filter:  None,
        }
    }

    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Returns the bucket id for a vector, allocating the next dense id for a
    /// vector seen for the first time, and bumps the bucket's count.
    pub fn assign(&mut self, vector: &[TagId]) -> usize {
        let id = match self.lookup.get(vector) {
            Some(&id) => id,
            None => {
                let id = self.vectors.len();
                self.vectors.push(vector.to_vec());
                self.lookup.insert(vector.to_vec(), id);
                self.counts.push(0);
                id
            }
        };
        self.counts[id] += 1;
        id
    }

    /// Whether a vector survives the keep/remove filter. Vectors pass freely
    /// when no filter is loaded.
    pub fn passes_filter(&self, vector: &[TagId]) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => filter.listed.contains_key(vector) != filter.discard,
        }
    }

    /// The dedicated output prefix for a vector, when its keep-list line
    /// carried one.
    pub fn route_prefix(&self, vector: &[TagId]) -> Option<&str> {
        self.filter
            .as_ref()
            .filter(|filter| !filter.discard)?
            .listed
            .get(vector)?
            .as_deref()
    }

    /// All distinct routing prefixes of the keep list.
    pub fn route_prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = match &self.filter {
            Some(filter) if !filter.discard => filter.listed.values().flatten().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        prefixes.sort_unstable();
        prefixes.dedup();
        prefixes
    }

    /// Loads a keep (or, with `discard`, remove) list: one classification
    /// vector per line as comma-joined tag names, optionally followed by
    /// whitespace and an output prefix.
    ///
    /// ## Errors
    ///
    /// [`Config`](DemuxError::Config) for unknown tag names; I/O errors are
    /// propagated.
    pub fn load_filter(&mut self, path: impl AsRef<Path>, index: &TagIndex, discard: bool) -> Result<(), DemuxError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            std::io::Error::other(format!("Failed to read the filter list {path:#?} due to the error:\n{e}"))
        })?;

        let mut listed = HashMap::default();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let names = fields.next().unwrap_or_default();
            let prefix = fields.next().map(str::to_string);
            listed.insert(parse_name_vector(names, index, path)?, prefix);
        }

        self.filter = Some(BucketFilter { listed, discard });
        Ok(())
    }

    /// Seeds the mapping from a previously written table so that existing
    /// `vector -> id` assignments (and counts) are preserved and only unseen
    /// vectors are allocated new ids.
    ///
    /// ## Errors
    ///
    /// [`Config`](DemuxError::Config) for corrupt tables or unknown tag
    /// names; I/O errors are propagated.
    pub fn load_existing(&mut self, path: impl AsRef<Path>, index: &TagIndex) -> Result<(), DemuxError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            std::io::Error::other(format!("Failed to read the mapping table {path:#?} due to the error:\n{e}"))
        })?;

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let corrupt = || DemuxError::Config(format!("The mapping table {path:#?} is corrupt at line {}", i + 1));

            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[word, names, count] = fields.as_slice() else {
                return Err(corrupt());
            };
            if parse_bucket_barcode(word) != Some(i) {
                return Err(corrupt());
            }
            let count = count.parse::<u64>().map_err(|_| corrupt())?;
            let vector = parse_name_vector(names, index, path)?;

            if self.lookup.contains_key(&vector) {
                return Err(corrupt());
            }
            self.lookup.insert(vector.clone(), i);
            self.vectors.push(vector);
            self.counts.push(count);
        }

        Ok(())
    }

    /// Writes the mapping table: one row per bucket in id order, as
    /// `<bucket barcode> TAB <tag names joined by ','> TAB <count>`.
    pub fn write(&self, path: impl AsRef<Path>, index: &TagIndex) -> Result<(), DemuxError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            std::io::Error::other(format!("Failed to open {path:#?} for writing due to the error:\n{e}"))
        })?;
        let mut writer = BufWriter::new(file);

        for (id, vector) in self.vectors.iter().enumerate() {
            let names = if vector.is_empty() {
                EMPTY_VECTOR_FIELD.to_string()
            } else {
                let names: Vec<&str> = vector.iter().map(|&tag| index.tag(tag).name.as_str()).collect();
                names.join(",")
            };
            writeln!(writer, "{}\t{}\t{}", bucket_barcode(id), names, self.counts[id])?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Parses a comma-joined list of tag names into a classification vector.
fn parse_name_vector(names: &str, index: &TagIndex, path: &Path) -> Result<Vec<TagId>, DemuxError> {
    if names == EMPTY_VECTOR_FIELD {
        return Ok(Vec::new());
    }
    names
        .split(',')
        .map(|name| {
            index
                .tag_id_by_name(name)
                .ok_or_else(|| DemuxError::Config(format!("Unknown tag name \"{name}\" in {path:#?}")))
        })
        .collect()
}
