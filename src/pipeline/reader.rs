//! The batching reader: a single coordinator that owns all input streams and
//! hands out batches of complete read groups to the worker threads.

use crate::io::ReadFileZip;
use bio::io::fastq;
use std::{
    collections::VecDeque,
    io::BufReader,
    path::{Path, PathBuf},
};

/// Target size of one batch in raw sequence bytes. Batches always contain
/// complete read groups, so the bound is approximate.
pub(crate) const BATCH_CAPACITY_BYTES: usize = 8 * 1024 * 1024;

type RecordStream = fastq::Records<BufReader<ReadFileZip>>;

/// One read unit: `n_files` records, one per stream.
#[derive(Debug)]
pub(crate) struct ReadGroup {
    pub records: Vec<fastq::Record>,
}

impl ReadGroup {
    /// Approximate memory footprint, used to bound batches.
    fn raw_len(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.seq().len() + record.qual().len() + record.id().len() + 8)
            .sum()
    }
}

/// A batch of read groups carrying its monotonically increasing id, which the
/// writer gate uses to restore input order.
#[derive(Debug)]
pub(crate) struct Batch {
    pub id:     u64,
    pub groups: Vec<ReadGroup>,
}

/// The coordinator over all input files.
///
/// In grouped mode the files are processed `n_files` at a time, the streams
/// of each set read in lockstep. In interleaved mode a single file carries
/// `n_files` consecutive records per read unit.
pub(crate) struct BatchReader {
    queue:       VecDeque<Vec<PathBuf>>,
    current:     Vec<(PathBuf, RecordStream)>,
    n_files:     usize,
    interleaved: bool,
    capacity:    usize,
    next_id:     u64,
    finished:    bool,
}

impl BatchReader {
    /// Sets up the reader over `files`, with `capacity` bounding the raw
    /// bytes per batch. Interleaved mode is chosen when a single file is
    /// given for a multi-stream run; otherwise the file count must be a
    /// multiple of `n_files` (validated by the argument layer).
    pub fn new(files: &[PathBuf], n_files: usize, capacity: usize) -> std::io::Result<Self> {
        let interleaved = files.len() == 1 && n_files > 1;
        let queue: VecDeque<Vec<PathBuf>> = if interleaved {
            VecDeque::from([files.to_vec()])
        } else {
            files.chunks(n_files).map(<[PathBuf]>::to_vec).collect()
        };

        Ok(Self {
            queue,
            current: Vec::new(),
            n_files,
            interleaved,
            capacity,
            next_id: 0,
            finished: false,
        })
    }

    /// The id the next fetched batch will carry; used for error context.
    #[inline]
    pub fn next_batch_id(&self) -> u64 {
        self.next_id
    }

    /// Pulls the next batch, or `None` once the input is exhausted. Only
    /// complete read groups are included; a group that does not fit rolls
    /// into the next batch's byte budget instead of being split.
    pub fn fetch(&mut self) -> std::io::Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }

        let mut groups = Vec::new();
        let mut bytes = 0usize;
        loop {
            match self.next_group()? {
                Some(group) => {
                    bytes += group.raw_len();
                    groups.push(group);
                    if bytes >= self.capacity {
                        break;
                    }
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if groups.is_empty() {
            return Ok(None);
        }
        let batch = Batch {
            id: self.next_id,
            groups,
        };
        self.next_id += 1;
        Ok(Some(batch))
    }

    fn next_group(&mut self) -> std::io::Result<Option<ReadGroup>> {
        'sets: loop {
            if self.current.is_empty() {
                let Some(paths) = self.queue.pop_front() else {
                    return Ok(None);
                };
                self.current = paths
                    .into_iter()
                    .map(|path| {
                        let reader = ReadFileZip::open(&path)?;
                        Ok((path, fastq::Reader::new(reader).records()))
                    })
                    .collect::<std::io::Result<_>>()?;
            }

            let mut records = Vec::with_capacity(self.n_files);
            if self.interleaved {
                let (path, stream) = &mut self.current[0];
                for i in 0..self.n_files {
                    match stream.next() {
                        Some(Ok(record)) => records.push(record),
                        Some(Err(e)) => return Err(annotate(e, path)),
                        None if i == 0 => {
                            self.current.clear();
                            continue 'sets;
                        }
                        None => {
                            return Err(std::io::Error::other(format!(
                                "The interleaved input {path:#?} ended in the middle of a read unit"
                            )));
                        }
                    }
                }
            } else {
                for i in 0..self.current.len() {
                    let (path, stream) = &mut self.current[i];
                    match stream.next() {
                        Some(Ok(record)) => records.push(record),
                        Some(Err(e)) => return Err(annotate(e, path)),
                        None if i == 0 => {
                            // This file set is done; its streams must agree
                            for (other, stream) in &mut self.current[1..] {
                                if stream.next().is_some() {
                                    return Err(std::io::Error::other(format!(
                                        "Extra reads were found in {other:#?} after its paired file(s) ended"
                                    )));
                                }
                            }
                            self.current.clear();
                            continue 'sets;
                        }
                        None => {
                            return Err(std::io::Error::other(format!(
                                "{path:#?} ran out of reads before its paired file(s)"
                            )));
                        }
                    }
                }
            }

            return Ok(Some(ReadGroup { records }));
        }
    }
}

fn annotate(error: fastq::Error, path: &Path) -> std::io::Error {
    std::io::Error::other(format!("Failed to parse {path:#?} due to the error:\n{error}"))
}
