//! The ordered output side of the pipeline: all destination writers, the
//! bucket mapping, and the running statistics live behind a single gate that
//! workers pass through in batch order.

use crate::{
    errors::DemuxError,
    index::scanner::GroupResult,
    io::{WriteFileZipStdout, write_fastq_record},
    mapping::{BUCKET_BARCODE_LEN, BarcodeMapping, bucket_barcode},
    pipeline::reader::ReadGroup,
};
use bio::io::fastq;
use foldhash::HashMap;
use std::path::PathBuf;

/// Quality symbol for synthesized bases (bucket barcodes and empty-read
/// filler).
const SYNTHETIC_QUAL: u8 = b'K';

/// Output configuration distilled from the command line.
#[derive(Debug, Default)]
pub(crate) struct SinkOptions {
    pub n_files:          usize,
    pub gzip:             bool,
    pub pipe:             bool,
    pub no_output:        bool,
    pub trim_only:        bool,
    pub mod_names:        bool,
    pub empty_fill:       Option<Vec<u8>>,
    pub output_files:     Vec<PathBuf>,
    pub unassigned_files: Vec<PathBuf>,
    pub outb_file:        Option<PathBuf>,
}

/// Running totals, reported in the shutdown summary.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SinkStats {
    pub groups:   u64,
    pub assigned: u64,
}

/// Per-stream writers for a keep-list bucket routed to its own prefix.
struct RoutedSet {
    streams:  Vec<WriteFileZipStdout>,
    barcodes: Option<WriteFileZipStdout>,
}

/// All output destinations plus the bucket mapping. Exclusively accessed by
/// the worker whose batch is next to write, so bucket ids are allocated in
/// input order and every destination preserves input order.
pub(crate) struct OutputSink {
    opts:           SinkOptions,
    next_batch:     u64,
    assigned_out:   Vec<WriteFileZipStdout>,
    unassigned_out: Vec<WriteFileZipStdout>,
    barcode_out:    Option<WriteFileZipStdout>,
    routed_out:     HashMap<String, RoutedSet>,
    pipe_out:       Option<WriteFileZipStdout>,
    mapping:        BarcodeMapping,
    stats:          SinkStats,
}

impl OutputSink {
    /// Opens every destination up front so that creation failures surface
    /// before any read is processed.
    pub fn new(opts: SinkOptions, mapping: BarcodeMapping) -> Result<Self, DemuxError> {
        let mut assigned_out = Vec::new();
        let mut unassigned_out = Vec::new();
        let mut barcode_out = None;
        let mut routed_out = HashMap::default();
        let mut pipe_out = None;

        if !opts.no_output {
            if opts.pipe {
                pipe_out = Some(WriteFileZipStdout::stdout());
            } else {
                for path in &opts.output_files {
                    assigned_out.push(WriteFileZipStdout::create(path, opts.gzip)?);
                }
                if let Some(path) = &opts.outb_file {
                    barcode_out = Some(WriteFileZipStdout::create(path, opts.gzip)?);
                }
            }
            for path in &opts.unassigned_files {
                unassigned_out.push(WriteFileZipStdout::create(path, opts.gzip)?);
            }

            let suffix = if opts.gzip { ".fastq.gz" } else { ".fastq" };
            for prefix in mapping.route_prefixes() {
                let mut streams = Vec::with_capacity(opts.n_files);
                for i in 0..opts.n_files {
                    streams.push(WriteFileZipStdout::create(format!("{prefix}_{i}{suffix}"), opts.gzip)?);
                }
                let barcodes = if opts.outb_file.is_some() {
                    Some(WriteFileZipStdout::create(format!("{prefix}_barcodes{suffix}"), opts.gzip)?)
                } else {
                    None
                };
                routed_out.insert(prefix.to_string(), RoutedSet { streams, barcodes });
            }
        }

        Ok(Self {
            opts,
            next_batch: 0,
            assigned_out,
            unassigned_out,
            barcode_out,
            routed_out,
            pipe_out,
            mapping,
            stats: SinkStats::default(),
        })
    }

    #[inline]
    pub fn next_batch(&self) -> u64 {
        self.next_batch
    }

    #[inline]
    pub fn advance_batch(&mut self) {
        self.next_batch += 1;
    }

    /// Writes one scanned read group to its destination.
    pub fn write_group(&mut self, group: &ReadGroup, result: &GroupResult) -> std::io::Result<()> {
        self.stats.groups += 1;

        let assigned = self.opts.trim_only || (result.assigned && self.mapping.passes_filter(&result.vector));
        if !assigned {
            // Unassigned reads leave untrimmed
            for (record, writer) in group.records.iter().zip(&mut self.unassigned_out) {
                let name = record_name(record);
                write_fastq_record(writer, &name, record.seq(), record.qual())?;
            }
            return Ok(());
        }
        self.stats.assigned += 1;

        if self.opts.trim_only {
            return self.write_trimmed(group, result, None);
        }

        let bucket = self.mapping.assign(&result.vector);
        if self.opts.no_output {
            return Ok(());
        }
        let word = bucket_barcode(bucket);

        if let Some(prefix) = self.mapping.route_prefix(&result.vector) {
            let prefix = prefix.to_string();
            self.write_routed(group, result, &prefix, &word)
        } else {
            self.write_trimmed(group, result, Some(&word))
        }
    }

    /// Writes the group to the shared assigned destinations (or the pipe).
    fn write_trimmed(&mut self, group: &ReadGroup, result: &GroupResult, word: Option<&str>) -> std::io::Result<()> {
        let prepend = word.filter(|_| self.barcode_out.is_none());

        if let Some(word) = word
            && let Some(writer) = &mut self.barcode_out
        {
            let name = record_name(&group.records[0]);
            write_fastq_record(writer, &name, word.as_bytes(), &[SYNTHETIC_QUAL; BUCKET_BARCODE_LEN])?;
        }

        for (file, record) in group.records.iter().enumerate() {
            let (start, end) = result.keep[file];
            let target = match (&mut self.pipe_out, self.assigned_out.get_mut(file)) {
                (Some(pipe), _) => pipe,
                (None, Some(writer)) => writer,
                (None, None) => continue,
            };
            emit_record(
                target,
                record,
                (start, end),
                word.filter(|_| self.opts.mod_names),
                prepend.filter(|_| file == 0),
                self.opts.empty_fill.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Writes the group to the dedicated files of a keep-list prefix.
    fn write_routed(&mut self, group: &ReadGroup, result: &GroupResult, prefix: &str, word: &str) -> std::io::Result<()> {
        let Some(routed) = self.routed_out.get_mut(prefix) else {
            return Ok(());
        };

        let prepend = if routed.barcodes.is_none() { Some(word) } else { None };
        if let Some(writer) = &mut routed.barcodes {
            let name = record_name(&group.records[0]);
            write_fastq_record(writer, &name, word.as_bytes(), &[SYNTHETIC_QUAL; BUCKET_BARCODE_LEN])?;
        }

        for (file, record) in group.records.iter().enumerate() {
            let Some(writer) = routed.streams.get_mut(file) else {
                continue;
            };
            emit_record(
                writer,
                record,
                result.keep[file],
                if self.opts.mod_names { Some(word) } else { None },
                prepend.filter(|_| file == 0),
                self.opts.empty_fill.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Flushes and finishes every destination, returning the statistics and
    /// the final mapping.
    pub fn finish(self) -> Result<(SinkStats, BarcodeMapping), DemuxError> {
        for writer in self.assigned_out {
            writer.finish()?;
        }
        for writer in self.unassigned_out {
            writer.finish()?;
        }
        if let Some(writer) = self.barcode_out {
            writer.finish()?;
        }
        for (_, routed) in self.routed_out {
            for writer in routed.streams {
                writer.finish()?;
            }
            if let Some(writer) = routed.barcodes {
                writer.finish()?;
            }
        }
        if let Some(writer) = self.pipe_out {
            writer.finish()?;
        }
        Ok((self.stats, self.mapping))
    }
}

/// The full record name: id plus the description, when present.
fn record_name(record: &fastq::Record) -> String {
    match record.desc() {
        Some(desc) => format!("{} {}", record.id(), desc),
        None => record.id().to_string(),
    }
}

/// Writes one read with its trim range applied, optionally renaming it after
/// the bucket, prepending the bucket barcode, or substituting the empty-read
/// filler.
fn emit_record(
    writer: &mut WriteFileZipStdout, record: &fastq::Record, keep: (usize, usize), rename: Option<&str>,
    prepend: Option<&str>, empty_fill: Option<&[u8]>,
) -> std::io::Result<()> {
    let (start, end) = keep;
    let mut seq: &[u8] = &record.seq()[start..end];
    let mut qual: &[u8] = &record.qual()[start..end];

    let fill_qual;
    if seq.is_empty()
        && let Some(fill) = empty_fill
    {
        seq = fill;
        fill_qual = vec![SYNTHETIC_QUAL; fill.len()];
        qual = &fill_qual;
    }

    let mut name = record_name(record);
    if let Some(word) = rename {
        name = format!("{name}::{word}");
    }

    match prepend {
        Some(word) => {
            let mut full_seq = Vec::with_capacity(word.len() + seq.len());
            full_seq.extend_from_slice(word.as_bytes());
            full_seq.extend_from_slice(seq);
            let mut full_qual = vec![SYNTHETIC_QUAL; word.len()];
            full_qual.extend_from_slice(qual);
            write_fastq_record(writer, &name, &full_seq, &full_qual)
        }
        None => write_fastq_record(writer, &name, seq, qual),
    }
}
