//! The parallel read-processing pipeline: a single batching reader behind a
//! mutex, worker threads scanning batches concurrently, and a writer gate
//! that releases workers in batch order so every destination preserves input
//! order.
//!
//! Cancellation is cooperative: the first failure sets a shutdown flag that
//! is checked at batch boundaries. Batches already fetched are scanned and
//! written; nothing further is read. The recorded error is surfaced once all
//! workers have quiesced.

use crate::{
    errors::DemuxError,
    index::{TagIndex, scanner::{GroupResult, ReadScanner}},
    mapping::BarcodeMapping,
};
use std::{
    path::PathBuf,
    sync::{
        Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

pub(crate) mod reader;
pub(crate) mod writer;

use reader::BatchReader;
pub(crate) use writer::SinkOptions;
use writer::OutputSink;

/// Everything the pipeline needs beyond the index.
pub struct PipelineOptions {
    pub(crate) files:       Vec<PathBuf>,
    pub(crate) threads:     usize,
    /// Raw bytes per batch; [`reader::BATCH_CAPACITY_BYTES`] outside of tests.
    pub(crate) batch_bytes: usize,
    pub(crate) sink:        SinkOptions,
}

/// The outcome of a completed run.
pub struct PipelineSummary {
    /// Total read units processed.
    pub groups: u64,
    /// Read units that classified to a bucket (or all units with trim-only).
    pub assigned: u64,
    /// The final vector -> bucket mapping, ready to be written to disk.
    pub mapping: BarcodeMapping,
}

/// Runs the pipeline to completion over a closed index.
///
/// ## Errors
///
/// Destination creation failures are returned before any read is processed.
/// The first I/O failure during processing is returned with its batch id
/// after all workers have drained.
pub fn run(index: &TagIndex, options: PipelineOptions, mapping: BarcodeMapping) -> Result<PipelineSummary, DemuxError> {
    let PipelineOptions { files, threads, batch_bytes, sink } = options;

    let reader = Mutex::new(BatchReader::new(&files, index.n_files(), batch_bytes)?);
    let sink = Mutex::new(OutputSink::new(sink, mapping)?);
    let turn = Condvar::new();
    let shutdown = AtomicBool::new(false);
    let failure: Mutex<Option<DemuxError>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            scope.spawn(|| worker_loop(index, &reader, &sink, &turn, &shutdown, &failure));
        }
    });

    if let Some(error) = failure.into_inner().unwrap() {
        return Err(error);
    }

    let (stats, mapping) = sink.into_inner().unwrap().finish()?;
    Ok(PipelineSummary {
        groups: stats.groups,
        assigned: stats.assigned,
        mapping,
    })
}

fn worker_loop(
    index: &TagIndex, reader: &Mutex<BatchReader>, sink: &Mutex<OutputSink>, turn: &Condvar, shutdown: &AtomicBool,
    failure: &Mutex<Option<DemuxError>>,
) {
    let mut scanner = ReadScanner::new(index);

    loop {
        let batch = {
            let mut reader = reader.lock().unwrap();
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            match reader.fetch() {
                Ok(Some(batch)) => batch,
                Ok(None) => return,
                Err(source) => {
                    let batch_id = reader.next_batch_id();
                    record_failure(failure, shutdown, DemuxError::BatchIo { batch_id, source });
                    return;
                }
            }
        };

        let results: Vec<GroupResult> = batch
            .groups
            .iter()
            .map(|group| {
                let seqs: Vec<&[u8]> = group.records.iter().map(|record| record.seq()).collect();
                scanner.scan_group(&seqs)
            })
            .collect();

        // The writer gate: wait until this batch is next in input order. A
        // batch that was already fetched is always written, even during
        // shutdown, so the id sequence stays gap-free and no worker stalls.
        let mut sink = sink.lock().unwrap();
        while sink.next_batch() != batch.id {
            sink = turn.wait(sink).unwrap();
        }
        for (group, result) in batch.groups.iter().zip(&results) {
            if let Err(source) = sink.write_group(group, result) {
                record_failure(failure, shutdown, DemuxError::BatchIo {
                    batch_id: batch.id,
                    source,
                });
                break;
            }
        }
        sink.advance_batch();
        turn.notify_all();
    }
}

/// Records the first failure and requests shutdown.
fn record_failure(failure: &Mutex<Option<DemuxError>>, shutdown: &AtomicBool, error: DemuxError) {
    shutdown.store(true, Ordering::Relaxed);
    let mut failure = failure.lock().unwrap();
    if failure.is_none() {
        *failure = Some(error);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::{TagSpec, Trim, attributes::Location};
    use std::{fs, io::Write, path::Path};
    use tempfile::tempdir;

    fn write_fastq(path: &Path, reads: &[(String, String)]) {
        let mut file = fs::File::create(path).unwrap();
        for (id, seq) in reads {
            writeln!(file, "@{id}\n{seq}\n+\n{q}", q = "I".repeat(seq.len())).unwrap();
        }
    }

    fn read_ids(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .step_by(4)
            .map(|line| line.trim_start_matches('@').to_string())
            .collect()
    }

    fn anchor_index(n_files: usize) -> TagIndex {
        let mut index = TagIndex::new(n_files);
        index
            .add_tag(TagSpec {
                barcode: "ACGT".to_string(),
                name: "anchor".to_string(),
                location: Location {
                    file:  0,
                    start: 0,
                    end:   4,
                },
                trim: Trim::Left(0),
                ..TagSpec::default()
            })
            .unwrap();
        index.close().unwrap();
        index
    }

    fn options(files: Vec<PathBuf>, threads: usize, sink: SinkOptions) -> PipelineOptions {
        // A tiny batch budget so that multi-threaded tests push many batches
        // through the writer gate
        PipelineOptions {
            files,
            threads,
            batch_bytes: 256,
            sink,
        }
    }

    #[test]
    fn output_preserves_input_order_across_threads() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.fastq");
        // Alternate assigned/unassigned so both destinations see a
        // deterministic sub-sequence
        let reads: Vec<(String, String)> = (0..5000)
            .map(|i| {
                let body = "G".repeat(40);
                if i % 2 == 0 {
                    (format!("read{i}"), format!("ACGT{body}"))
                } else {
                    (format!("read{i}"), format!("TTTT{body}"))
                }
            })
            .collect();
        write_fastq(&input, &reads);

        for threads in [1, 4] {
            let out = dir.path().join(format!("out_t{threads}.fastq"));
            let unassigned = dir.path().join(format!("un_t{threads}.fastq"));
            let index = anchor_index(1);
            let summary = run(
                &index,
                options(vec![input.clone()], threads, SinkOptions {
                    n_files: 1,
                    output_files: vec![out.clone()],
                    unassigned_files: vec![unassigned.clone()],
                    outb_file: Some(dir.path().join(format!("bc_t{threads}.fastq"))),
                    ..SinkOptions::default()
                }),
                BarcodeMapping::new(),
            )
            .unwrap();

            assert_eq!(summary.groups, 5000);
            assert_eq!(summary.assigned, 2500);

            let expected_assigned: Vec<String> = (0..5000).step_by(2).map(|i| format!("read{i}")).collect();
            let expected_unassigned: Vec<String> = (1..5000).step_by(2).map(|i| format!("read{i}")).collect();
            assert_eq!(read_ids(&out), expected_assigned, "threads = {threads}");
            assert_eq!(read_ids(&unassigned), expected_unassigned, "threads = {threads}");
        }
    }

    #[test]
    fn trimming_and_buckets_flow_to_disk() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.fastq");
        write_fastq(&input, &[("r0".to_string(), "ACGTGGGG".to_string())]);

        let out = dir.path().join("out.fastq");
        let barcodes = dir.path().join("bc.fastq");
        let index = anchor_index(1);
        let summary = run(
            &index,
            options(vec![input], 2, SinkOptions {
                n_files: 1,
                output_files: vec![out.clone()],
                outb_file: Some(barcodes.clone()),
                ..SinkOptions::default()
            }),
            BarcodeMapping::new(),
        )
        .unwrap();

        assert_eq!(summary.mapping.num_buckets(), 1);

        let contents = fs::read_to_string(&out).unwrap();
        // The anchor is excised by its left trim
        assert_eq!(contents, "@r0\nGGGG\n+\nIIII\n");

        let barcode_contents = fs::read_to_string(&barcodes).unwrap();
        assert!(barcode_contents.starts_with("@r0\n"));
        assert!(barcode_contents.contains(&crate::mapping::bucket_barcode(0)));
    }

    #[test]
    fn paired_streams_demultiplex_in_lockstep() {
        let dir = tempdir().unwrap();
        let r1 = dir.path().join("r1.fastq");
        let r2 = dir.path().join("r2.fastq");
        let reads1: Vec<(String, String)> = (0..200)
            .map(|i| (format!("p{i}/1"), format!("ACGT{}", "C".repeat(20))))
            .collect();
        let reads2: Vec<(String, String)> = (0..200).map(|i| (format!("p{i}/2"), "T".repeat(24))).collect();
        write_fastq(&r1, &reads1);
        write_fastq(&r2, &reads2);

        let out1 = dir.path().join("out1.fastq");
        let out2 = dir.path().join("out2.fastq");
        let index = anchor_index(2);
        let summary = run(
            &index,
            options(vec![r1, r2], 3, SinkOptions {
                n_files: 2,
                output_files: vec![out1.clone(), out2.clone()],
                outb_file: Some(dir.path().join("bc.fastq")),
                ..SinkOptions::default()
            }),
            BarcodeMapping::new(),
        )
        .unwrap();

        assert_eq!(summary.groups, 200);
        assert_eq!(summary.assigned, 200);
        assert_eq!(read_ids(&out1).len(), 200);
        assert_eq!(read_ids(&out2).len(), 200);
        assert_eq!(read_ids(&out1)[0], "p0/1");
        assert_eq!(read_ids(&out2)[0], "p0/2");
    }

    #[test]
    fn interleaved_pairs_keep_order_per_destination() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("interleaved.fastq");
        // Every unit is one R1/R2 pair; odd pairs miss the anchor
        let mut reads = Vec::new();
        for i in 0..2000 {
            let r1 = if i % 2 == 0 {
                format!("ACGT{}", "G".repeat(20))
            } else {
                "A".repeat(24)
            };
            reads.push((format!("p{i}/1"), r1));
            reads.push((format!("p{i}/2"), "T".repeat(24)));
        }
        write_fastq(&input, &reads);

        let out1 = dir.path().join("out1.fastq");
        let out2 = dir.path().join("out2.fastq");
        let un1 = dir.path().join("un1.fastq");
        let un2 = dir.path().join("un2.fastq");
        let index = anchor_index(2);
        let summary = run(
            &index,
            options(vec![input], 4, SinkOptions {
                n_files: 2,
                output_files: vec![out1.clone(), out2.clone()],
                unassigned_files: vec![un1.clone(), un2.clone()],
                outb_file: Some(dir.path().join("bc.fastq")),
                ..SinkOptions::default()
            }),
            BarcodeMapping::new(),
        )
        .unwrap();

        assert_eq!(summary.groups, 2000);
        assert_eq!(summary.assigned, 1000);

        let expected_assigned: Vec<String> = (0..2000).step_by(2).map(|i| format!("p{i}/1")).collect();
        let expected_unassigned: Vec<String> = (1..2000).step_by(2).map(|i| format!("p{i}/1")).collect();
        assert_eq!(read_ids(&out1), expected_assigned);
        assert_eq!(read_ids(&un1), expected_unassigned);
        assert_eq!(read_ids(&out2).len(), 1000);
        assert_eq!(read_ids(&un2).len(), 1000);
    }

    #[test]
    fn missing_input_is_reported_with_a_batch_id() {
        let dir = tempdir().unwrap();
        let index = anchor_index(1);
        let result = run(
            &index,
            options(vec![dir.path().join("nope.fastq")], 2, SinkOptions {
                n_files: 1,
                no_output: true,
                ..SinkOptions::default()
            }),
            BarcodeMapping::new(),
        );
        assert!(matches!(result, Err(DemuxError::BatchIo { batch_id: 0, .. })));
    }
}
