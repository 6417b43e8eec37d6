//! The command-line surface and its cross-option validation. Clap handles the
//! per-option syntax; [`DemuxArgs::validate`] performs the checks that span
//! options and distills everything into the settings the engine consumes.

use crate::{
    errors::DemuxError,
    index::{TagSpec, Trim, attributes},
    pipeline::{PipelineOptions, SinkOptions, reader::BATCH_CAPACITY_BYTES},
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct DemuxArgs {
    /// Input FASTQ files, plain or gzipped. A single file with --n-fastqs
    /// greater than one is read as interleaved.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    /// Number of worker threads to use.
    pub threads: usize,

    #[arg(short = 'N', long, default_value_t = 1)]
    /// Number of FASTQ files (streams) per read unit; specify 2 for
    /// paired-end.
    pub n_fastqs: usize,

    #[arg(short = 'b', long, conflicts_with = "config")]
    /// List of tag sequences (comma-separated).
    pub barcodes: Option<String>,

    #[arg(short = 'd', long, requires = "barcodes")]
    /// List of error distance (mismatch:indel:total) thresholds
    /// (comma-separated; a single value applies to all tags).
    pub distances: Option<String>,

    #[arg(short = 'l', long, requires = "barcodes")]
    /// List of locations (file:pos1:pos2) (comma-separated; a single value
    /// applies to all tags).
    pub locations: Option<String>,

    #[arg(short = 'i', long, requires = "barcodes")]
    /// List of tag names/identifiers (comma-separated).
    pub ids: Option<String>,

    #[arg(short = 'f', long, requires = "barcodes")]
    /// List of minimum times a tag must be found in a read (comma-separated;
    /// a single value applies to all tags).
    pub min_finds: Option<String>,

    #[arg(short = 'F', long, requires = "barcodes")]
    /// List of maximum times a tag can be found in a read, 0 = unlimited
    /// (comma-separated; a single value applies to all tags).
    pub max_finds: Option<String>,

    #[arg(short = 'e', long, requires = "barcodes")]
    /// List of what to exclude from the final barcode (comma-separated;
    /// 1 = exclude, 0 = include).
    pub exclude: Option<String>,

    #[arg(short = 'L', long, requires = "barcodes")]
    /// List of which tags trim the read from the left (comma-separated;
    /// 1 = trim, 0 = keep; 1:x trims x extra bases beyond the tag).
    pub left: Option<String>,

    #[arg(short = 'R', long, requires = "barcodes")]
    /// List of which tags trim the read from the right (comma-separated;
    /// 1 = trim, 0 = keep; 1:x trims x extra bases beyond the tag).
    pub right: Option<String>,

    #[arg(short = 'c', long)]
    /// Tag table file (alternative to --barcodes).
    pub config: Option<PathBuf>,

    #[arg(short = 'm', long)]
    /// Output file where the mapping between bucket barcodes and tag names is
    /// written.
    pub mapping: Option<PathBuf>,

    #[arg(short = 'o', long, value_delimiter = ',')]
    /// FASTQ file(s) where assigned output is written (comma-separated);
    /// the count must equal --n-fastqs.
    pub output: Vec<PathBuf>,

    #[arg(short = 'O', long)]
    /// FASTQ file where bucket barcodes are written. If not supplied, the
    /// barcodes are prepended to the reads of the first stream.
    pub outb: Option<PathBuf>,

    #[arg(short = 'u', long, value_delimiter = ',')]
    /// FASTQ file(s) where unassigned reads are written (comma-separated);
    /// the count must equal --n-fastqs.
    pub unassigned: Vec<PathBuf>,

    #[arg(short = 'k', long, conflicts_with = "remove")]
    /// File listing the classification vectors to keep, with an optional
    /// per-line output prefix.
    pub keep: Option<PathBuf>,

    #[arg(short = 'r', long)]
    /// File listing the classification vectors to discard.
    pub remove: Option<PathBuf>,

    #[arg(short = 'A', long)]
    /// An existing mapping file whose vector-to-id assignments are preserved
    /// and added on to.
    pub append: Option<PathBuf>,

    #[arg(short = 'E', long)]
    /// Sequence used to fill in reads that are trimmed down to nothing.
    pub empty: Option<String>,

    #[arg(short = 'p', long)]
    /// Write interleaved FASTQ to standard output instead of output files.
    pub pipe: bool,

    #[arg(short = 'T', long)]
    /// Assign and trim every read regardless of tag identification.
    pub trim_only: bool,

    #[arg(long)]
    /// Compress all output FASTQ files with gzip.
    pub gzip: bool,

    #[arg(long)]
    /// Do not output any sequences (statistics only).
    pub no_output: bool,

    #[arg(long)]
    /// Modify the names of output reads to include the bucket barcode.
    pub mod_names: bool,
}

/// Where tag records come from.
pub(crate) enum TagSource {
    Table(PathBuf),
    Inline(Vec<TagSpec>),
}

/// The validated run configuration.
pub struct DemuxSettings {
    pub(crate) n_files:      usize,
    pub(crate) tag_source:   TagSource,
    pub(crate) mapping_file: Option<PathBuf>,
    pub(crate) append_file:  Option<PathBuf>,
    /// The keep/remove list; the flag is true for a remove list.
    pub(crate) filter:  Option<(PathBuf, bool)>,
    pub(crate) verbose: bool,
    pub(crate) pipeline: PipelineOptions,
}

impl DemuxArgs {
    /// Performs the cross-option checks and assembles the run configuration.
    ///
    /// ## Errors
    ///
    /// [`Config`](DemuxError::Config) describing the first inconsistency
    /// found, plus the attribute parser errors for inline tag lists.
    pub fn validate(self) -> Result<DemuxSettings, DemuxError> {
        if self.threads == 0 {
            return Err(DemuxError::Config("The number of threads must be positive".to_string()));
        }
        let cores = num_cpus::get();
        if self.threads > cores {
            eprintln!(
                "Warning: you asked for {threads} threads, but only {cores} cores are available",
                threads = self.threads
            );
        }
        if self.n_fastqs == 0 {
            return Err(DemuxError::Config("--n-fastqs must be a non-zero positive number".to_string()));
        }

        for file in &self.files {
            if !file.exists() {
                return Err(DemuxError::Config(format!("File not found: {file:#?}")));
            }
        }
        if self.files.len() != 1 && !self.files.len().is_multiple_of(self.n_fastqs) {
            return Err(DemuxError::Config(
                "The number of input FASTQ files must be 1 (interleaved) or a multiple of --n-fastqs".to_string(),
            ));
        }

        let tag_source = match (&self.barcodes, &self.config) {
            (None, None) => {
                return Err(DemuxError::Config(
                    "Either --barcodes or --config must be supplied".to_string(),
                ));
            }
            (Some(_), _) => TagSource::Inline(self.build_inline_specs()?),
            (None, Some(path)) => TagSource::Table(path.clone()),
        };

        if self.trim_only {
            if self.mapping.is_some() {
                return Err(DemuxError::Config("Cannot use --trim-only with --mapping".to_string()));
            }
            if !self.unassigned.is_empty() {
                return Err(DemuxError::Config("Cannot use --trim-only with --unassigned".to_string()));
            }
            if self.outb.is_some() {
                return Err(DemuxError::Config("Cannot use --trim-only with --outb".to_string()));
            }
            if self.no_output {
                return Err(DemuxError::Config("Cannot use --trim-only with --no-output".to_string()));
            }
        } else if self.mapping.is_none() {
            return Err(DemuxError::Config("--mapping must be provided".to_string()));
        }

        let output_files_specified = !self.output.is_empty() || !self.unassigned.is_empty() || self.outb.is_some();
        if self.no_output {
            if output_files_specified || self.pipe {
                return Err(DemuxError::Config(
                    "Cannot specify an output option when --no-output is specified".to_string(),
                ));
            }
            if self.mod_names {
                return Err(DemuxError::Config(
                    "Cannot use --mod-names when --no-output is specified".to_string(),
                ));
            }
            if self.gzip {
                return Err(DemuxError::Config(
                    "Cannot use --gzip when --no-output is specified".to_string(),
                ));
            }
        } else if !output_files_specified && !self.pipe {
            return Err(DemuxError::Config(
                "Must either specify an output option or --no-output".to_string(),
            ));
        } else if self.pipe {
            if !self.output.is_empty() || self.outb.is_some() {
                return Err(DemuxError::Config(
                    "Cannot provide output files when --pipe is specified".to_string(),
                ));
            }
            if self.gzip && self.unassigned.is_empty() {
                return Err(DemuxError::Config(
                    "Cannot use --gzip when no output files are specified".to_string(),
                ));
            }
        } else {
            if !self.output.is_empty() && self.output.len() != self.n_fastqs {
                return Err(DemuxError::Config(
                    "The number of --output files must equal --n-fastqs".to_string(),
                ));
            }
            if self.output.is_empty() {
                return Err(DemuxError::Config("--output not provided".to_string()));
            }
        }
        if !self.unassigned.is_empty() && self.unassigned.len() != self.n_fastqs {
            return Err(DemuxError::Config(
                "The number of --unassigned files must equal --n-fastqs".to_string(),
            ));
        }

        let empty_fill = self.empty.map(|fill| fill.to_ascii_uppercase().into_bytes());
        let filter = match (self.keep, self.remove) {
            (Some(path), _) => Some((path, false)),
            (None, Some(path)) => Some((path, true)),
            (None, None) => None,
        };

        Ok(DemuxSettings {
            n_files: self.n_fastqs,
            tag_source,
            mapping_file: self.mapping,
            append_file: self.append,
            filter,
            verbose: !self.pipe,
            pipeline: PipelineOptions {
                files:       self.files,
                threads:     self.threads,
                batch_bytes: BATCH_CAPACITY_BYTES,
                sink:        SinkOptions {
                    n_files:          self.n_fastqs,
                    gzip:             self.gzip,
                    pipe:             self.pipe,
                    no_output:        self.no_output,
                    trim_only:        self.trim_only,
                    mod_names:        self.mod_names,
                    empty_fill,
                    output_files:     self.output,
                    unassigned_files: self.unassigned,
                    outb_file:        self.outb,
                },
            },
        })
    }

    /// Assembles tag specs from the parallel comma-separated lists.
    fn build_inline_specs(&self) -> Result<Vec<TagSpec>, DemuxError> {
        let barcodes: Vec<&str> = self.barcodes.as_deref().unwrap_or_default().split(',').collect();
        let n = barcodes.len();

        let distances = expand_values(&self.distances, n, "distances")?;
        let locations = expand_values(&self.locations, n, "locations")?;
        let min_finds = expand_values(&self.min_finds, n, "min-finds")?;
        let max_finds = expand_values(&self.max_finds, n, "max-finds")?;
        let lefts = expand_values(&self.left, n, "left")?;
        let rights = expand_values(&self.right, n, "right")?;
        let ids = exact_values(&self.ids, n, "ids")?;
        let excludes = exact_values(&self.exclude, n, "exclude")?;

        let mut specs = Vec::with_capacity(n);
        for i in 0..n {
            let trim_left = attributes::parse_trim(&lefts[i])?;
            let trim_right = attributes::parse_trim(&rights[i])?;
            let trim = match (trim_left, trim_right) {
                (Some(_), Some(_)) => {
                    return Err(DemuxError::Config(
                        "One of the tags has both --left and --right trimming specified".to_string(),
                    ));
                }
                (Some(extra), None) => Trim::Left(extra),
                (None, Some(extra)) => Trim::Right(extra),
                (None, None) => Trim::None,
            };

            specs.push(TagSpec {
                barcode: barcodes[i].to_string(),
                name: ids[i].clone(),
                distance: attributes::parse_distance(&distances[i])?,
                location: attributes::parse_location(&locations[i], Some(self.n_fastqs))?,
                min_finds: parse_finds(&min_finds[i], "min-finds")?,
                max_finds: parse_finds(&max_finds[i], "max-finds")?,
                exclude: parse_flag(&excludes[i], "exclude")?,
                trim,
            });
        }
        Ok(specs)
    }
}

/// Splits a comma-separated option into one value per tag; a single value is
/// broadcast across all tags, and an absent option yields empty strings (the
/// attribute defaults).
fn expand_values(option: &Option<String>, n: usize, what: &str) -> Result<Vec<String>, DemuxError> {
    match option {
        None => Ok(vec![String::new(); n]),
        Some(list) => {
            let values: Vec<String> = list.split(',').map(str::to_string).collect();
            if values.len() == n {
                Ok(values)
            } else if values.len() == 1 {
                Ok(vec![values[0].clone(); n])
            } else {
                Err(DemuxError::Config(format!(
                    "The number of values in --{what} does not match that in --barcodes"
                )))
            }
        }
    }
}

/// As [`expand_values`], but without broadcasting: the count must match the
/// tag count exactly.
fn exact_values(option: &Option<String>, n: usize, what: &str) -> Result<Vec<String>, DemuxError> {
    match option {
        None => Ok(vec![String::new(); n]),
        Some(list) => {
            let values: Vec<String> = list.split(',').map(str::to_string).collect();
            if values.len() == n {
                Ok(values)
            } else {
                Err(DemuxError::Config(format!(
                    "The number of values in --{what} does not match that in --barcodes"
                )))
            }
        }
    }
}

fn parse_finds(value: &str, what: &str) -> Result<u16, DemuxError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<u16>()
        .map_err(|_| DemuxError::Config(format!("--{what} must contain non-negative integers, found \"{value}\"")))
}

fn parse_flag(value: &str, what: &str) -> Result<bool, DemuxError> {
    match value {
        "" | "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(DemuxError::Config(format!(
            "--{what} must contain 0 or 1 values, found \"{value}\""
        ))),
    }
}
