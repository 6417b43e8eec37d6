use crate::utils::whichever::define_whichever;
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use std::{
    fs::File,
    io::{BufWriter, PipeReader, Read, Stdout, Write, stdout},
    path::Path,
    thread::{self, JoinHandle},
};

/// Returns whether the path carries a `gz` extension.
#[inline]
pub(crate) fn is_gz(path: impl AsRef<Path>) -> bool {
    path.as_ref().extension().is_some_and(|ext| ext == "gz")
}

/// A reader for a [gzip file](https://www.rfc-editor.org/rfc/rfc1952#page-5)
/// that may have multiple members, decoding eagerly on a separate thread.
///
/// The decoded bytes arrive through an anonymous pipe, so the decoder can stay
/// ahead of the consumer. Decode failures are surfaced when EOF is reached and
/// the thread is joined.
pub(crate) struct GzReaderThreaded {
    reader: PipeReader,
    thread: Option<JoinHandle<std::io::Result<()>>>,
}

impl GzReaderThreaded {
    /// Spawns the decode thread over a readable containing gzip data.
    ///
    /// ## Errors
    ///
    /// Any I/O errors when forming the pipe are propagated. Errors occurring
    /// during decoding appear when reading from the [`GzReaderThreaded`].
    pub fn from_readable<R>(readable: R) -> std::io::Result<Self>
    where
        R: Read + Send + 'static, {
        let (reader, mut writer) = std::io::pipe()?;

        let mut decoder = MultiGzDecoder::new(readable);

        let thread = thread::spawn(move || -> std::io::Result<_> {
            // A broken pipe here means the consumer was dropped early; the
            // thread is never joined in that case
            std::io::copy(&mut decoder, &mut writer)?;
            Ok(())
        });

        Ok(Self {
            reader,
            thread: Some(thread),
        })
    }
}

impl Read for GzReaderThreaded {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;

        // Check for EOF
        if bytes_read == 0
            && !buf.is_empty()
            && let Some(thread) = std::mem::take(&mut self.thread)
        {
            thread.join().unwrap()?;
        }

        Ok(bytes_read)
    }
}

define_whichever! {
    #[doc = "An enum for the acceptable read input types"]
    pub(crate) enum ReadFileZip {
        #[doc = "A reader for a regular uncompressed file"]
        File(File),
        #[doc = "A reader for a gzip compressed file, decoded on a separate thread"]
        Zipped(GzReaderThreaded),
    }

    impl Read for ReadFileZip {}
}

impl ReadFileZip {
    /// Opens a [`ReadFileZip`] from a path. The [`Zipped`] variant is chosen if
    /// the file has extension `gz`.
    ///
    /// ## Errors
    ///
    /// Any I/O errors when opening the file or forming the pipe are propagated
    /// with the file name as context.
    ///
    /// [`Zipped`]: ReadFileZip::Zipped
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(&path).map_err(|e| {
            std::io::Error::other(format!(
                "Failed to open {path:#?} for reading due to the error:\n{e}",
                path = path.as_ref()
            ))
        })?;

        if is_gz(&path) {
            Ok(ReadFileZip::Zipped(GzReaderThreaded::from_readable(file)?))
        } else {
            Ok(ReadFileZip::File(file))
        }
    }
}

define_whichever! {
    #[doc = "An enum for the acceptable output types. A [`BufWriter`] is used for all variants."]
    pub(crate) enum WriteFileZipStdout {
        #[doc = "A writer for a regular uncompressed file"]
        File(BufWriter<File>),
        #[doc = "A writer for a gzip compressed file"]
        Zipped(GzEncoder<BufWriter<File>>),
        #[doc = "A writer for uncompressed data to stdout"]
        Stdout(BufWriter<Stdout>),
    }

    impl Write for WriteFileZipStdout {}
}

impl WriteFileZipStdout {
    /// Creates a writer for `path`. The [`Zipped`] variant is chosen if the
    /// file has extension `gz` or if `force_gzip` is set.
    ///
    /// ## Errors
    ///
    /// Any I/O errors when creating the file are propagated with the file name
    /// as context.
    ///
    /// [`Zipped`]: WriteFileZipStdout::Zipped
    pub fn create(path: impl AsRef<Path>, force_gzip: bool) -> std::io::Result<Self> {
        let file = File::create(&path).map_err(|e| {
            std::io::Error::other(format!(
                "Failed to open {path:#?} for writing due to the error:\n{e}",
                path = path.as_ref()
            ))
        })?;
        let bufwriter = BufWriter::new(file);

        let writer = if force_gzip || is_gz(path) {
            Self::Zipped(GzEncoder::new(bufwriter, Compression::default()))
        } else {
            Self::File(bufwriter)
        };

        Ok(writer)
    }

    /// Creates a writer for stdout.
    #[inline]
    pub fn stdout() -> Self {
        Self::Stdout(BufWriter::new(stdout()))
    }

    /// Flushes the writer, completing the gzip stream for the [`Zipped`]
    /// variant. Must be called before dropping the writer, since a gzip stream
    /// that is never finished is truncated.
    ///
    /// [`Zipped`]: WriteFileZipStdout::Zipped
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            WriteFileZipStdout::File(mut w) => w.flush(),
            WriteFileZipStdout::Zipped(encoder) => encoder.finish()?.flush(),
            WriteFileZipStdout::Stdout(mut w) => w.flush(),
        }
    }
}

/// Writes a four-line FASTQ record.
#[inline]
pub(crate) fn write_fastq_record<W: Write>(writer: &mut W, name: &str, seq: &[u8], qual: &[u8]) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")
}
