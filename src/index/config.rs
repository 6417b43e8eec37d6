//! Loader for the tag table: a whitespace-delimited text file whose header
//! names the columns. `BARCODES` is mandatory; `#` comments and blank lines
//! are skipped; header names are case-insensitive.

use crate::{
    errors::DemuxError,
    index::{TagIndex, TagSpec, Trim, attributes},
};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Barcodes,
    Distances,
    Locations,
    Ids,
    MinFinds,
    MaxFinds,
    Exclude,
    Left,
    Right,
}

impl Column {
    fn from_header(field: &str) -> Option<Self> {
        match field.to_ascii_uppercase().as_str() {
            "BARCODES" => Some(Column::Barcodes),
            "DISTANCES" => Some(Column::Distances),
            "LOCATIONS" => Some(Column::Locations),
            "IDS" => Some(Column::Ids),
            "MINFINDS" => Some(Column::MinFinds),
            "MAXFINDS" => Some(Column::MaxFinds),
            "EXCLUDE" => Some(Column::Exclude),
            "LEFT" => Some(Column::Left),
            "RIGHT" => Some(Column::Right),
            _ => None,
        }
    }
}

impl TagIndex {
    /// Loads a tag table and registers its rows with [`add_tag`].
    ///
    /// ## Errors
    ///
    /// [`Config`] for structural problems with the table (missing or
    /// duplicated headers, unknown columns); the [`add_tag`] errors, with the
    /// row number attached, for invalid rows; [`Io`] if the file cannot be
    /// read.
    ///
    /// [`add_tag`]: TagIndex::add_tag
    /// [`Config`]: DemuxError::Config
    /// [`Io`]: DemuxError::Io
    pub fn load_config(&mut self, path: impl AsRef<Path>) -> Result<(), DemuxError> {
        if self.is_closed() {
            return Err(DemuxError::IndexClosed);
        }

        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            std::io::Error::other(format!("Failed to read the tag table {path:#?} due to the error:\n{e}"))
        })?;

        let mut columns: Vec<Column> = Vec::new();
        for (line_index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let row = line_index + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if columns.is_empty() {
                columns = parse_header(&line, path)?;
                continue;
            }

            let mut spec = TagSpec::default();
            let mut trim_left = None;
            let mut trim_right = None;
            for (i, field) in line.split_whitespace().enumerate() {
                let Some(&column) = columns.get(i) else {
                    return Err(DemuxError::Config(format!(
                        "The tag table {path:#?} has more fields than column headers (row {row})"
                    )));
                };
                match column {
                    Column::Barcodes => spec.barcode = field.to_string(),
                    Column::Distances => spec.distance = attributes::parse_distance(field).map_err(|e| e.at_row(row))?,
                    Column::Locations => {
                        spec.location =
                            attributes::parse_location(field, Some(self.n_files())).map_err(|e| e.at_row(row))?;
                    }
                    Column::Ids => spec.name = field.to_string(),
                    Column::MinFinds => spec.min_finds = parse_finds(field, "MINFINDS", row)?,
                    Column::MaxFinds => spec.max_finds = parse_finds(field, "MAXFINDS", row)?,
                    Column::Exclude => spec.exclude = parse_flag(field, "EXCLUDE", row)?,
                    Column::Left => trim_left = attributes::parse_trim(field).map_err(|e| e.at_row(row))?,
                    Column::Right => trim_right = attributes::parse_trim(field).map_err(|e| e.at_row(row))?,
                }
            }

            spec.trim = match (trim_left, trim_right) {
                (Some(_), Some(_)) => {
                    return Err(DemuxError::InvalidTrim(format!(
                        "a tag cannot be trimmed from both the left and the right (row {row})"
                    )));
                }
                (Some(extra), None) => Trim::Left(extra),
                (None, Some(extra)) => Trim::Right(extra),
                (None, None) => Trim::None,
            };

            self.add_tag(spec).map_err(|e| e.at_row(row))?;
        }

        if columns.is_empty() {
            return Err(DemuxError::Config(format!(
                "The tag table {path:#?} must contain a header with, minimally, a column named BARCODES"
            )));
        }

        Ok(())
    }
}

fn parse_header(line: &str, path: &Path) -> Result<Vec<Column>, DemuxError> {
    let mut columns = Vec::new();
    for field in line.split_whitespace() {
        let Some(column) = Column::from_header(field) else {
            return Err(DemuxError::Config(format!(
                "The tag table {path:#?} contains the invalid column header: {field}"
            )));
        };
        if columns.contains(&column) {
            return Err(DemuxError::Config(format!(
                "The tag table {path:#?} has a header with duplicate column names"
            )));
        }
        columns.push(column);
    }
    if !columns.contains(&Column::Barcodes) {
        return Err(DemuxError::Config(format!(
            "The tag table {path:#?} must contain a header with, minimally, a column named BARCODES"
        )));
    }
    Ok(columns)
}

fn parse_finds(field: &str, column: &str, row: usize) -> Result<u16, DemuxError> {
    field
        .parse::<u16>()
        .map_err(|_| DemuxError::Config(format!("{column} must be a non-negative integer, found \"{field}\" (row {row})")))
}

fn parse_flag(field: &str, column: &str, row: usize) -> Result<bool, DemuxError> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(DemuxError::Config(format!(
            "{column} must be 0 or 1, found \"{field}\" (row {row})"
        ))),
    }
}
