// Description:      Build the tag index from the configured tag table, run
//                   the demultiplexing pipeline, and write the mapping table.

use crate::{
    args::{DemuxArgs, TagSource},
    errors::DemuxError,
    index::TagIndex,
    mapping::BarcodeMapping,
    pipeline,
    utils::pretty_num,
};

/// Runs the demultiplexer end to end. All configuration and registration
/// errors are reported before any read is processed.
pub fn demux_process(args: DemuxArgs) -> Result<(), DemuxError> {
    let settings = args.validate()?;

    let mut index = TagIndex::new(settings.n_files);
    match &settings.tag_source {
        TagSource::Table(path) => index.load_config(path)?,
        TagSource::Inline(specs) => {
            for spec in specs {
                index.add_tag(spec.clone())?;
            }
        }
    }
    if index.num_tags() == 0 {
        return Err(DemuxError::Config("No tags were registered".to_string()));
    }
    index.close()?;

    let mut mapping = BarcodeMapping::new();
    if let Some(append) = &settings.append_file {
        mapping.load_existing(append, &index)?;
    }
    if let Some((path, discard)) = &settings.filter {
        mapping.load_filter(path, &index, *discard)?;
    }

    if settings.verbose {
        eprintln!(
            "* Using a list of {tags} tags (map size: {literals}; num elements: {entries})",
            tags = pretty_num(index.num_tags()),
            literals = pretty_num(index.dict_size(true)),
            entries = pretty_num(index.dict_size(false))
        );
    }

    let summary = pipeline::run(&index, settings.pipeline, mapping)?;

    if let Some(path) = &settings.mapping_file {
        summary.mapping.write(path, &index)?;
    }

    if settings.verbose {
        eprintln!(
            "* Processed {groups} read units ({assigned} assigned, {buckets} buckets)",
            groups = pretty_num(summary.groups as usize),
            assigned = pretty_num(summary.assigned as usize),
            buckets = pretty_num(summary.mapping.num_buckets())
        );
    }

    Ok(())
}
