use clap::Parser;
use seqsplit::{args::DemuxArgs, demux::demux_process};

fn main() {
    let args = DemuxArgs::parse();

    if let Err(e) = demux_process(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
