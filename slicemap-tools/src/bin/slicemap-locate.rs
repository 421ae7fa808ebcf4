
use clap::Parser;
use slicemap::*;
use slicemap_tools::*;

/// Report the set indexes and LLC slice for lines in a fresh buffer.
///
/// Without '--simulate', this races threads on every pair of adjacent
/// cores, so the machine should be otherwise idle.
#[derive(Parser)]
#[command(verbatim_doc_comment)]
pub struct Args {
    #[command(flatten)]
    geometry: GeometryArgs,

    #[command(flatten)]
    locator: LocatorArgs,

    /// Number of lines to report.
    #[arg(long, default_value_t = 16)]
    lines: usize,

    /// Distance between reported lines (in bytes).
    #[arg(long, default_value = "0x40", value_parser = parse_int)]
    stride: usize,

    /// Back the buffer with 2MiB pages.
    #[arg(long)]
    huge: bool,

    /// Also print the latency distribution for each slice over this many
    /// sweeps of the first line.
    #[arg(long)]
    survey: Option<usize>,

    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> slicemap::Result<()> {
    let g = args.geometry.geometry()?;
    let mut locator = args.locator.locator(&g)?;
    println!("[*] {} core pairs, {} reads per race",
        locator.config().topology.pairs().len(), locator.config().repeat);

    let len = (args.lines * args.stride).next_multiple_of(1 << 21);
    let buf = HostEnv::map_buffer(len, args.huge, true)?;
    let base = VirtAddr::from_ptr(buf.as_ptr());
    let page_shift = if args.huge { 21 } else { g.page_shift };

    println!("{:<20} {:<20} {:>4} {:>5} {:>6} {:>5}",
        "vaddr", "paddr", "L1", "L2", "LLC", "slice");
    for idx in 0..args.lines {
        let vaddr = base.add(idx * args.stride);
        let paddr = resolve_physical(vaddr);
        let (pstr, sets) = match paddr {
            Ok(p) => (p.to_string(), CacheLevel::ALL.map(|l| g.set_index(p, l))),
            Err(ref e) => {
                log::debug!("{}: {}", vaddr, e);
                ("?".to_string(), CacheLevel::ALL.map(|l| g.set_index(vaddr, l)))
            },
        };
        let slice = unsafe { locator.locate_slice(vaddr)? };

        // Flag set indexes that had to come from a virtual address
        // which doesn't determine them
        let mark = |level: CacheLevel, set: usize| -> String {
            if paddr.is_err() && !g.virtually_indexable(level, page_shift) {
                format!("{}?", set)
            } else {
                set.to_string()
            }
        };
        println!("{:<20} {:<20} {:>4} {:>5} {:>6} {:>5}",
            vaddr.to_string(), pstr,
            mark(CacheLevel::L1, sets[0]),
            mark(CacheLevel::L2, sets[1]),
            mark(CacheLevel::Llc, sets[2]),
            slice.to_string(),
        );
    }

    if let Some(rounds) = args.survey {
        let survey = unsafe { locator.survey(base, rounds)? };
        println!("[*] Survey of {} over {} sweeps:", base, rounds);
        for row in summarize_survey(&survey) {
            println!("  slice {:<3} min={:<10} (+{:<8}) mode={:<10} max={:<10} mean={:.1}",
                row.slice.to_string(), row.min, row.delta, row.mode, row.max, row.mean);
        }
    }

    print_stats(&locator.stats());
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);
    if let Err(e) = run(&args) {
        println!("[!] {}", e);
        std::process::exit(1);
    }
}
