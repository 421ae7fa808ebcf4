
use clap::Parser;
use slicemap::*;
use slicemap_tools::*;

/// Build a set of addresses that share an LLC slice and set.
#[derive(Parser)]
pub struct Args {
    #[command(flatten)]
    geometry: GeometryArgs,

    #[command(flatten)]
    locator: LocatorArgs,

    /// Target slice.
    #[arg(long)]
    slice: usize,

    /// Target LLC set.
    #[arg(long, value_parser = parse_int)]
    set: usize,

    /// Number of addresses to find.
    #[arg(long, default_value_t = 8)]
    count: usize,

    /// Maximum distance to search from the start of the buffer (in bytes).
    #[arg(long, default_value = "0x100_0000", value_parser = parse_int)]
    radius: usize,

    /// Back the buffer with 2MiB pages.
    #[arg(long)]
    huge: bool,

    /// Compute set indexes from physical addresses (requires privileges).
    #[arg(long)]
    physical: bool,

    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> slicemap::Result<()> {
    let g = args.geometry.geometry()?;
    let locator = args.locator.locator(&g)?;

    let indexing = if args.physical {
        Indexing::Physical
    } else {
        if !g.virtually_indexable(CacheLevel::Llc, if args.huge { 21 } else { g.page_shift }) {
            println!("[!] LLC set indexes aren't preserved by this page size; \
                consider '--huge' or '--physical'");
        }
        Indexing::Virtual
    };
    let cfg = FinderConfig::default()
        .radius(args.radius)
        .indexing(indexing);

    let len = args.radius.next_multiple_of(1 << 21);
    let buf = HostEnv::map_buffer(len, args.huge, true)?;
    let base = VirtAddr::from_ptr(buf.as_ptr());
    let mut finder = CollisionFinder::new(cfg, g, locator)?;

    println!("[*] Searching {:#x} bytes from {} for slice {} set {}",
        args.radius, base, args.slice, args.set);
    let addrs = unsafe {
        finder.find_collisions(base, SliceId(args.slice), args.set, args.count)?
    };
    for (idx, addr) in addrs.iter().enumerate() {
        let off = addr.0 - base.0;
        match resolve_physical(*addr) {
            Ok(p) => println!("  {:>3}: {} (+{:#010x}) {}", idx, addr, off, p),
            Err(_) => println!("  {:>3}: {} (+{:#010x})", idx, addr, off),
        }
    }

    print_stats(&finder.locator().stats());
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
