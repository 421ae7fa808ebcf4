
use clap::Parser;
use slicemap::*;
use slicemap::timer;
use slicemap_tools::GeometryArgs;

/// Summarize the parts of the environment that affect slice measurements.
#[derive(Parser)]
pub struct Args {
    #[command(flatten)]
    geometry: GeometryArgs,

    /// Dump the instruction cache flush gadget.
    #[arg(long)]
    gadget: bool,
}

fn main() {
    let args = Args::parse();

    let num_cores = match HostEnv::online_cores() {
        Some(n) => n.to_string(),
        None => "unknown".to_string(),
    };
    let isol = HostEnv::sysfs_isolated();
    let nohz = HostEnv::sysfs_nohz();
    let smt  = match HostEnv::sysfs_smt_enabled() {
        Ok(true) => "enabled [!!]",
        Ok(false) => "disabled",
        Err(_) => "unknown",
    };
    let gov = match HostEnv::sysfs_cpufreq_governor(0) {
        Ok(s) => s,
        Err(e) => format!("<read error: {:?}>", e),
    };
    let hugepages = match HostEnv::procfs_nr_hugepages() {
        Some(0) => "none reserved [!!]".to_string(),
        Some(n) => n.to_string(),
        None => "unknown".to_string(),
    };
    let pagemap = match HostEnv::pagemap_readable() {
        true => "readable",
        false => "<frame numbers hidden; are you root?>",
    };
    let t0 = timer::start();
    timer::wait_cycles(1_000_000);
    let overhead = timer::elapsed(t0, timer::stop()).saturating_sub(1_000_000);

    println!("[*] 'slicemap' environment summary:");
    println!("  {:<40}: {}", "online cores", num_cores);
    println!("  {:<40}: {}", "isolated cores", isol);
    println!("  {:<40}: {}", "nohz_full cores", nohz);
    println!("  {:<40}: {}", "simultaneous multithreading (SMT)", smt);
    println!("  {:<40}: {}", "cpufreq scaling (core 0)", gov);
    println!("  {:<40}: {}", "vm.nr_hugepages", hugepages);
    println!("  {:<40}: {}", "/proc/self/pagemap", pagemap);
    println!("  {:<40}: {} cycles", "wait_cycles(1000000) overshoot", overhead);

    let g = match args.geometry.geometry() {
        Ok(g) => g,
        Err(e) => {
            println!("[!] {}", e);
            std::process::exit(1);
        },
    };
    println!("[*] Cache geometry ({} cores, {}B lines, {}B pages):",
        g.num_cores, g.line_size(), g.page_size());
    for level in CacheLevel::ALL {
        let huge = if g.virtually_indexable(level, 21) { "yes" } else { "no" };
        let base = if g.virtually_indexable(level, g.page_shift) { "yes" } else { "no" };
        println!("  {:<4} mask={:#08x} sets={:<6} virtual index (4K/2M): {}/{}",
            level.to_string(), g.mask(level), g.sets(level), base, huge);
    }

    if args.gadget {
        let f = match ICacheFlusher::for_geometry(&g) {
            Ok(f) => f,
            Err(e) => {
                println!("[!] {}", e);
                std::process::exit(1);
            },
        };
        println!("[*] Flush gadget: {} blocks ({}B) at {:016x}",
            f.blocks(), f.footprint(), f.addr());
        let dump = &f.bytes()[..f.bytes().len().min(256)];
        println!("{}", pretty_hex::pretty_hex(&dump));
        #[cfg(target_arch = "x86_64")]
        slicemap::util::disas(f.bytes(), f.addr() as u64, Some(4));
        let t = timer::time(|| { f.flush(); });
        println!("[*] flush took {} cycles", t);
    }
}
