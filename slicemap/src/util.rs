
pub mod pagemap;

use std::io::Read;
use memmap2::{ MmapMut, MmapOptions };
use crate::error::{ Error, Result };

/// Utilities for inspecting and controlling the state of the current
/// process and the host.
pub struct HostEnv;
impl HostEnv {
    const ISOLATED_PATH: &'static str =
        "/sys/devices/system/cpu/isolated";
    const NOHZ_PATH: &'static str =
        "/sys/devices/system/cpu/nohz_full";
    const SMT_PATH: &'static str =
        "/sys/devices/system/cpu/smt/control";
    const HUGEPAGES_PATH: &'static str =
        "/proc/sys/vm/nr_hugepages";

    fn read_trimmed(path: &str) -> std::io::Result<String> {
        let mut f = std::fs::File::open(path)?;
        let mut res = String::new();
        f.read_to_string(&mut res)?;
        Ok(res.trim().to_string())
    }

    /// Return the number of online logical cores.
    pub fn online_cores() -> Option<usize> {
        nix::unistd::sysconf(nix::unistd::SysconfVar::_NPROCESSORS_ONLN)
            .ok()
            .flatten()
            .map(|n| n as usize)
    }

    /// Return a string describing the set of isolated cores.
    pub fn sysfs_isolated() -> String {
        match Self::read_trimmed(Self::ISOLATED_PATH) {
            Ok(s) if s.is_empty() => "disabled".to_string(),
            Ok(s) => s,
            Err(_) => "unknown".to_string(),
        }
    }

    /// Return a string describing the set of 'nohz_full' cores.
    pub fn sysfs_nohz() -> String {
        match Self::read_trimmed(Self::NOHZ_PATH) {
            Ok(s) if s.is_empty() => "disabled".to_string(),
            Ok(s) => s,
            Err(_) => "unknown".to_string(),
        }
    }

    /// Returns true if SMT is enabled.
    pub fn sysfs_smt_enabled() -> std::result::Result<bool, std::io::ErrorKind> {
        let res = Self::read_trimmed(Self::SMT_PATH).map_err(|e| e.kind())?;
        match res.as_str() {
            "on" | "forceon" => Ok(true),
            _ => Ok(false),
        }
    }

    /// Return a string describing the cpufreq scaling strategy for a
    /// particular core.
    pub fn sysfs_cpufreq_governor(n: usize)
        -> std::result::Result<String, std::io::ErrorKind>
    {
        let path = format!(
            "/sys/devices/system/cpu/cpufreq/policy{}/scaling_governor", n
        );
        Self::read_trimmed(&path).map_err(|e| e.kind())
    }

    /// Return the number of reserved huge pages.
    pub fn procfs_nr_hugepages() -> Option<usize> {
        Self::read_trimmed(Self::HUGEPAGES_PATH).ok()?.parse().ok()
    }

    /// Returns true if the pagemap exposes frame numbers to us.
    ///
    /// Unprivileged readers get PFN 0 for every present page.
    pub fn pagemap_readable() -> bool {
        let x = 0u64;
        let vaddr = crate::geometry::VirtAddr::from_ptr(&x);
        pagemap::resolve_physical(vaddr).is_ok()
    }
}

impl HostEnv {
    /// Pin the calling thread to a particular core.
    pub fn pin_to_core(core: usize) -> Result<()> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset.set(core).map_err(|errno| {
            Error::AffinityPinFailed { core, errno }
        })?;
        nix::sched::sched_setaffinity(this_pid, &cpuset).map_err(|errno| {
            Error::AffinityPinFailed { core, errno }
        })
    }

    /// Map an anonymous read/write buffer of `len` bytes.
    ///
    /// With `huge`, the buffer is backed by 2MiB pages (which requires
    /// reserved huge pages, see [HostEnv::procfs_nr_hugepages]).
    /// With `populate`, every page is touched so that it's resident.
    pub fn map_buffer(len: usize, huge: bool, populate: bool) -> Result<MmapMut> {
        let mut opts = MmapOptions::new();
        opts.len(len);
        if huge {
            opts.huge(Some(21));
        }
        let mut buf = opts.map_anon().map_err(Error::Mmap)?;
        if populate {
            let step = if huge { 1 << 21 } else { 1 << 12 };
            for off in (0..len).step_by(step) {
                buf[off] = 0;
            }
        }
        Ok(buf)
    }
}

/// Print disassembly for some x86_64 machine code located at `addr`.
#[cfg(target_arch = "x86_64")]
pub fn disas(bytes: &[u8], addr: u64, max_inst: Option<usize>) {
    use iced_x86::{ Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter };

    let mut decoder = Decoder::with_ip(64, bytes, addr, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_digit_separator("_");
    let mut output = String::new();
    let mut instr  = Instruction::default();

    let mut num_inst = 0;
    while decoder.can_decode() {
        if let Some(max) = max_inst {
            if num_inst >= max { break; }
        }
        decoder.decode_out(&mut instr);
        output.clear();
        formatter.format(&instr, &mut output);

        let start_idx = (instr.ip() - addr) as usize;
        let instr_bytes = &bytes[start_idx..start_idx + instr.len()];
        let mut bytestr = String::new();
        for b in instr_bytes.iter() {
            bytestr.push_str(&format!("{:02x}", b));
        }
        println!("{:016x}: {:32} {}", instr.ip(), bytestr, output);
        num_inst += 1;
    }
}
