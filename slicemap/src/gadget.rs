//! A gadget for evicting the L1 instruction cache.
//!
//! The gadget is a chain of unconditional branches, each one at the start
//! of its own 64-byte block and targeting the start of the next block.
//! Executing the chain touches one line per block, so a chain whose
//! footprint exceeds the L1I capacity leaves none of the caller's lines
//! resident. The last block zeroes the return register and returns.

use dynasmrt::{
    dynasm,
    DynasmApi,
    DynasmLabelApi,
    AssemblyOffset,
    ExecutableBuffer,
};
use crate::error::{ Error, Result };
use crate::geometry::CacheGeometry;

#[cfg(target_arch = "x86_64")]
const NOP8: [u8; 8] = [0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00];
#[cfg(target_arch = "x86_64")]
const NOP6: [u8; 6] = [0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00];

/// Type of the emitted gadget.
pub type FlushFn = extern "C" fn() -> usize;

/// JIT-emitted instruction cache flush gadget.
pub struct ICacheFlusher {
    buf: ExecutableBuffer,
    entry: AssemblyOffset,
    blocks: usize,
}

impl ICacheFlusher {
    /// Size of each block in the chain (in bytes).
    pub const BLOCK_SIZE: usize = 64;

    /// 512 blocks is 32KiB worth of branches.
    pub const DEFAULT_BLOCKS: usize = 512;

    /// Emit a chain of `blocks` branches.
    pub fn new(blocks: usize) -> Result<Self> {
        if blocks == 0 {
            return Err(Error::Jit("need at least one block".to_string()));
        }
        let (buf, entry) = Self::emit(blocks)?;
        Ok(Self { buf, entry, blocks })
    }

    /// Emit a chain covering twice the L1I capacity of `geometry`.
    pub fn for_geometry(geometry: &CacheGeometry) -> Result<Self> {
        let blocks = (2 * geometry.l1i_size).div_ceil(Self::BLOCK_SIZE);
        Self::new(blocks)
    }

    #[cfg(target_arch = "x86_64")]
    fn emit(blocks: usize) -> Result<(ExecutableBuffer, AssemblyOffset)> {
        let mut ops = dynasmrt::x64::Assembler::new()
            .map_err(|e| Error::Jit(e.to_string()))?;
        dynasm!(ops
            ; .arch x64
            ; .align 64
        );
        let entry = ops.offset();

        // Each block is a 2-byte JMP padded with NOPs (never executed)
        for _ in 0..blocks {
            dynasm!(ops
                ; .arch x64
                ; jmp BYTE >lab
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP8
                ; .bytes NOP6
                ; lab:
            );
        }
        dynasm!(ops
            ; .arch x64
            ; xor eax, eax
            ; ret
        );

        let buf = ops.finalize()
            .map_err(|_| Error::Jit("couldn't finalize buffer".to_string()))?;
        Ok((buf, entry))
    }

    #[cfg(target_arch = "aarch64")]
    fn emit(blocks: usize) -> Result<(ExecutableBuffer, AssemblyOffset)> {
        let mut ops = dynasmrt::aarch64::Assembler::new()
            .map_err(|e| Error::Jit(e.to_string()))?;
        dynasm!(ops
            ; .arch aarch64
            ; .align 64
        );
        let entry = ops.offset();
        for _ in 0..blocks {
            dynasm!(ops
                ; .arch aarch64
                ; b >lab
                ; .align 64
                ; lab:
            );
        }
        dynasm!(ops
            ; .arch aarch64
            ; mov x0, xzr
            ; ret
        );

        let buf = ops.finalize()
            .map_err(|_| Error::Jit("couldn't finalize buffer".to_string()))?;
        Ok((buf, entry))
    }

    /// Run the gadget. Always returns zero.
    pub fn flush(&self) -> usize {
        let f: FlushFn = unsafe { std::mem::transmute(self.buf.ptr(self.entry)) };
        f()
    }

    pub fn blocks(&self) -> usize { self.blocks }

    /// Number of bytes covered by the chain of branches.
    pub fn footprint(&self) -> usize { self.blocks * Self::BLOCK_SIZE }

    /// Virtual address of the first block.
    pub fn addr(&self) -> usize { self.buf.ptr(self.entry) as usize }

    /// The emitted code, starting at the first block.
    pub fn bytes(&self) -> &[u8] { &self.buf[self.entry.0..] }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flush_returns_zero() {
        let f = ICacheFlusher::new(ICacheFlusher::DEFAULT_BLOCKS).unwrap();
        assert_eq!(f.flush(), 0);
        assert_eq!(f.footprint(), 32 * 1024);
        assert_eq!(f.addr() % 64, 0);
    }

    #[test]
    fn sized_from_geometry() {
        let f = ICacheFlusher::for_geometry(&CacheGeometry::skylake_sp()).unwrap();
        assert_eq!(f.blocks(), 1024);
        assert!(f.footprint() >= 2 * CacheGeometry::skylake_sp().l1i_size);
        assert_eq!(f.flush(), 0);
    }

    #[test]
    fn zero_blocks_rejected() {
        assert!(matches!(ICacheFlusher::new(0), Err(Error::Jit(_))));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn chain_is_well_formed() {
        use iced_x86::{ Decoder, DecoderOptions, Instruction, Mnemonic, Register };

        let f = ICacheFlusher::new(16).unwrap();
        let bytes = f.bytes();
        let base = f.addr() as u64;
        assert_eq!(bytes.len(), 16 * 64 + 3);

        let mut instr = Instruction::default();
        for blk in 0..16usize {
            let off = blk * 64;
            let mut dec = Decoder::with_ip(64, &bytes[off..], base + off as u64,
                DecoderOptions::NONE);
            dec.decode_out(&mut instr);
            assert_eq!(instr.mnemonic(), Mnemonic::Jmp);
            assert_eq!(instr.near_branch_target(), base + off as u64 + 64);
        }

        let off = 16 * 64;
        let mut dec = Decoder::with_ip(64, &bytes[off..], base + off as u64,
            DecoderOptions::NONE);
        dec.decode_out(&mut instr);
        assert_eq!(instr.mnemonic(), Mnemonic::Xor);
        assert_eq!(instr.op0_register(), Register::EAX);
        dec.decode_out(&mut instr);
        assert_eq!(instr.mnemonic(), Mnemonic::Ret);
    }
}
