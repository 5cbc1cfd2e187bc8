//! Guest state snapshots (.rvsn format).
//!
//! Format (little-endian):
//!   HEADER: magic[4] + version[2] + flags[2]
//!   REGS:   x0..x31 (32 x u64) + pc (u64)
//!   MEMORY: base (u64) + len (u64) + bytes[len]
//!
//! Compiled code is never part of a snapshot.

use std::io::{self, Read, Write};

use crate::cpu::{RegisterFile, NUM_GPRS};

const MAGIC: &[u8; 4] = b"RVSN";
const VERSION: u16 = 1;

/// Upper bound on the memory image accepted by [`Snapshot::read_from`].
const MAX_IMAGE_LEN: u64 = 1 << 36;

/// Errors produced while decoding a snapshot stream.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot i/o: {0}")]
    Io(#[from] io::Error),
    #[error("bad snapshot magic")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    Version(u16),
    #[error("x0 must be zero in a snapshot (found {0:#x})")]
    NonZeroX0(u64),
    #[error("memory image of {len} bytes does not fit guest memory of {capacity} bytes")]
    SizeMismatch { len: u64, capacity: u64 },
}

/// Register file plus the guest memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub regs: RegisterFile,
    pub mem_base: u64,
    pub memory: Vec<u8>,
}

// -- Write helpers --

fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

// -- Read helpers --

fn read_u16(r: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

impl Snapshot {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(MAGIC)?;
        write_u16(w, VERSION)?;
        write_u16(w, 0)?;
        for &x in &self.regs.x {
            write_u64(w, x)?;
        }
        write_u64(w, self.regs.pc)?;
        write_u64(w, self.mem_base)?;
        write_u64(w, self.memory.len() as u64)?;
        w.write_all(&self.memory)
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_u16(r)?;
        if version != VERSION {
            return Err(SnapshotError::Version(version));
        }
        let _flags = read_u16(r)?;

        let mut regs = RegisterFile::new();
        for i in 0..NUM_GPRS {
            regs.x[i] = read_u64(r)?;
        }
        if regs.x[0] != 0 {
            return Err(SnapshotError::NonZeroX0(regs.x[0]));
        }
        regs.pc = read_u64(r)?;

        let mem_base = read_u64(r)?;
        let len = read_u64(r)?;
        if len > MAX_IMAGE_LEN {
            return Err(SnapshotError::SizeMismatch {
                len,
                capacity: MAX_IMAGE_LEN,
            });
        }
        let mut memory = vec![0u8; len as usize];
        r.read_exact(&mut memory)?;

        Ok(Self {
            regs,
            mem_base,
            memory,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + (NUM_GPRS + 3) * 8 + self.memory.len());
        self.write_to(&mut out).expect("Vec writer is infallible");
        out
    }
}
