//! Write strategies for message files
//!
//! Every strategy persists the exact body bytes and reads them back through
//! its own I/O path. They differ only in how the bytes reach the disk:
//!
//! | Mode            | Write path                               | Durability          |
//! |-----------------|------------------------------------------|---------------------|
//! | `buffered`      | 8 KiB `BufWriter`, flushed once          | OS page cache       |
//! | `unbuffered`    | single `write_all` on the raw file        | `fdatasync`         |
//! | `zero-copy`     | `write_all` straight from the body        | `fsync` (data+meta) |
//! | `memory-mapped` | `set_len` + `MmapMut`, bytes copied in    | `msync`             |
//!
//! A `std::fs::File` has no kernel-side copy path from a user buffer, so
//! `zero-copy` shares the unbuffered write path: the body slice goes to the
//! kernel with no intermediate user-space buffer. It differs in durability
//! (`fsync` also flushes metadata) and in its read path, a single sized
//! `read_exact` into a `BytesMut` that is frozen without another copy.

use bytes::{Bytes, BytesMut};
use memmap2::{Mmap, MmapMut};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

const BUFFER_SIZE: usize = 8 * 1024;

/// I/O mode selected once per member process
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum IoMode {
    #[default]
    Buffered,
    Unbuffered,
    ZeroCopy,
    MemoryMapped,
}

impl IoMode {
    pub const ALL: [IoMode; 4] = [
        IoMode::Buffered,
        IoMode::Unbuffered,
        IoMode::ZeroCopy,
        IoMode::MemoryMapped,
    ];

    /// Build the strategy implementing this mode
    pub fn strategy(self) -> Box<dyn WriteStrategy> {
        match self {
            IoMode::Buffered => Box::new(BufferedIo),
            IoMode::Unbuffered => Box::new(UnbufferedIo),
            IoMode::ZeroCopy => Box::new(ZeroCopyIo),
            IoMode::MemoryMapped => Box::new(MemoryMappedIo),
        }
    }
}

impl std::fmt::Display for IoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoMode::Buffered => write!(f, "buffered"),
            IoMode::Unbuffered => write!(f, "unbuffered"),
            IoMode::ZeroCopy => write!(f, "zero-copy"),
            IoMode::MemoryMapped => write!(f, "memory-mapped"),
        }
    }
}

/// One way of moving a message body to and from its file.
///
/// `write` must replace any previous content of `path` entirely.
pub trait WriteStrategy: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> IoMode;

    fn write(&self, path: &Path, body: &[u8]) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Bytes>;
}

fn open_truncated(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[derive(Debug, Clone, Copy)]
pub struct BufferedIo;

impl WriteStrategy for BufferedIo {
    fn mode(&self) -> IoMode {
        IoMode::Buffered
    }

    fn write(&self, path: &Path, body: &[u8]) -> io::Result<()> {
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, open_truncated(path)?);
        writer.write_all(body)?;
        writer.flush()
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(Bytes::from(body))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnbufferedIo;

impl WriteStrategy for UnbufferedIo {
    fn mode(&self) -> IoMode {
        IoMode::Unbuffered
    }

    fn write(&self, path: &Path, body: &[u8]) -> io::Result<()> {
        let mut file = open_truncated(path)?;
        file.write_all(body)?;
        file.sync_data()
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        let mut file = File::open(path)?;
        let mut body = Vec::with_capacity(file.metadata()?.len() as usize);
        file.read_to_end(&mut body)?;
        Ok(Bytes::from(body))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZeroCopyIo;

impl WriteStrategy for ZeroCopyIo {
    fn mode(&self) -> IoMode {
        IoMode::ZeroCopy
    }

    fn write(&self, path: &Path, body: &[u8]) -> io::Result<()> {
        let mut file = open_truncated(path)?;
        file.write_all(body)?;
        file.sync_all()
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        let mut file = File::open(path)?;
        let mut body = BytesMut::zeroed(file.metadata()?.len() as usize);
        file.read_exact(&mut body)?;
        Ok(body.freeze())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryMappedIo;

impl WriteStrategy for MemoryMappedIo {
    fn mode(&self) -> IoMode {
        IoMode::MemoryMapped
    }

    fn write(&self, path: &Path, body: &[u8]) -> io::Result<()> {
        let file = open_truncated(path)?;
        file.set_len(body.len() as u64)?;
        // Zero-length mappings are rejected by the OS.
        if body.is_empty() {
            return file.sync_all();
        }

        // SAFETY: the file is exclusively ours for the duration of the put
        // (per-key lock in `DiskStorage`) and was just sized to `body.len()`.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map.copy_from_slice(body);
        map.flush()
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Bytes::new());
        }

        // SAFETY: readers hold the per-key lock, so no writer truncates the
        // file while it is mapped.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Bytes::copy_from_slice(&map))
    }
}
