//! The VFS adapter: not a filesystem, a thin capability surface so pipes
//! and the ATA block driver share one `File` object shape, one vtable
//! contract and one path-keyed device registry — the `/dev/hd{a,b,c,...}`
//! names `drivers::ata::init()` expects to install into.

pub mod file;
pub mod ops;
pub mod pipe;

pub use file::{Backing, File, FileType};
pub use ops::{FileOperations, OpenFlags, Stat, SysOperations};

use crate::lib::error::{Errno, Result};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use lazy_static::lazy_static;
use spin::Mutex;

/// A block-addressable backing store: the contract a driver must
/// satisfy to register under `/dev`. Implemented by
/// `drivers::ata::AtaDevice`; kept as a trait rather than a concrete type
/// so the registry doesn't depend on the ATA driver directly.
pub trait BlockFile: Send + Sync {
    fn name(&self) -> &str;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    fn max_offset(&self) -> u64;
}

impl BlockFile for crate::drivers::ata::AtaDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        crate::drivers::ata::AtaDevice::read_at(self, offset, buf).map_err(Errno::from)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        crate::drivers::ata::AtaDevice::write_at(self, offset, buf).map_err(Errno::from)
    }

    fn max_offset(&self) -> u64 {
        crate::drivers::ata::AtaDevice::max_offset(self)
    }
}

/// `file_operations` for block devices: read/write dispatch to the
/// backing `BlockFile` at the file's current offset, advancing it by the
/// transfer size; seeking is legal (unlike pipes).
struct BlockFileOps;

impl FileOperations for BlockFileOps {
    fn read(&self, file: &File, buf: &mut [u8]) -> Result<usize> {
        match &file.backing {
            Backing::Block(dev) => {
                let n = dev.read_at(file.offset(), buf)?;
                file.advance_offset(n as u64);
                Ok(n)
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn write(&self, file: &File, buf: &[u8]) -> Result<usize> {
        match &file.backing {
            Backing::Block(dev) => {
                let n = dev.write_at(file.offset(), buf)?;
                file.advance_offset(n as u64);
                Ok(n)
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn lseek(&self, file: &File, offset: i64, whence: i32) -> Result<u64> {
        const SEEK_SET: i32 = 0;
        const SEEK_CUR: i32 = 1;
        const SEEK_END: i32 = 2;
        let Backing::Block(dev) = &file.backing else {
            return Err(Errno::EINVAL);
        };
        let base = match whence {
            SEEK_SET => 0i64,
            SEEK_CUR => file.offset() as i64,
            SEEK_END => dev.max_offset() as i64,
            _ => return Err(Errno::EINVAL),
        };
        let new_off = base.checked_add(offset).ok_or(Errno::EINVAL)?;
        if new_off < 0 {
            return Err(Errno::EINVAL);
        }
        file.set_offset(new_off as u64);
        Ok(new_off as u64)
    }

    fn stat(&self, file: &File) -> Result<Stat> {
        let Backing::Block(dev) = &file.backing else {
            return Err(Errno::EINVAL);
        };
        Ok(Stat {
            dev: 0,
            ino: 0,
            mode: file.mode | FileType::BlockDevice.mode_bits(),
            uid: file.uid,
            gid: file.gid,
            atime: file.atime.load(core::sync::atomic::Ordering::SeqCst),
            mtime: file.mtime.load(core::sync::atomic::Ordering::SeqCst),
            ctime: file.ctime,
            size: dev.max_offset() + 1,
        })
    }
}

static BLOCK_FILE_OPS: BlockFileOps = BlockFileOps;

lazy_static! {
    /// Path-keyed device registry (`/dev/hda`, `/dev/hdb`, ...), mirroring
    /// the naming scheme `drivers::ata::init()` already assumes.
    static ref DEVICES: Mutex<BTreeMap<String, Arc<File>>> = Mutex::new(BTreeMap::new());
}

/// Register a block device under `/dev/<name>`: the driver hands the
/// VFS an already-initialized device, and the VFS wraps it in a `File`
/// and remembers it by path.
pub fn register_block_device(device: Arc<dyn BlockFile>) {
    let name = device.name().to_string();
    let path = alloc::format!("/dev/{}", name);
    let file = Arc::new(File::new(
        name,
        FileType::BlockDevice,
        OpenFlags::O_RDWR,
        0o660,
        0,
        0,
        crate::time::ticks(),
        &BLOCK_FILE_OPS,
        Backing::Block(device),
    ));
    DEVICES.lock().insert(path, file);
}

/// Look up a previously registered device file by its `/dev` path.
pub fn get_device_by_path(path: &str) -> Option<Arc<File>> {
    DEVICES.lock().get(path).cloned()
}

pub fn init() {
    crate::info!("vfs: device registry ready");
}

/// An in-memory `BlockFile` with fail-rate/delay injection, standing in
/// for the ATA driver in host-side tests. Hardware-facing code is
/// written against a trait so tests can substitute an in-memory fake
/// instead of touching real I/O ports.
#[cfg(test)]
pub struct MockBlockFile {
    name: String,
    data: Mutex<alloc::vec::Vec<u8>>,
    fail_rate: core::sync::atomic::AtomicU32,
    error_count: core::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockBlockFile {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            data: Mutex::new(alloc::vec![0u8; capacity]),
            fail_rate: core::sync::atomic::AtomicU32::new(0),
            error_count: core::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn set_fail_rate(&self, rate: u32) {
        self.fail_rate.store(rate.min(100), core::sync::atomic::Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(core::sync::atomic::Ordering::Relaxed)
    }

    fn should_fail(&self) -> bool {
        let rate = self.fail_rate.load(core::sync::atomic::Ordering::Relaxed);
        if rate == 0 {
            return false;
        }
        static SEED: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0x123456789abcdef0);
        let mut seed = SEED.load(core::sync::atomic::Ordering::Relaxed);
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        SEED.store(seed, core::sync::atomic::Ordering::Relaxed);
        (seed % 100) < rate as u64
    }
}

#[cfg(test)]
impl BlockFile for MockBlockFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.should_fail() {
            self.error_count.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            return Err(Errno::EIO);
        }
        let data = self.data.lock();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.should_fail() {
            self.error_count.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            return Err(Errno::EIO);
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn max_offset(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    fn open(dev: Arc<dyn BlockFile>) -> File {
        File::new(
            dev.name().to_string(),
            FileType::BlockDevice,
            OpenFlags::O_RDWR,
            0o660,
            0,
            0,
            0,
            &BLOCK_FILE_OPS,
            Backing::Block(dev),
        )
    }

    #[test]
    fn read_write_round_trip_through_block_file_ops() {
        let dev: Arc<dyn BlockFile> = Arc::new(MockBlockFile::new("mock0", 4096));
        let file = open(dev);

        let written = file.write(b"hello world").unwrap();
        assert_eq!(written, 11);

        file.lseek(0, 0).unwrap(); // SEEK_SET
        let mut buf = [0u8; 11];
        let read = file.read(&mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn lseek_end_reports_device_capacity() {
        let dev: Arc<dyn BlockFile> = Arc::new(MockBlockFile::new("mock0", 4096));
        let file = open(dev);
        let pos = file.lseek(0, 2).unwrap(); // SEEK_END
        assert_eq!(pos, 4096);
    }

    #[test]
    fn injected_failures_surface_as_eio() {
        let mock = Arc::new(MockBlockFile::new("mock0", 4096));
        mock.set_fail_rate(100);
        let file = open(mock.clone());

        let err = file.write(b"x").unwrap_err();
        assert_eq!(err, Errno::EIO);
        assert_eq!(mock.error_count(), 1);
    }

    #[test]
    fn register_and_look_up_block_device_by_path() {
        let dev: Arc<dyn BlockFile> = Arc::new(MockBlockFile::new("hdz", 512));
        register_block_device(dev);
        let file = get_device_by_path("/dev/hdz").expect("registered device");
        assert_eq!(file.name(), "hdz");
    }
}
