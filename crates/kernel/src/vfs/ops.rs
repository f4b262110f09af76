//! The VFS adapter contract: vtables a concrete subsystem (pipe, ATA
//! block device, `/proc` node) implements, plus the `stat` structure and
//! open-flag bits every caller shares.
//!
//! Follows this crate's own vtable idiom for device backends
//! (`drivers::ata`'s `AtaIo` register struct separated from the transfer
//! algorithm), generalized to a `dyn Trait` capability set so a subsystem
//! only overrides the operations it actually supports. Unsupported
//! members default to `ENOSYS`/`EPERM`.

use crate::lib::error::{Errno, Result};
use bitflags::bitflags;

bitflags! {
    /// Access-mode and creation flags passed to `open`/`pipe`; file type
    /// is tracked separately by [`crate::vfs::file::FileType`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY   = 0o0;
        const O_WRONLY   = 0o1;
        const O_RDWR     = 0o2;
        const O_ACCMODE  = 0o3;
        const O_CREAT    = 0o100;
        const O_EXCL     = 0o200;
        const O_TRUNC    = 0o1000;
        const O_APPEND   = 0o2000;
        const O_NONBLOCK = 0o4000;
        const O_DIRECTORY = 0o200000;
        const O_CLOEXEC  = 0o2000000;
    }
}

impl OpenFlags {
    pub fn is_readable(self) -> bool {
        let acc = self.bits() & Self::O_ACCMODE.bits();
        acc == Self::O_RDONLY.bits() || acc == Self::O_RDWR.bits()
    }

    pub fn is_writable(self) -> bool {
        let acc = self.bits() & Self::O_ACCMODE.bits();
        acc == Self::O_WRONLY.bits() || acc == Self::O_RDWR.bits()
    }

    pub fn is_nonblocking(self) -> bool {
        self.contains(Self::O_NONBLOCK)
    }
}

pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;
pub const F_DUPFD: i32 = 0;

/// `{dev, ino, mode, uid, gid, atime, mtime, ctime, size}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
}

/// Per-open-file operations: `read, write, lseek, stat, ioctl, fcntl,
/// getdents, readlink, unlink`. `open`/`close` are handled by the owning
/// subsystem's own constructors/destructors in this crate (pipe
/// open/close, block-device registration), so they are not repeated
/// here; the rest dispatch through this vtable.
pub trait FileOperations: Send + Sync {
    fn read(&self, file: &crate::vfs::file::File, buf: &mut [u8]) -> Result<usize> {
        let _ = (file, buf);
        Err(Errno::ENOSYS)
    }

    fn write(&self, file: &crate::vfs::file::File, buf: &[u8]) -> Result<usize> {
        let _ = (file, buf);
        Err(Errno::ENOSYS)
    }

    fn lseek(&self, file: &crate::vfs::file::File, offset: i64, whence: i32) -> Result<u64> {
        let _ = (file, offset, whence);
        Err(Errno::ESPIPE)
    }

    fn stat(&self, file: &crate::vfs::file::File) -> Result<Stat> {
        let _ = file;
        Err(Errno::ENOSYS)
    }

    fn ioctl(&self, file: &crate::vfs::file::File, cmd: u32, arg: usize) -> Result<i64> {
        let _ = (file, cmd, arg);
        Err(Errno::ENOSYS)
    }

    fn fcntl(&self, file: &crate::vfs::file::File, cmd: i32, arg: i64) -> Result<i64> {
        let _ = (file, cmd, arg);
        Err(Errno::ENOSYS)
    }

    fn getdents(&self, file: &crate::vfs::file::File, buf: &mut [u8]) -> Result<usize> {
        let _ = (file, buf);
        Err(Errno::ENOSYS)
    }

    fn readlink(&self, file: &crate::vfs::file::File, buf: &mut [u8]) -> Result<usize> {
        let _ = (file, buf);
        Err(Errno::ENOSYS)
    }

    fn unlink(&self, file: &crate::vfs::file::File) -> Result<()> {
        let _ = file;
        Err(Errno::ENOSYS)
    }
}

/// Superblock-level operations: `mkdir, rmdir, stat, creat, symlink,
/// setattr`. No filesystem in this core implements a real namespace —
/// the VFS here is an adapter surface only — so the default no-op table
/// below is what `/dev` and `/proc` register.
pub trait SysOperations: Send + Sync {
    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let _ = (path, mode);
        Err(Errno::ENOSYS)
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let _ = path;
        Err(Errno::ENOSYS)
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        let _ = path;
        Err(Errno::ENOSYS)
    }

    fn creat(&self, path: &str, mode: u32) -> Result<()> {
        let _ = (path, mode);
        Err(Errno::ENOSYS)
    }

    fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        let _ = (target, linkpath);
        Err(Errno::ENOSYS)
    }

    fn setattr(&self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        let _ = (path, mode, uid, gid);
        Err(Errno::ENOSYS)
    }
}

/// No-op `SysOperations`, registered for device nodes that don't carry a
/// real directory namespace (`/dev`, `/proc`).
pub struct NullSysOperations;
impl SysOperations for NullSysOperations {}
