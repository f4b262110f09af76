//! Pipe subsystem.
//!
//! A ring of `PIPE_NUM_BUFFERS` fixed `PIPE_BUFFER_SIZE`-byte buffers.
//! `read_index` and `write_index` are a linear index `L`: they only ever
//! advance in whole-buffer steps when the buffer they currently select is
//! exhausted, so `buf_idx = (L / PIPE_BUFFER_SIZE) mod PIPE_NUM_BUFFERS`
//! always names the buffer a reader/writer is actively draining or
//! filling; within that buffer the buffer's own `offset`/`len` are
//! authoritative, so partial consumption never requires shifting memory.
//!
//! A blocking reader/writer loops on `sleep_on`/re-check rather than
//! returning `EAGAIN` after scheduling the sleep. Close/write-completion
//! wakes every waiter on the relevant queue (`wake_all_force`/`wake`),
//! grounded in the `other_examples` scheduler's wake-all-blocked pattern
//! for pipe IPC (multiple readers can be satisfiable by one batch of new
//! bytes).

use crate::lib::config::Config;
use crate::lib::error::{Errno, Result};
use crate::sched::waitqueue::WaitQueueHead;
use crate::vfs::file::{Backing, File, FileType};
use crate::vfs::ops::{FileOperations, OpenFlags, Stat};
use alloc::sync::Arc;
use spin::Mutex;

/// Kept small so the ring fills and drains inside a handful of operations
/// in tests.
pub const PIPE_BUFFER_SIZE: usize = Config::DEFAULT.pipe_buffer_size;
pub const PIPE_NUM_BUFFERS: usize = Config::DEFAULT.pipe_num_buffers;

const RING_BYTES: u64 = (PIPE_NUM_BUFFERS * PIPE_BUFFER_SIZE) as u64;

struct PipeBuffer {
    data: [u8; PIPE_BUFFER_SIZE],
    offset: usize,
    len: usize,
}

impl PipeBuffer {
    const fn new() -> Self {
        Self { data: [0u8; PIPE_BUFFER_SIZE], offset: 0, len: 0 }
    }

    fn empty(&self) -> bool {
        self.len == 0
    }

    fn capacity(&self) -> usize {
        PIPE_BUFFER_SIZE - (self.offset + self.len)
    }

    fn confirm(&self) -> bool {
        self.offset + self.len <= PIPE_BUFFER_SIZE
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = core::cmp::min(dst.len(), self.len);
        dst[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        self.len -= n;
        if self.len == 0 {
            self.offset = 0;
        }
        n
    }

    fn write(&mut self, src: &[u8]) -> usize {
        let cap = self.capacity();
        let n = core::cmp::min(src.len(), cap);
        let start = self.offset + self.len;
        self.data[start..start + n].copy_from_slice(&src[..n]);
        self.len += n;
        n
    }
}

struct State {
    buffers: [PipeBuffer; PIPE_NUM_BUFFERS],
    read_index: u64,
    write_index: u64,
    readers: u32,
    writers: u32,
}

/// The pipe info object. One mutex guards the buffer array, indices and
/// role counts, held across a read/write loop's check-then-act.
pub struct PipeInode {
    state: Mutex<State>,
    read_wait: WaitQueueHead,
    write_wait: WaitQueueHead,
}

impl PipeInode {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                buffers: [
                    PipeBuffer::new(),
                    PipeBuffer::new(),
                    PipeBuffer::new(),
                    PipeBuffer::new(),
                    PipeBuffer::new(),
                ],
                read_index: 0,
                write_index: 0,
                readers: 1,
                writers: 1,
            }),
            read_wait: WaitQueueHead::new(),
            write_wait: WaitQueueHead::new(),
        })
    }

    fn try_read(&self, out: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let n = out.len();
        let mut read = 0usize;
        let mut attempts = 0usize;
        while read < n && attempts <= PIPE_NUM_BUFFERS {
            let idx = ((state.read_index / PIPE_BUFFER_SIZE as u64) % PIPE_NUM_BUFFERS as u64) as usize;
            debug_assert!(state.buffers[idx].confirm());
            if state.buffers[idx].empty() {
                state.read_index = (state.read_index + PIPE_BUFFER_SIZE as u64) % RING_BYTES;
                attempts += 1;
                continue;
            }
            let chunk = state.buffers[idx].read(&mut out[read..]);
            read += chunk;
            attempts = 0;
        }
        read
    }

    fn try_write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        let n = data.len();
        let mut written = 0usize;
        let mut attempts = 0usize;
        while written < n && attempts <= PIPE_NUM_BUFFERS {
            let idx = ((state.write_index / PIPE_BUFFER_SIZE as u64) % PIPE_NUM_BUFFERS as u64) as usize;
            debug_assert!(state.buffers[idx].confirm());
            let cap = state.buffers[idx].capacity();
            if cap == 0 {
                state.write_index = (state.write_index + PIPE_BUFFER_SIZE as u64) % RING_BYTES;
                attempts += 1;
                continue;
            }
            let chunk = state.buffers[idx].write(&data[written..]);
            written += chunk;
            attempts = 0;
        }
        written
    }

    fn writers(&self) -> u32 {
        self.state.lock().writers
    }

    fn readers(&self) -> u32 {
        self.state.lock().readers
    }

    /// `read(file, buf, n)`.
    pub fn read(&self, file: &File, buf: &mut [u8]) -> Result<usize> {
        loop {
            let n = self.try_read(buf);
            if n > 0 {
                self.write_wait.wake_all_force();
                return Ok(n);
            }
            if self.writers() == 0 {
                return Ok(0);
            }
            if file.flags().is_nonblocking() {
                return Err(Errno::EAGAIN);
            }
            crate::sched::waitqueue::sleep_on(&self.read_wait);
            // Spurious wakeups are possible; loop re-checks.
        }
    }

    /// `write(file, buf, n)`.
    pub fn write(&self, file: &File, buf: &[u8]) -> Result<usize> {
        if self.readers() == 0 {
            return Err(Errno::EPIPE);
        }
        loop {
            let n = self.try_write(buf);
            if n > 0 {
                self.read_wait.wake_all_force();
                return Ok(n);
            }
            if file.flags().is_nonblocking() {
                return Err(Errno::EAGAIN);
            }
            crate::sched::waitqueue::sleep_on(&self.write_wait);
        }
    }

    /// `close(file)`: decrement the role count matching the
    /// file's access mode. If writers reaches zero, wake every reader so
    /// they observe EOF.
    pub fn on_file_dropped(&self, flags: OpenFlags) {
        let mut state = self.state.lock();
        if flags.is_writable() {
            state.writers = state.writers.saturating_sub(1);
            let writers_gone = state.writers == 0;
            drop(state);
            if writers_gone {
                self.read_wait.wake_all_force();
            }
        } else {
            state.readers = state.readers.saturating_sub(1);
            drop(state);
        }
    }
}

/// `file_operations` implementation dispatched for pipe-backed files.
/// `lseek`/`stat` on a pipe always fail: pipes have no byte offset to
/// seek within and no size to report.
pub struct PipeFileOps;

impl FileOperations for PipeFileOps {
    fn read(&self, file: &File, buf: &mut [u8]) -> Result<usize> {
        match &file.backing {
            Backing::Pipe(pipe) => pipe.read(file, buf),
            _ => Err(Errno::EINVAL),
        }
    }

    fn write(&self, file: &File, buf: &[u8]) -> Result<usize> {
        match &file.backing {
            Backing::Pipe(pipe) => pipe.write(file, buf),
            _ => Err(Errno::EINVAL),
        }
    }

    fn lseek(&self, _file: &File, _offset: i64, _whence: i32) -> Result<u64> {
        Err(Errno::ESPIPE)
    }

    fn stat(&self, _file: &File) -> Result<Stat> {
        Err(Errno::EINVAL)
    }

    fn fcntl(&self, file: &File, cmd: i32, arg: i64) -> Result<i64> {
        use crate::vfs::ops::{F_GETFL, F_SETFL};
        match cmd {
            F_GETFL => Ok(file.flags().bits() as i64),
            F_SETFL => {
                let requested = OpenFlags::from_bits_truncate(arg as u32);
                let mut flags = file.flags();
                flags.set(OpenFlags::O_NONBLOCK, requested.contains(OpenFlags::O_NONBLOCK));
                file.set_flags(flags);
                Ok(0)
            }
            _ => Err(Errno::ENOSYS),
        }
    }
}

static PIPE_FILE_OPS: PipeFileOps = PipeFileOps;

/// `sys_pipe(fds[2])`: atomically allocate pipe info, create
/// two `vfs_file`s bound to it, enter them into the calling task's fd
/// table, return the fd pair.
pub fn sys_pipe(files: &mut crate::process::task::FileTable, now: u64) -> Result<(i32, i32)> {
    let pipe = PipeInode::new();

    let reader = Arc::new(File::new(
        alloc::string::String::from("pipe"),
        FileType::Fifo,
        OpenFlags::O_RDONLY,
        0o600,
        0,
        0,
        now,
        &PIPE_FILE_OPS,
        Backing::Pipe(pipe.clone()),
    ));
    let writer = Arc::new(File::new(
        alloc::string::String::from("pipe"),
        FileType::Fifo,
        OpenFlags::O_WRONLY,
        0o600,
        0,
        0,
        now,
        &PIPE_FILE_OPS,
        Backing::Pipe(pipe),
    ));

    let read_fd = files.alloc_fd(reader)?;
    let write_fd = match files.alloc_fd(writer) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = files.close(read_fd);
            return Err(e);
        }
    };
    Ok((read_fd, write_fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_flags(nonblock: bool) -> OpenFlags {
        let mut f = OpenFlags::O_RDONLY;
        if nonblock {
            f |= OpenFlags::O_NONBLOCK;
        }
        f
    }

    fn writer_flags(nonblock: bool) -> OpenFlags {
        let mut f = OpenFlags::O_WRONLY;
        if nonblock {
            f |= OpenFlags::O_NONBLOCK;
        }
        f
    }

    fn make_file(pipe: Arc<PipeInode>, flags: OpenFlags) -> File {
        File::new(
            alloc::string::String::from("pipe"),
            FileType::Fifo,
            flags,
            0o600,
            0,
            0,
            0,
            &PIPE_FILE_OPS,
            Backing::Pipe(pipe),
        )
    }

    /// Spec §8 scenario 3, reproduced verbatim (BUFSIZE=64, NUMBUFS=5).
    #[test]
    fn scenario_3_backpressure() {
        let pipe = PipeInode::new();
        let writer = make_file(pipe.clone(), writer_flags(true));
        let reader = make_file(pipe.clone(), reader_flags(true));

        let pattern = [0x41u8; PIPE_BUFFER_SIZE * PIPE_NUM_BUFFERS];
        assert_eq!(pipe.write(&writer, &pattern).unwrap(), pattern.len());

        assert_eq!(pipe.write(&writer, &[0x41]), Err(Errno::EAGAIN));

        let mut out = [0u8; 64];
        assert_eq!(pipe.read(&reader, &mut out).unwrap(), 64);
        assert!(out.iter().all(|&b| b == 0x41));

        let more = [0x41u8; 64];
        assert_eq!(pipe.write(&writer, &more).unwrap(), 64);
    }

    /// Spec §8 scenario 4, reproduced verbatim.
    #[test]
    fn scenario_4_eof() {
        let pipe = PipeInode::new();
        let writer = make_file(pipe.clone(), writer_flags(true));
        let reader = make_file(pipe.clone(), reader_flags(true));

        pipe.write(&writer, b"hi").unwrap();
        pipe.on_file_dropped(writer.flags());

        let mut out = [0u8; 8];
        let n = pipe.read(&reader, &mut out).unwrap();
        assert_eq!(&out[..n], b"hi");

        assert_eq!(pipe.read(&reader, &mut out).unwrap(), 0);
    }

    #[test]
    fn byte_conservation_round_trip() {
        let pipe = PipeInode::new();
        let writer = make_file(pipe.clone(), writer_flags(true));
        let reader = make_file(pipe.clone(), reader_flags(true));

        let msg = b"the quick brown fox";
        pipe.write(&writer, msg).unwrap();
        let mut out = [0u8; 32];
        let n = pipe.read(&reader, &mut out).unwrap();
        assert_eq!(&out[..n], msg);
    }

    #[test]
    fn write_with_no_readers_is_epipe() {
        let pipe = PipeInode::new();
        let writer = make_file(pipe.clone(), writer_flags(true));
        let reader = make_file(pipe.clone(), reader_flags(true));
        pipe.on_file_dropped(reader.flags());
        assert_eq!(pipe.write(&writer, b"x"), Err(Errno::EPIPE));
    }

    #[test]
    fn fcntl_getfl_setfl_round_trip() {
        let pipe = PipeInode::new();
        let writer = make_file(pipe, writer_flags(false));
        assert!(!writer.flags().is_nonblocking());
        let ops = PipeFileOps;
        ops.fcntl(&writer, crate::vfs::ops::F_SETFL, OpenFlags::O_NONBLOCK.bits() as i64).unwrap();
        assert!(writer.flags().is_nonblocking());
    }
}
