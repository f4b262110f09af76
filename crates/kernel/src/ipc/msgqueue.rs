//! System-V message-queue IPC.
//!
//! Each queue owns a FIFO of messages tagged with a `long` type; `msgget`
//! creates or looks a queue up by key, `msgsnd`/`msgrcv` move messages in
//! and out under a byte budget, `msgctl` removes a queue or reports its
//! descriptor. This implementation does not block on backpressure: `send`
//! returns `EAGAIN` once `cbytes + sz >= qbytes` rather than waiting on a
//! writers queue.
//!
//! The queue table follows the same `Mutex<BTreeMap<id, Entry>>`-behind-a-
//! thin-owned-API idiom `process::mod`'s task table uses elsewhere in this
//! crate. Permission bits follow the scheme
//! `crate::process::task::Credentials` already uses for uid/gid.

use crate::lib::config::Config;
use crate::lib::error::{Errno, Result};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

/// Upper bound on a single message's payload, exclusive: `sz == MSGMAX`
/// fails `EINVAL`, `sz == MSGMAX - 1` succeeds.
pub const MSGMAX: usize = Config::DEFAULT.msgmax;

/// Default per-queue byte budget.
pub const MSGMNB: u64 = Config::DEFAULT.msgmnb;

/// Sentinel `key` passed to `msgget` requesting a fresh, unshared queue.
pub const IPC_PRIVATE: i32 = 0;

pub const IPC_CREAT: i32 = 0o1000;
pub const IPC_EXCL: i32 = 0o2000;
pub const IPC_NOWAIT: i32 = 0o4000;

pub const IPC_RMID: i32 = 0;
pub const IPC_SET: i32 = 1;
pub const IPC_STAT: i32 = 2;

pub const MSG_NOERROR: i32 = 0o10000;

const S_IRUSR: u32 = 0o400;
const S_IWUSR: u32 = 0o200;
const S_IRGRP: u32 = 0o040;
const S_IWGRP: u32 = 0o020;
const S_IROTH: u32 = 0o004;
const S_IWOTH: u32 = 0o002;

/// Caller identity for the permission check, mirrors
/// `process::task::Credentials`.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    fn is_root(&self) -> bool {
        self.pid == 0 || self.uid == 0 || self.gid == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

struct Message {
    mtype: i64,
    data: Vec<u8>,
}

struct Queue {
    key: i32,
    uid: u32,
    gid: u32,
    cuid: u32,
    cgid: u32,
    mode: u32,
    sequence: u32,
    stime: u64,
    rtime: u64,
    ctime: u64,
    cbytes: u64,
    qnum: u64,
    qbytes: u64,
    lspid: u32,
    lrpid: u32,
    messages: Vec<Message>,
}

impl Queue {
    fn check_access(&self, caller: &Caller, access: Access) -> bool {
        if caller.is_root() {
            return true;
        }
        let (owner_bit, group_bit, other_bit) = match access {
            Access::Read => (S_IRUSR, S_IRGRP, S_IROTH),
            Access::Write => (S_IWUSR, S_IWGRP, S_IWOTH),
        };
        if caller.uid == self.uid {
            self.mode & owner_bit != 0
        } else if caller.gid == self.gid {
            self.mode & group_bit != 0
        } else {
            self.mode & other_bit != 0
        }
    }
}

/// Plain-old-data snapshot for `IPC_STAT`, mirroring `msqid_ds`.
#[derive(Debug, Clone, Copy)]
pub struct MsqidDs {
    pub uid: u32,
    pub gid: u32,
    pub cuid: u32,
    pub cgid: u32,
    pub mode: u32,
    pub stime: u64,
    pub rtime: u64,
    pub ctime: u64,
    pub cbytes: u64,
    pub qnum: u64,
    pub qbytes: u64,
    pub lspid: u32,
    pub lrpid: u32,
}

struct Table {
    queues: BTreeMap<i32, Queue>,
    by_key: BTreeMap<i32, i32>,
    next_id: i32,
}

/// Owned registry of all message queues; hides the global mutable state
/// behind an owned subsystem handle rather than free-standing statics.
pub struct MsgQueues {
    table: Mutex<Table>,
}

impl MsgQueues {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                queues: BTreeMap::new(),
                by_key: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// `msgget(key, flags)`. `flags` holds the requested mode bits in its
    /// low 9 bits plus `IPC_CREAT`/`IPC_EXCL`.
    pub fn get(&self, key: i32, flags: i32, caller: Caller, now: u64) -> Result<i32> {
        let mode = (flags as u32) & 0o777;
        let mut table = self.table.lock();

        if key == IPC_PRIVATE {
            let id = table.next_id;
            table.next_id += 1;
            table.queues.insert(
                id,
                Queue {
                    key,
                    uid: caller.uid,
                    gid: caller.gid,
                    cuid: caller.uid,
                    cgid: caller.gid,
                    mode,
                    sequence: 0,
                    stime: 0,
                    rtime: 0,
                    ctime: now,
                    cbytes: 0,
                    qnum: 0,
                    qbytes: MSGMNB,
                    lspid: 0,
                    lrpid: 0,
                    messages: Vec::new(),
                },
            );
            return Ok(id);
        }

        if let Some(&id) = table.by_key.get(&key) {
            if flags & (IPC_CREAT | IPC_EXCL) == (IPC_CREAT | IPC_EXCL) {
                return Err(Errno::EEXIST);
            }
            let queue = table.queues.get(&id).ok_or(Errno::EIDRM)?;
            if !queue.check_access(&caller, Access::Read) {
                return Err(Errno::EACCES);
            }
            return Ok(id);
        }

        if flags & IPC_CREAT == 0 {
            return Err(Errno::ENOENT);
        }

        let id = table.next_id;
        table.next_id += 1;
        table.by_key.insert(key, id);
        table.queues.insert(
            id,
            Queue {
                key,
                uid: caller.uid,
                gid: caller.gid,
                cuid: caller.uid,
                cgid: caller.gid,
                mode,
                sequence: 0,
                stime: 0,
                rtime: 0,
                ctime: now,
                cbytes: 0,
                qnum: 0,
                qbytes: MSGMNB,
                lspid: 0,
                lrpid: 0,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    /// `msgsnd(id, mtype, payload, flags)`. Non-blocking: a full queue
    /// fails `EAGAIN` regardless of `IPC_NOWAIT` (blocking under
    /// `!IPC_NOWAIT` is a legal extension this implementation does not
    /// take).
    pub fn send(&self, id: i32, mtype: i64, payload: &[u8], caller: Caller, now: u64) -> Result<()> {
        if id < 0 {
            return Err(Errno::EINVAL);
        }
        if payload.is_empty() || payload.len() >= MSGMAX {
            return Err(Errno::EINVAL);
        }
        if mtype <= 0 {
            return Err(Errno::EINVAL);
        }

        let mut table = self.table.lock();
        let queue = table.queues.get_mut(&id).ok_or(Errno::EIDRM)?;
        if !queue.check_access(&caller, Access::Write) {
            return Err(Errno::EACCES);
        }
        let sz = payload.len() as u64;
        if queue.cbytes + sz >= queue.qbytes {
            return Err(Errno::EAGAIN);
        }

        queue.messages.push(Message { mtype, data: payload.to_vec() });
        queue.cbytes += sz;
        queue.qnum += 1;
        queue.stime = now;
        queue.lspid = caller.pid;
        Ok(())
    }

    /// `msgrcv(id, buf, type, flags)`. Returns the delivered byte count
    /// and the message's `mtype`. `type == 0` takes the head;
    /// `type > 0` the first exact match; `type < 0` the lowest type `<=
    /// |type|`, ties broken FIFO.
    pub fn recv(
        &self,
        id: i32,
        buf: &mut [u8],
        msg_type: i64,
        flags: i32,
        caller: Caller,
        now: u64,
    ) -> Result<(usize, i64)> {
        if id < 0 {
            return Err(Errno::EINVAL);
        }

        let mut table = self.table.lock();
        let queue = table.queues.get_mut(&id).ok_or(Errno::EIDRM)?;
        if !queue.check_access(&caller, Access::Read) {
            return Err(Errno::EACCES);
        }

        let index = select_message(&queue.messages, msg_type).ok_or(Errno::ENOMSG)?;

        let msg_len = queue.messages[index].data.len();
        if msg_len > buf.len() && flags & MSG_NOERROR == 0 {
            return Err(Errno::E2BIG);
        }

        let msg = queue.messages.remove(index);
        let n = core::cmp::min(msg.data.len(), buf.len());
        buf[..n].copy_from_slice(&msg.data[..n]);

        queue.cbytes -= msg.data.len() as u64;
        queue.qnum -= 1;
        queue.rtime = now;
        queue.lrpid = caller.pid;

        Ok((n, msg.mtype))
    }

    /// `msgctl(id, cmd, ...)`. `IPC_RMID` requires ownership; `IPC_STAT`
    /// requires read permission.
    pub fn ctl_rmid(&self, id: i32, caller: Caller) -> Result<()> {
        let mut table = self.table.lock();
        let queue = table.queues.get(&id).ok_or(Errno::EIDRM)?;
        if !caller.is_root() && caller.uid != queue.uid && caller.uid != queue.cuid {
            return Err(Errno::EPERM);
        }
        let key = queue.key;
        table.queues.remove(&id);
        if key != IPC_PRIVATE {
            table.by_key.remove(&key);
        }
        Ok(())
    }

    pub fn ctl_stat(&self, id: i32, caller: Caller) -> Result<MsqidDs> {
        let table = self.table.lock();
        let queue = table.queues.get(&id).ok_or(Errno::EIDRM)?;
        if !queue.check_access(&caller, Access::Read) {
            return Err(Errno::EACCES);
        }
        Ok(MsqidDs {
            uid: queue.uid,
            gid: queue.gid,
            cuid: queue.cuid,
            cgid: queue.cgid,
            mode: queue.mode,
            stime: queue.stime,
            rtime: queue.rtime,
            ctime: queue.ctime,
            cbytes: queue.cbytes,
            qnum: queue.qnum,
            qbytes: queue.qbytes,
            lspid: queue.lspid,
            lrpid: queue.lrpid,
        })
    }

    /// Render one formatted line per live queue for `/proc/ipc/msg`,
    /// mirroring the column layout of Linux's `/proc/sysvipc/msg` —
    /// consumed by tools, not read back by the kernel itself.
    pub fn proc_ipc_msg_line(&self) -> alloc::string::String {
        use core::fmt::Write;
        let table = self.table.lock();
        let mut out = alloc::string::String::new();
        let _ = writeln!(
            out,
            "{:>10} {:>10} {:>6} {:>6} {:>6} {:>6} {:>6} {:>10} {:>10}",
            "key", "msqid", "perms", "cbytes", "qnum", "lspid", "lrpid", "uid", "gid"
        );
        for (&id, queue) in table.queues.iter() {
            let _ = writeln!(
                out,
                "{:>10} {:>10} {:>6o} {:>6} {:>6} {:>6} {:>6} {:>10} {:>10}",
                queue.key, id, queue.mode, queue.cbytes, queue.qnum, queue.lspid, queue.lrpid, queue.uid, queue.gid
            );
        }
        out
    }
}

fn select_message(messages: &[Message], msg_type: i64) -> Option<usize> {
    if msg_type == 0 {
        return if messages.is_empty() { None } else { Some(0) };
    }
    if msg_type > 0 {
        return messages.iter().position(|m| m.mtype == msg_type);
    }
    let bound = -msg_type;
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.mtype <= bound)
        .min_by_key(|(i, m)| (m.mtype, *i))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> Caller {
        Caller { pid: 1, uid: 0, gid: 0 }
    }

    #[test]
    fn round_trip_on_empty_queue() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        q.send(id, 7, b"hello", caller(), 1).unwrap();
        let mut buf = [0u8; 16];
        let (n, mtype) = q.recv(id, &mut buf, 0, 0, caller(), 2).unwrap();
        assert_eq!(mtype, 7);
        assert_eq!(&buf[..n], b"hello");
    }

    /// Four messages land in FIFO order a(mtype=2), b(mtype=1), c(mtype=3),
    /// d(mtype=1); each `recv` below is traced against `select_message`'s
    /// actual dispatch rule rather than a gut-feel ordering.
    #[test]
    fn scenario_2_ordering() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        q.send(id, 2, b"a", caller(), 0).unwrap();
        q.send(id, 1, b"b", caller(), 0).unwrap();
        q.send(id, 3, b"c", caller(), 0).unwrap();
        q.send(id, 1, b"d", caller(), 0).unwrap();

        let mut buf = [0u8; 8];

        // type=1: first exact match in FIFO order is "b".
        let (n, t) = q.recv(id, &mut buf, 1, 0, caller(), 0).unwrap();
        assert_eq!((t, &buf[..n]), (1, &b"b"[..]));

        // type=-2: candidates with mtype<=2 are "a" (mtype 2) and "d"
        // (mtype 1); the lowest mtype wins, so "d" is returned, not "a".
        let (n, t) = q.recv(id, &mut buf, -2, 0, caller(), 0).unwrap();
        assert_eq!((t, &buf[..n]), (1, &b"d"[..]));

        // type=0: takes the current FIFO head, which is "a".
        let (n, t) = q.recv(id, &mut buf, 0, 0, caller(), 0).unwrap();
        assert_eq!((t, &buf[..n]), (2, &b"a"[..]));

        // type=3: only "c" remains and it matches.
        let (n, t) = q.recv(id, &mut buf, 3, 0, caller(), 0).unwrap();
        assert_eq!((t, &buf[..n]), (3, &b"c"[..]));

        assert_eq!(q.recv(id, &mut buf, 0, 0, caller(), 0), Err(Errno::ENOMSG));
    }

    #[test]
    fn send_size_boundary() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        let max = alloc::vec![0u8; MSGMAX];
        assert_eq!(q.send(id, 1, &max, caller(), 0), Err(Errno::EINVAL));
        let almost = alloc::vec![0u8; MSGMAX - 1];
        assert!(q.send(id, 1, &almost, caller(), 0).is_ok());
    }

    #[test]
    fn recv_buffer_too_small_is_e2big_unless_noerror() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        q.send(id, 1, b"0123456789", caller(), 0).unwrap();
        let mut small = [0u8; 4];
        assert_eq!(q.recv(id, &mut small, 0, 0, caller(), 0), Err(Errno::E2BIG));
        let (n, _) = q.recv(id, &mut small, 0, MSG_NOERROR, caller(), 0).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&small, b"0123");
    }

    #[test]
    fn backpressure_returns_eagain() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        {
            let mut table = q.table.lock();
            table.queues.get_mut(&id).unwrap().qbytes = 4;
        }
        assert_eq!(q.send(id, 1, b"abcd", caller(), 0), Err(Errno::EAGAIN));
        assert!(q.send(id, 1, b"ab", caller(), 0).is_ok());
    }

    #[test]
    fn ipc_stat_after_get_is_zeroed_with_supplied_mode() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o640, caller(), 5).unwrap();
        let stat = q.ctl_stat(id, caller()).unwrap();
        assert_eq!(stat.mode, 0o640);
        assert_eq!(stat.cbytes, 0);
        assert_eq!(stat.qnum, 0);
    }

    #[test]
    fn rmid_requires_ownership() {
        let q = MsgQueues::new();
        let id = q.get(IPC_PRIVATE, 0o600, caller(), 0).unwrap();
        let stranger = Caller { pid: 2, uid: 1000, gid: 1000 };
        assert_eq!(q.ctl_rmid(id, stranger), Err(Errno::EPERM));
        assert!(q.ctl_rmid(id, caller()).is_ok());
        assert_eq!(q.ctl_stat(id, caller()), Err(Errno::EIDRM));
    }

    #[test]
    fn exclusive_create_on_existing_key_fails_eexist() {
        let q = MsgQueues::new();
        let key = 42;
        q.get(key, 0o600 | IPC_CREAT, caller(), 0).unwrap();
        assert_eq!(q.get(key, 0o600 | IPC_CREAT | IPC_EXCL, caller(), 0), Err(Errno::EEXIST));
    }

    #[test]
    fn lookup_without_creat_on_missing_key_fails_enoent() {
        let q = MsgQueues::new();
        assert_eq!(q.get(99, 0o600, caller(), 0), Err(Errno::ENOENT));
    }
}
