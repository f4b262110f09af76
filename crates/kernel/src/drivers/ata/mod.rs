//! PIO-programmed, bus-master-DMA ATA block driver.
//!
//! Device discovery walks PCI looking for an Intel IDE controller, then
//! probes the four canonical legacy IDE positions. Each found device gets
//! a single-entry PRDT and one `ATA_DMA_SIZE`-byte bounce buffer; sector
//! transfers are driven by programming the task-file registers, kicking
//! off bus-master DMA, then releasing the device lock and waiting for
//! completion. The IDE IRQ acknowledges the bus-master status register
//! and wakes the channel's completion queue; the transfer side re-checks
//! the status registers itself rather than trusting the wakeup alone, so
//! a missed or spurious interrupt just costs one more pass through the
//! loop instead of a stuck task.
//!
//! Built on this crate's own PCI (`arch::x86_64::pci`) and PIC
//! (`arch::x86_64::pic`) modules for bus enumeration/BAR decoding and IRQ
//! vectors, in the reference PIO driver style (task-file register
//! layout, status/error bit names) common to PIO ATA drivers, and in
//! `vfs::pipe`'s sleep-on/re-check idiom for the completion wait.

use crate::arch::x86_64::pci::{self, BarType, PciDevice};
use crate::drivers::error::{DriverError, DriverResult};
use crate::drivers::timeout::{Timeout, TimeoutError, LONG_TIMEOUT_US};
use crate::sched::waitqueue::WaitQueueHead;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::instructions::port::Port;

pub const ATA_SECTOR_SIZE: usize = 512;
const ATA_DMA_SIZE: usize = 512;

const IDE0_BASE: u16 = 0x1F0;
const IDE0_CTRL: u16 = 0x3F6;
const IDE1_BASE: u16 = 0x170;
const IDE1_CTRL: u16 = 0x376;

const REG_DATA: u16 = 0;
const REG_FEATURES: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_STATUS_CMD: u16 = 7;

/// Status register bits (bit-for-bit the ATA specification's layout).
mod status {
    pub const ERR: u8 = 0x01;
    pub const IDX: u8 = 0x02;
    pub const CORR: u8 = 0x04;
    pub const DRQ: u8 = 0x08;
    pub const SRV: u8 = 0x10;
    pub const DF: u8 = 0x20;
    pub const RDY: u8 = 0x40;
    pub const BSY: u8 = 0x80;
}

/// Error register bits.
mod err {
    pub const AMNF: u8 = 0x01;
    pub const TKZNF: u8 = 0x02;
    pub const ABRT: u8 = 0x04;
    pub const MCR: u8 = 0x08;
    pub const IDNF: u8 = 0x10;
    pub const MC: u8 = 0x20;
    pub const UNC: u8 = 0x40;
    pub const BBK: u8 = 0x80;
}

const CMD_IDENTIFY: u8 = 0xEC;
const CMD_READ_DMA: u8 = 0xC8;
const CMD_WRITE_DMA: u8 = 0xCA;

/// Bus-master register offsets, relative to the channel's bus-master base
/// (`BAR4` for primary, `BAR4+8` for secondary).
mod bm {
    pub const COMMAND: u16 = 0x0;
    pub const STATUS: u16 = 0x2;
    pub const PRDT: u16 = 0x4;

    pub const CMD_START: u8 = 0x01;
    pub const CMD_READ: u8 = 0x08;

    pub const STATUS_ERROR: u8 = 0x02;
    pub const STATUS_INTERRUPT: u8 = 0x04;
}

const INTEL_IDE_VENDOR: u16 = 0x8086;
const INTEL_IDE_DEVICES: [u16; 2] = [0x7010, 0x7111];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Unknown,
    None,
    Pata,
    Sata,
    Patapi,
    Satapi,
}

fn classify(lba_mid: u8, lba_high: u8) -> DeviceType {
    match (lba_mid, lba_high) {
        (0x00, 0x00) => DeviceType::Pata,
        (0x3C, 0xC3) => DeviceType::Sata,
        (0x14, 0xEB) => DeviceType::Patapi,
        (0x69, 0x96) => DeviceType::Satapi,
        (0xFF, 0xFF) => DeviceType::None,
        _ => DeviceType::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Secondary,
}

/// One entry of the Physical Region Descriptor Table: a DMA buffer
/// descriptor bus-master DMA reads to figure out what to transfer.
#[repr(C, packed)]
struct PrdEntry {
    phys_addr: u32,
    byte_count: u16,
    flags: u16,
}

const PRD_EOT: u16 = 0x8000;

struct TaskFile {
    base: u16,
    ctrl: u16,
}

impl TaskFile {
    fn port_u8(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    fn read_status(&self) -> u8 {
        unsafe { self.port_u8(REG_STATUS_CMD).read() }
    }

    fn read_error(&self) -> u8 {
        unsafe { self.port_u8(REG_FEATURES).read() }
    }

    fn wait_bsy_clear(&self) -> DriverResult<()> {
        Timeout::long()
            .wait(|| self.read_status() & status::BSY == 0)
            .map_err(DriverError::from)
    }

    fn select_drive(&self, slave: bool, lba28_top: u8) {
        unsafe {
            self.port_u8(REG_DRIVE_HEAD).write(0xE0 | ((slave as u8) << 4) | (lba28_top & 0x0F));
        }
    }

    fn program_lba28(&self, lba: u32, sector_count: u8) {
        unsafe {
            self.port_u8(REG_FEATURES).write(0);
            self.port_u8(REG_SECTOR_COUNT).write(sector_count);
            self.port_u8(REG_LBA_LOW).write(lba as u8);
            self.port_u8(REG_LBA_MID).write((lba >> 8) as u8);
            self.port_u8(REG_LBA_HIGH).write((lba >> 16) as u8);
        }
    }

    fn issue_command(&self, cmd: u8) {
        unsafe { self.port_u8(REG_STATUS_CMD).write(cmd) };
    }

    fn identify(&self) -> DriverResult<[u16; 256]> {
        self.wait_bsy_clear()?;
        unsafe { self.port_u8(REG_SECTOR_COUNT).write(0) };
        self.select_drive(false, 0);
        self.issue_command(CMD_IDENTIFY);
        if self.read_status() == 0 {
            return Err(DriverError::DeviceNotFound);
        }
        self.wait_bsy_clear()?;
        let mut words = [0u16; 256];
        let mut data: Port<u16> = Port::new(self.base + REG_DATA);
        for w in words.iter_mut() {
            *w = unsafe { data.read() };
        }
        Ok(words)
    }
}

/// `IDENTIFY` response fields this driver cares about.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub model: String,
    pub sectors_28: u32,
    pub sectors_48: u64,
}

fn identity_from_words(words: &[u16; 256]) -> Identity {
    let model = ata_string(&words[27..47]);
    let sectors_28 = (words[60] as u32) | ((words[61] as u32) << 16);
    let sectors_48 = (words[100] as u64)
        | ((words[101] as u64) << 16)
        | ((words[102] as u64) << 32)
        | ((words[103] as u64) << 48);
    Identity { model, sectors_28, sectors_48 }
}

/// ATA identity strings are transmitted byte-swapped within each 16-bit
/// word; undo that before trimming trailing spaces.
fn ata_string(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for &w in words {
        bytes.push((w >> 8) as u8);
        bytes.push((w & 0xFF) as u8);
    }
    let s = core::str::from_utf8(&bytes).unwrap_or("").trim();
    String::from(s)
}

struct BusMaster {
    base: u16,
}

impl BusMaster {
    fn port_u8(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }
    fn port_u32(&self, offset: u16) -> Port<u32> {
        Port::new(self.base + offset)
    }

    fn set_prdt(&self, phys_addr: u32) {
        unsafe { self.port_u32(bm::PRDT).write(phys_addr) };
    }

    fn start(&self, read: bool) {
        let mut cmd = bm::CMD_START;
        if read {
            cmd |= bm::CMD_READ;
        }
        unsafe {
            self.port_u8(bm::COMMAND).write(0);
            // Write-1-to-clear any stale error/interrupt bits before the
            // transfer starts.
            self.port_u8(bm::STATUS).write(bm::STATUS_ERROR | bm::STATUS_INTERRUPT);
            self.port_u8(bm::COMMAND).write(cmd);
        }
    }

    fn stop(&self) {
        unsafe { self.port_u8(bm::COMMAND).write(0) };
    }

    fn status(&self) -> u8 {
        unsafe { self.port_u8(bm::STATUS).read() }
    }

    fn ack(&self) {
        unsafe { self.port_u8(bm::STATUS).write(bm::STATUS_ERROR | bm::STATUS_INTERRUPT) };
    }
}

/// Per-channel transfer-completion wait queue: `on_irq` wakes the one
/// matching the IRQ that fired, `transfer_sector` sleeps on it between
/// status polls.
static CHANNEL_WAIT: [WaitQueueHead; 2] = [WaitQueueHead::new(), WaitQueueHead::new()];

fn channel_wait(channel: Channel) -> &'static WaitQueueHead {
    match channel {
        Channel::Primary => &CHANNEL_WAIT[0],
        Channel::Secondary => &CHANNEL_WAIT[1],
    }
}

/// One detected ATA device.
pub struct AtaDevice {
    pub name: String,
    pub path: String,
    pub device_type: DeviceType,
    pub channel: Channel,
    pub slave: bool,
    pub identity: Identity,
    lock: Mutex<AtaIo>,
}

struct AtaIo {
    task_file: TaskFile,
    bus_master: BusMaster,
    prd: &'static mut PrdEntry,
    prd_phys: u32,
    dma_buf: &'static mut [u8; ATA_DMA_SIZE],
    dma_phys: u32,
}

impl AtaDevice {
    /// Upper bound on byte offset this device will serve.
    pub fn max_offset(&self) -> u64 {
        let sectors = if self.identity.sectors_48 != 0 {
            self.identity.sectors_48
        } else {
            self.identity.sectors_28 as u64
        };
        sectors * ATA_SECTOR_SIZE as u64
    }

    /// Transfer exactly one `ATA_SECTOR_SIZE`-byte sector at `lba`. `read`
    /// selects `READ_DMA`/`WRITE_DMA`; for writes the caller has already
    /// staged `buf` into the bounce buffer.
    ///
    /// The device lock is held only while programming the task-file
    /// registers and kicking off bus-master DMA, and again briefly at the
    /// end to read status and finish the transfer; it is released for the
    /// wait in between so an IRQ landing on another CPU-bound task (or the
    /// IRQ handler itself, on this single-CPU kernel) is never blocked on
    /// a lock this call is sitting on.
    fn transfer_sector(&self, lba: u64, buf: &mut [u8; ATA_SECTOR_SIZE], read: bool) -> DriverResult<()> {
        {
            let mut io = self.lock.lock();

            io.task_file.wait_bsy_clear()?;

            io.bus_master.set_prdt(io.prd_phys);
            io.bus_master.start(read);

            io.task_file.wait_bsy_clear()?;
            io.task_file.select_drive(self.slave, (lba >> 24) as u8 & 0x0F);
            io.task_file.program_lba28(lba as u32, 1);

            if !read {
                io.dma_buf.copy_from_slice(buf);
            }

            let cmd = if read { CMD_READ_DMA } else { CMD_WRITE_DMA };
            io.task_file.issue_command(cmd);
            io.bus_master.start(read);
        }

        if let Err(e) = self.wait_for_transfer_complete() {
            let mut io = self.lock.lock();
            io.bus_master.stop();
            io.bus_master.ack();
            return Err(DriverError::from(e));
        }

        let mut io = self.lock.lock();
        let status = io.task_file.read_status();
        if status & status::ERR != 0 {
            let error = io.task_file.read_error();
            io.bus_master.ack();
            crate::warn!("ata: transfer error status=0x{:02x} error=0x{:02x}", status, error);
            return Err(DriverError::IoError);
        }

        if read {
            buf.copy_from_slice(io.dma_buf.as_slice());
        }

        io.bus_master.ack();
        Ok(())
    }

    /// Block until the bus-master interrupt bit is set and `BSY` has
    /// cleared, or until the overall timeout expires. Re-samples the
    /// status registers itself on every pass (the wait-queue wakeup is a
    /// hint, not a guarantee — `on_irq` may wake the queue for the other
    /// drive sharing this channel), taking the device lock only for the
    /// instant it takes to read the two status bytes.
    fn wait_for_transfer_complete(&self) -> Result<(), TimeoutError> {
        let wait = channel_wait(self.channel);
        let timeout = Timeout::long();
        loop {
            let done = {
                let io = self.lock.lock();
                io.bus_master.status() & bm::STATUS_INTERRUPT != 0 && io.task_file.read_status() & status::BSY == 0
            };
            if done {
                return Ok(());
            }
            if timeout.is_expired() {
                return Err(TimeoutError::new(timeout.elapsed_us(), LONG_TIMEOUT_US));
            }
            crate::sched::waitqueue::sleep_on(wait);
        }
    }

    /// Byte-range read spanning a possibly-unaligned prefix sector, whole
    /// aligned sectors, and a possibly-unaligned tail sector.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> DriverResult<usize> {
        self.ranged_transfer(offset, out.len(), |sector, sector_buf| {
            sector_buf.copy_from_slice(&[0u8; ATA_SECTOR_SIZE]);
            let mut scratch = [0u8; ATA_SECTOR_SIZE];
            self.transfer_sector(sector, &mut scratch, true)?;
            *sector_buf = scratch;
            Ok(())
        }, out)
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> DriverResult<usize> {
        let max_offset = self.max_offset();
        if offset >= max_offset {
            return Ok(0);
        }
        let len = data.len().min((max_offset - offset) as usize);
        let mut written = 0usize;
        let mut remaining = len;
        let mut cursor = offset;

        while remaining > 0 {
            let sector = cursor / ATA_SECTOR_SIZE as u64;
            let sector_off = (cursor % ATA_SECTOR_SIZE as u64) as usize;
            let chunk = (ATA_SECTOR_SIZE - sector_off).min(remaining);

            let mut sector_buf = [0u8; ATA_SECTOR_SIZE];
            if chunk != ATA_SECTOR_SIZE {
                // Partial sector: read-modify-write.
                self.transfer_sector(sector, &mut sector_buf, true)?;
            }
            sector_buf[sector_off..sector_off + chunk]
                .copy_from_slice(&data[written..written + chunk]);
            self.transfer_sector(sector, &mut sector_buf, false)?;

            written += chunk;
            remaining -= chunk;
            cursor += chunk as u64;
        }
        Ok(written)
    }

    fn ranged_transfer(
        &self,
        offset: u64,
        len: usize,
        mut read_sector: impl FnMut(u64, &mut [u8; ATA_SECTOR_SIZE]) -> DriverResult<()>,
        out: &mut [u8],
    ) -> DriverResult<usize> {
        let max_offset = self.max_offset();
        if offset >= max_offset {
            return Ok(0);
        }
        let len = len.min((max_offset - offset) as usize);
        let mut read = 0usize;
        let mut remaining = len;
        let mut cursor = offset;

        while remaining > 0 {
            let sector = cursor / ATA_SECTOR_SIZE as u64;
            let sector_off = (cursor % ATA_SECTOR_SIZE as u64) as usize;
            let chunk = (ATA_SECTOR_SIZE - sector_off).min(remaining);

            let mut sector_buf = [0u8; ATA_SECTOR_SIZE];
            read_sector(sector, &mut sector_buf)?;
            out[read..read + chunk].copy_from_slice(&sector_buf[sector_off..sector_off + chunk]);

            read += chunk;
            remaining -= chunk;
            cursor += chunk as u64;
        }
        Ok(read)
    }
}

static DEVICES: Mutex<Vec<Arc<AtaDevice>>> = Mutex::new(Vec::new());

/// All devices discovered by `init`, in detection order (`hda`, `hdb`, ...).
pub fn devices() -> Vec<Arc<AtaDevice>> {
    DEVICES.lock().clone()
}

/// Find an Intel IDE controller on the PCI bus and probe the four
/// canonical legacy positions, registering any PATA/SATA disk found.
/// ATAPI/SATAPI devices are recorded but never registered as block
/// files — they have no fixed-size sector range to serve through the
/// `BlockFile` trait.
pub fn init() {
    let pci_dev = find_intel_ide();
    let Some(pci_dev) = pci_dev else {
        crate::info!("ata: no Intel IDE controller found");
        return;
    };
    pci::PCI.lock().enable_bus_mastering(&pci_dev);

    let bar4_base = match pci_dev.bars.get(4) {
        Some(BarType::IoPort { port, .. }) => *port,
        _ => {
            crate::warn!("ata: BAR4 is not an I/O BAR, bus-master DMA unavailable");
            return;
        }
    };

    let positions = [
        (Channel::Primary, IDE0_BASE, IDE0_CTRL, bar4_base, false),
        (Channel::Primary, IDE0_BASE, IDE0_CTRL, bar4_base, true),
        (Channel::Secondary, IDE1_BASE, IDE1_CTRL, bar4_base + 8, false),
        (Channel::Secondary, IDE1_BASE, IDE1_CTRL, bar4_base + 8, true),
    ];

    let mut next_letter = b'a';
    for (channel, base, ctrl, bm_base, slave) in positions {
        let task_file = TaskFile { base, ctrl };
        let Ok(words) = task_file.identify() else {
            continue;
        };
        let device_type = classify((words[0] >> 8) as u8, (words[0] & 0xFF) as u8)
            .eq(&DeviceType::Unknown)
            .then(|| DeviceType::Unknown)
            .unwrap_or_else(|| classify_from_signature(base));

        if device_type == DeviceType::None || device_type == DeviceType::Unknown {
            continue;
        }
        if device_type == DeviceType::Patapi || device_type == DeviceType::Satapi {
            crate::info!("ata: found ATAPI/SATAPI device on {:?}, not registering (EPERM)", channel);
            continue;
        }

        let identity = identity_from_words(&words);
        let (prd, prd_phys) = alloc_prdt();
        let (dma_buf, dma_phys) = alloc_dma_buf();
        prd.phys_addr = dma_phys;
        prd.byte_count = ATA_DMA_SIZE as u16;
        prd.flags = PRD_EOT;

        let name = alloc::format!("hd{}", next_letter as char);
        let path = alloc::format!("/dev/{}", name);
        next_letter += 1;

        let device = Arc::new(AtaDevice {
            name,
            path,
            device_type,
            channel,
            slave,
            identity,
            lock: Mutex::new(AtaIo {
                task_file: TaskFile { base, ctrl },
                bus_master: BusMaster { base: bm_base },
                prd,
                prd_phys,
                dma_buf,
                dma_phys,
            }),
        });

        crate::info!(
            "ata: {} model={} sectors_28={} sectors_48={}",
            device.path, device.identity.model, device.identity.sectors_28, device.identity.sectors_48
        );
        crate::vfs::register_block_device(device.clone());
        DEVICES.lock().push(device);
    }
}

fn classify_from_signature(base: u16) -> DeviceType {
    let tf = TaskFile { base, ctrl: 0 };
    classify(
        unsafe { tf.port_u8(REG_LBA_MID).read() },
        unsafe { tf.port_u8(REG_LBA_HIGH).read() },
    )
}

fn find_intel_ide() -> Option<PciDevice> {
    pci::PCI
        .lock()
        .scan_all()
        .into_iter()
        .find(|d| d.vendor_id == INTEL_IDE_VENDOR && INTEL_IDE_DEVICES.contains(&d.device_id))
}

/// Allocate a single-entry PRDT: physical, uint32-aligned, non-crossing a
/// 64 KiB boundary. The kernel runs identity-mapped, so the
/// allocation's virtual address doubles as its physical address.
fn alloc_prdt() -> (&'static mut PrdEntry, u32) {
    use crate::hal::dma::dma_alloc;
    let buf = dma_alloc(core::mem::size_of::<PrdEntry>(), 4, true).expect("PRDT allocation failed");
    let phys = buf.as_ptr() as u32;
    let entry = unsafe { &mut *(buf.as_ptr() as *mut PrdEntry) };
    core::mem::forget(buf);
    (entry, phys)
}

fn alloc_dma_buf() -> (&'static mut [u8; ATA_DMA_SIZE], u32) {
    use crate::hal::dma::dma_alloc;
    let buf = dma_alloc(ATA_DMA_SIZE, 4, true).expect("DMA buffer allocation failed");
    let phys = buf.as_ptr() as u32;
    let array = unsafe { &mut *(buf.as_ptr() as *mut [u8; ATA_DMA_SIZE]) };
    core::mem::forget(buf);
    (array, phys)
}

/// IRQ14/IRQ15 top half: acknowledge the bus-master status on every
/// device sharing the channel, then wake whichever task is waiting on a
/// transfer for this channel. The woken task re-checks the status
/// registers itself rather than trusting the wakeup, so waking the wrong
/// drive's waiter (both drives on a channel share one IRQ line) just
/// costs it one extra pass through the poll loop.
pub fn on_irq(channel: Channel) {
    for device in DEVICES.lock().iter() {
        if device.channel == channel {
            device.lock.lock().bus_master.ack();
        }
    }
    channel_wait(channel).wake_all_force();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_signature_bytes_from_lba_mid_high() {
        assert_eq!(classify(0x00, 0x00), DeviceType::Pata);
        assert_eq!(classify(0x3C, 0xC3), DeviceType::Sata);
        assert_eq!(classify(0x14, 0xEB), DeviceType::Patapi);
        assert_eq!(classify(0x69, 0x96), DeviceType::Satapi);
        assert_eq!(classify(0xFF, 0xFF), DeviceType::None);
        assert_eq!(classify(0x11, 0x22), DeviceType::Unknown);
    }

    #[test]
    fn identity_parses_28_and_48_bit_sector_counts() {
        let mut words = [0u16; 256];
        words[60] = 0x1234;
        words[61] = 0x0001;
        words[100] = 0xAAAA;
        let id = identity_from_words(&words);
        assert_eq!(id.sectors_28, 0x0001_1234);
        assert_eq!(id.sectors_48 & 0xFFFF, 0xAAAA);
    }
}
