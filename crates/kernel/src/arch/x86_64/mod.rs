//! # x86_64 Architecture Support
//!
//! Platform-specific support for booting, exception handling and device
//! interaction on x86_64: legacy BIOS/PIC boot path, a flat GDT/TSS, the
//! IDT wiring every CPU exception plus the PIT-timer and ATA IRQs, a 16550
//! serial console and PIO access to PCI configuration space.
//!
//! ## Boot Flow
//!
//! ```text
//! Kernel Entry (_start)
//!     ↓
//! boot::early_init()
//!     ├── Disable interrupts
//!     ├── Load GDT (Global Descriptor Table)
//!     ├── Load TSS (Task State Segment)
//!     ├── Load IDT (Interrupt Descriptor Table)
//!     ├── Enable CPU features (SSE2, NX where available)
//!     ├── Initialize serial console (16550 UART)
//!     ├── Initialize legacy 8259A PIC
//!     ├── Program the PIT to the kernel's tick rate
//!     └── Enable interrupts
//!     ↓
//! Driver init (ATA via `drivers::ata`, PCI enumeration)
//!     ↓
//! Scheduler handoff to pid 1
//! ```
//!
//! ## Module Organization
//!
//! - `cpu`: CPU initialization and feature detection (SSE2, NX, FXSAVE)
//! - `gdt`: Global Descriptor Table setup (kernel code/data segments, TSS)
//! - `idt`: Interrupt Descriptor Table (exceptions 0-31, hardware IRQs 32+)
//! - `tss`: Task State Segment (IST stacks for double fault / NMI / #MC)
//! - `serial`: 16550 UART driver for COM1/COM2 serial ports
//! - `pic`: Legacy 8259A PIC (interrupt routing and EOI)
//! - `pit`: Programmable Interval Timer (8254 PIT, drives the tick clock)
//! - `pci`: PCI configuration space access (PIO config address/data ports)
//! - `boot`: Boot sequence and early init
//! - `switch`: Context switch (`switch_to`)
//!
//! ## Exception Handling
//!
//! All CPU exceptions (0-21) are handled, with double fault, NMI and
//! machine check routed to dedicated IST stacks (see `tss`). Hardware IRQs
//! are remapped behind the PIC starting at vector 32: IRQ0 (timer) drives
//! the scheduler tick, IRQ14/15 (primary/secondary ATA) signal command
//! completion to `drivers::ata`.

// Submodules
pub mod cpu;      // CPU initialization and features
pub mod gdt;      // Global Descriptor Table
pub mod idt;      // Interrupt Descriptor Table
pub mod tss;      // Task State Segment
pub mod serial;   // 16550 UART driver
pub mod boot;     // Boot sequence and early init
pub mod switch;   // Context switch (switch_to)

pub mod pic;      // Legacy 8259A PIC
pub mod pit;      // Programmable Interval Timer
pub mod pci;      // PCI configuration space (PIO)

// Re-exports for common use
pub use cpu::*;
pub use gdt::init_gdt;
pub use idt::init_idt_early;
pub use tss::init_tss;
pub use serial::{init_serial, serial_write, serial_read};

use x86_64::instructions::interrupts;

/// CPU context for context switching
/// Contains callee-saved registers that must be preserved across function calls
/// according to the System V AMD64 ABI
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    // Callee-saved general-purpose registers
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    // Stack pointer
    pub rsp: u64,

    // Instruction pointer (return address)
    pub rip: u64,

    // RFLAGS (processor flags)
    pub rflags: u64,

    // FS and GS base (for TLS and per-CPU data)
    pub fs_base: u64,
    pub gs_base: u64,
}

impl CpuContext {
    /// Create a new empty context
    pub const fn new() -> Self {
        Self {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
            rip: 0,
            rflags: 0,
            fs_base: 0,
            gs_base: 0,
        }
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" {
    /// Context switch function (will be implemented in switch.S)
    /// Saves current context to prev, restores from next
    pub fn switch_to(prev: *mut CpuContext, next: *const CpuContext);
}

/// Halt the CPU until the next interrupt
#[inline]
pub fn halt() {
    x86_64::instructions::hlt();
}

/// Halt the CPU forever (no interrupts)
#[inline]
pub fn halt_loop() -> ! {
    loop {
        interrupts::disable();
        halt();
    }
}

/// Read the current CPU cycle counter (TSC)
#[inline]
pub fn read_tsc() -> u64 {
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

/// Read Model-Specific Register
#[inline]
pub unsafe fn rdmsr(msr: u32) -> u64 {
    let (high, low): (u32, u32);
    core::arch::asm!(
        "rdmsr",
        in("ecx") msr,
        out("eax") low,
        out("edx") high,
        options(nomem, nostack, preserves_flags)
    );
    ((high as u64) << 32) | (low as u64)
}

/// Write Model-Specific Register
#[inline]
pub unsafe fn wrmsr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    core::arch::asm!(
        "wrmsr",
        in("ecx") msr,
        in("eax") low,
        in("edx") high,
        options(nomem, nostack, preserves_flags)
    );
}

/// Invalidate TLB entry for a specific virtual address
#[inline]
pub fn invlpg(addr: u64) {
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) addr,
            options(nostack, preserves_flags)
        );
    }
}

/// Flush entire TLB by reloading CR3
#[inline]
pub fn flush_tlb() {
    use x86_64::registers::control::Cr3;
    let (frame, flags) = Cr3::read();
    unsafe {
        Cr3::write(frame, flags);
    }
}
