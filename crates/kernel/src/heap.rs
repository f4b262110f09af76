//! Kernel heap allocator: `linked_list_allocator` backing a fixed static
//! region, wrapped in a stats-tracking `GlobalAlloc` for the allocation
//! counters boot diagnostics print.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, Ordering};
use linked_list_allocator::LockedHeap;
use spin::Mutex;

#[repr(align(64))]
struct CacheAlignedArray([u8; HEAP_SIZE]);

static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub struct HeapStats {
    total_allocations: usize,
    total_deallocations: usize,
    current_allocated: usize,
    peak_allocated: usize,
    allocation_failures: usize,
}

impl HeapStats {
    pub fn total_allocations(&self) -> usize { self.total_allocations }
    pub fn total_deallocations(&self) -> usize { self.total_deallocations }
    pub fn current_allocated(&self) -> usize { self.current_allocated }
    pub fn peak_allocated(&self) -> usize { self.peak_allocated }
    pub fn allocation_failures(&self) -> usize { self.allocation_failures }
}

static HEAP_STATS: Mutex<HeapStats> = Mutex::new(HeapStats {
    total_allocations: 0,
    total_deallocations: 0,
    current_allocated: 0,
    peak_allocated: 0,
    allocation_failures: 0,
});

const HEAP_START: usize = 0x444_44440_0000;
const HEAP_SIZE: usize = 8 * 1024 * 1024;

pub const fn heap_total_size() -> usize {
    HEAP_SIZE
}

static HEAP_INIT_DONE: AtomicBool = AtomicBool::new(false);

/// Initialize the kernel heap from a static backing array. Idempotent —
/// callers don't need to track whether boot has already run this.
pub fn init_heap() -> Result<(), &'static str> {
    if HEAP_INIT_DONE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        unsafe {
            static mut HEAP_MEMORY: CacheAlignedArray = CacheAlignedArray([0; HEAP_SIZE]);
            let heap_arr_ptr = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut CacheAlignedArray;
            let heap_start = core::ptr::addr_of_mut!((*heap_arr_ptr).0) as *mut u8;

            ALLOCATOR.lock().init(heap_start, HEAP_SIZE);

            crate::uart_print(b"[HEAP] Initialized ");
            print_size(HEAP_SIZE);
            crate::uart_print(b" heap at 0x");
            print_hex(heap_start as usize);
            crate::uart_print(b"\n");
        }
    }
    Ok(())
}

pub struct StatsTrackingAllocator;

unsafe impl GlobalAlloc for StatsTrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = ALLOCATOR.alloc(layout);

        let mut stats = HEAP_STATS.lock();
        if !ptr.is_null() {
            stats.total_allocations += 1;
            stats.current_allocated += layout.size();
            if stats.current_allocated > stats.peak_allocated {
                stats.peak_allocated = stats.current_allocated;
            }
        } else {
            stats.allocation_failures += 1;
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut stats = HEAP_STATS.lock();
        stats.total_deallocations += 1;
        stats.current_allocated = stats.current_allocated.saturating_sub(layout.size());
        drop(stats);

        ALLOCATOR.dealloc(ptr, layout);
    }
}

#[cfg(not(test))]
#[global_allocator]
static GLOBAL_ALLOC: StatsTrackingAllocator = StatsTrackingAllocator;

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    unsafe {
        crate::uart_print(b"[HEAP] ALLOCATION ERROR: size=");
        print_size(layout.size());
        crate::uart_print(b" align=");
        print_size(layout.align());
        crate::uart_print(b"\n");
        print_heap_stats();
        loop {}
    }
}

pub fn print_heap_stats() {
    let stats = HEAP_STATS.lock();
    unsafe {
        crate::uart_print(b"[HEAP] Stats: allocs=");
        print_number(stats.total_allocations);
        crate::uart_print(b" deallocs=");
        print_number(stats.total_deallocations);
        crate::uart_print(b" current=");
        print_size(stats.current_allocated);
        crate::uart_print(b" peak=");
        print_size(stats.peak_allocated);
        crate::uart_print(b" failures=");
        print_number(stats.allocation_failures);
        crate::uart_print(b"\n");
    }
}

pub fn get_heap_stats() -> HeapStats {
    let stats = HEAP_STATS.lock();
    HeapStats {
        total_allocations: stats.total_allocations,
        total_deallocations: stats.total_deallocations,
        current_allocated: stats.current_allocated,
        peak_allocated: stats.peak_allocated,
        allocation_failures: stats.allocation_failures,
    }
}

unsafe fn print_hex(mut num: usize) {
    crate::uart_print(b"0x");
    if num == 0 {
        crate::uart_print(b"0");
        return;
    }
    let mut digits = [0u8; 16];
    let mut i = 0;
    while num > 0 {
        let digit = num % 16;
        digits[i] = if digit < 10 { b'0' + digit as u8 } else { b'A' + (digit - 10) as u8 };
        num /= 16;
        i += 1;
    }
    while i > 0 {
        i -= 1;
        crate::uart_print(&[digits[i]]);
    }
}

unsafe fn print_number(mut num: usize) {
    if num == 0 {
        crate::uart_print(b"0");
        return;
    }
    let mut digits = [0u8; 20];
    let mut i = 0;
    while num > 0 {
        digits[i] = b'0' + (num % 10) as u8;
        num /= 10;
        i += 1;
    }
    while i > 0 {
        i -= 1;
        crate::uart_print(&[digits[i]]);
    }
}

unsafe fn print_size(size: usize) {
    if size >= 1024 * 1024 {
        print_number(size / (1024 * 1024));
        crate::uart_print(b" MiB");
    } else if size >= 1024 {
        print_number(size / 1024);
        crate::uart_print(b" KiB");
    } else {
        print_number(size);
        crate::uart_print(b" bytes");
    }
}

/// Bounds check against the configured heap region (used by debug
/// assertions elsewhere, not by the allocator itself).
pub fn is_valid_heap_ptr(ptr: *const u8, size: usize) -> bool {
    let addr = ptr as usize;
    addr >= HEAP_START && addr.saturating_add(size) <= HEAP_START + HEAP_SIZE
}
