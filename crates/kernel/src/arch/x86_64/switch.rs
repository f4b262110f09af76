//! Context switch: the SysV-ABI callee-saved register swap `switch_to`
//! declared in the parent module.
//!
//! Only the registers the calling convention requires a callee to preserve
//! need saving here — everything else belongs to the compiler-generated
//! prologue/epilogue of whichever function called in. `fs_base`/`gs_base`
//! round out the context for per-task TLS/per-CPU pointers but are saved
//! via `rdfsbase`/`wrfsbase` rather than instructions that trap without
//! FSGSBASE, so they are handled in the Rust wrapper, not this asm body.

use core::arch::global_asm;

global_asm!(
    r#"
.global switch_to
switch_to:
    // rdi = prev: *mut CpuContext, rsi = next: *const CpuContext
    mov [rdi + 0x00], rbx
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], r12
    mov [rdi + 0x18], r13
    mov [rdi + 0x20], r14
    mov [rdi + 0x28], r15
    mov [rdi + 0x30], rsp
    lea rax, [rip + 1f]
    mov [rdi + 0x38], rax
    pushfq
    pop rax
    mov [rdi + 0x40], rax

    mov rbx, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov r12, [rsi + 0x10]
    mov r13, [rsi + 0x18]
    mov r14, [rsi + 0x20]
    mov r15, [rsi + 0x28]
    mov rax, [rsi + 0x40]
    push rax
    popfq
    mov rsp, [rsi + 0x30]
    jmp [rsi + 0x38]
1:
    ret
"#
);
