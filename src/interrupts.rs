//! Interrupt masking for the allocator/scheduler critical region.

/// Run `f` with supervisor interrupts masked, restoring the previous state
#[cfg(target_arch = "riscv64")]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    use riscv::register::sstatus;

    let enabled = sstatus::read().sie();
    if enabled {
        unsafe { sstatus::clear_sie() };
    }
    let result = f();
    if enabled {
        unsafe { sstatus::set_sie() };
    }
    result
}

/// Hosts have no timer interrupt to mask; tick deferral is handled by
/// [`crate::kernel::Kernel`] alone.
#[cfg(not(target_arch = "riscv64"))]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}
