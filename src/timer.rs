use riscv::register::{sie, sstatus, time};

const TIMER_INTERVAL_TICKS: u64 = 100_000; // ~10ms at QEMU's 10 MHz timebase

/// Start periodic scheduler ticks
pub fn init() {
    arm_timer();
    unsafe {
        sie::set_stimer();
        sstatus::set_sie();
    }
}

fn arm_timer() {
    let now = time::read64();
    let deadline = now.wrapping_add(TIMER_INTERVAL_TICKS);
    if let Err(err) = sbi::timer::set_timer(deadline) {
        log::warn!("timer: cannot arm next tick: {:?}", err);
    }
}

#[riscv_rt::core_interrupt(riscv::interrupt::Interrupt::SupervisorTimer)]
fn supervisor_timer() {
    crate::KERNEL.timer_interrupt();
    arm_timer();
}
