use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    sbi::legacy::shutdown()
}
