#![no_std]
#![no_main]

extern crate alloc;
extern crate riscv_rt;

use core::ptr::addr_of_mut;

use alloc::string::String;
use const_default::ConstDefault;
use ember::config::ARENA_SIZE;
use ember::{Kernel, NoopSwitch, Pid, Priority, SchedulerConfig};
use riscv_rt::entry;

mod heap;
mod logger;
mod panic_handler;
mod timer;
mod uart;

pub const ENTER: u8 = 13;
pub const BACKSPACE: u8 = 127;
pub const CTRL_C: u8 = 3;

/// Allocator and scheduler shared by the console and the timer interrupt.
///
/// Spawned processes carry no code of their own, so the console stays the
/// only thread of execution and dispatch never redirects the trap return.
pub static KERNEL: Kernel<'static, NoopSwitch> =
    Kernel::new(NoopSwitch, SchedulerConfig::DEFAULT);

static mut ARENA: [u8; ARENA_SIZE] = [0; ARENA_SIZE];

pub fn console() -> ! {
    print!("> ");

    let mut command = String::new();

    loop {
        match uart::read_byte_nonblocking() {
            Some(ENTER) => {
                println!();
                process_command(&command);
                command.clear();
                print!("> ");
            }
            Some(BACKSPACE) => {
                if command.pop().is_some() {
                    // step back, blank the character, step back again
                    print!("\x08 \x1b[1D");
                }
            }
            Some(CTRL_C) => {
                process_command("shutdown");
            }
            Some(c) => {
                command.push(c as char);
                print!("{}", c as char);
            }
            None => core::hint::spin_loop(),
        }
    }
}

fn print_help_text() {
    println!("available commands:");
    println!("  help                     print this help message (alias: h, ?)");
    println!("  ps                       list processes");
    println!("  mem                      show the heap block map");
    println!("  spawn <name> [priority]  create a user process (priority 0-3)");
    println!("  kill <pid>               terminate a process");
    println!("  suspend <pid>            suspend a process");
    println!("  resume <pid>             resume a suspended process");
    println!("  yield                    give up the kernel's time slice");
    println!("  shutdown                 power off (alias: sd, exit)");
}

fn process_command(command: &str) {
    let mut parts = command.split_ascii_whitespace();
    let Some(cmd) = parts.next() else {
        return;
    };

    match cmd {
        "help" | "?" | "h" => print_help_text(),
        "shutdown" | "sd" | "exit" => sbi::legacy::shutdown(),
        "ps" => KERNEL.with(|core| core.scheduler.dump()),
        "mem" => {
            KERNEL.with(|core| core.heap.dump());
            println!("metadata heap: {} bytes in use", heap::metadata_used());
        }
        "yield" => KERNEL.yield_now(),
        "spawn" => {
            let Some(name) = parts.next() else {
                println!("usage: spawn <name> [priority]");
                return;
            };
            let priority = match parts.next().map(str::parse::<u8>) {
                None => Some(Priority::Normal),
                Some(Ok(level)) => Priority::from_level(level),
                Some(Err(_)) => None,
            };
            let Some(priority) = priority else {
                println!("priority must be 0-3");
                return;
            };
            match KERNEL.create_process(name, 0, priority, false) {
                Ok(pid) => println!("spawned {} as pid {}", name, pid),
                Err(err) => println!("spawn failed: {}", err),
            }
        }
        "kill" | "suspend" | "resume" => {
            let Some(pid) = parts.next().and_then(|arg| arg.parse::<Pid>().ok()) else {
                println!("usage: {} <pid>", cmd);
                return;
            };
            let result = match cmd {
                "kill" => {
                    KERNEL.terminate_process(pid);
                    Ok(())
                }
                "suspend" => KERNEL.suspend(pid),
                _ => KERNEL.resume(pid),
            };
            if let Err(err) = result {
                println!("{} {}: {}", cmd, pid, err);
            }
        }
        _ => println!("unknown command: {command}"),
    }
}

#[entry]
fn main(a0: usize) -> ! {
    uart::init();
    logger::init(log::LevelFilter::Info);
    log::info!("booting on hart {}", a0);

    let metadata = unsafe { heap::init_metadata_heap() };
    log::info!("metadata heap: {} KiB", metadata / 1024);

    let arena: &'static mut [u8] = unsafe { &mut *addr_of_mut!(ARENA) };
    match KERNEL.boot(arena) {
        Ok(pid) => log::info!("core up, kernel process pid {}", pid),
        Err(err) => {
            log::error!("core bring-up failed: {}", err);
            sbi::legacy::shutdown()
        }
    }

    timer::init();
    print_help_text();
    console()
}
