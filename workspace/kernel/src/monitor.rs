//! Interactive kernel monitor, entered from the breakpoint and debug
//! vectors (and from fatal paths on hardware).
//!
//! Commands are read from the console input queue. When the queue runs
//! dry the monitor returns and the interrupted environment resumes; on
//! hardware the queue refills from the keyboard interrupt, which keeps
//! the loop interactive.

use core::fmt::Write;

use exo9_abi::layout::NENV;
use exo9_abi::Trapframe;

use crate::kernel::Kernel;
use crate::trap::FrameDump;

struct Command {
    name: &'static str,
    desc: &'static str,
    func: fn(&mut Kernel, &[&str], Option<&Trapframe>) -> CmdResult,
}

enum CmdResult {
    Continue,
    Exit,
}

const COMMANDS: [Command; 4] = [
    Command {
        name: "help",
        desc: "Display this list of commands",
        func: cmd_help,
    },
    Command {
        name: "kerninfo",
        desc: "Display information about the kernel",
        func: cmd_kerninfo,
    },
    Command {
        name: "trapframe",
        desc: "Display the interrupted trap frame",
        func: cmd_trapframe,
    },
    Command {
        name: "exit",
        desc: "Leave the monitor and resume",
        func: cmd_exit,
    },
];

/// Run the monitor until an `exit` command or the input queue drains.
pub fn monitor(k: &mut Kernel, tf: Option<&Trapframe>) {
    let _ = writeln!(k.console, "Welcome to the exo9 kernel monitor!");
    let _ = writeln!(k.console, "Type 'help' for a list of commands.");

    while let Some(line) = k.console.read_line() {
        match run_cmd(k, &line, tf) {
            CmdResult::Continue => {}
            CmdResult::Exit => break,
        }
    }
}

fn run_cmd(k: &mut Kernel, line: &str, tf: Option<&Trapframe>) -> CmdResult {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return CmdResult::Continue;
    };
    let args: alloc::vec::Vec<&str> = parts.collect();

    for cmd in COMMANDS.iter() {
        if cmd.name == name {
            return (cmd.func)(k, &args, tf);
        }
    }
    let _ = writeln!(k.console, "Unknown command '{}'", name);
    CmdResult::Continue
}

fn cmd_help(k: &mut Kernel, _args: &[&str], _tf: Option<&Trapframe>) -> CmdResult {
    for cmd in COMMANDS.iter() {
        let _ = writeln!(k.console, "{} - {}", cmd.name, cmd.desc);
    }
    CmdResult::Continue
}

fn cmd_kerninfo(k: &mut Kernel, _args: &[&str], _tf: Option<&Trapframe>) -> CmdResult {
    let _ = writeln!(k.console, "Kernel status:");
    let _ = writeln!(
        k.console,
        "  physical frames: {} total, {} free",
        k.mem.npages(),
        k.mem.free_count()
    );
    let _ = writeln!(
        k.console,
        "  environments:    {} live of {}",
        k.envs.live_count(),
        NENV
    );
    CmdResult::Continue
}

fn cmd_trapframe(k: &mut Kernel, _args: &[&str], tf: Option<&Trapframe>) -> CmdResult {
    match tf {
        Some(tf) => {
            let dump = alloc::format!("{}", FrameDump::new(tf, 0, None));
            let _ = writeln!(k.console, "{}", dump);
        }
        None => {
            let _ = writeln!(k.console, "No trap frame available");
        }
    }
    CmdResult::Continue
}

fn cmd_exit(_k: &mut Kernel, _args: &[&str], _tf: Option<&Trapframe>) -> CmdResult {
    CmdResult::Exit
}
