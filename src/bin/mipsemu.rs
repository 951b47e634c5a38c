use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;
use mipsemu::{image, Halt, Simulator};

/// Run a MIPS I program image to completion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to a program image (see `image` module for the text format)
    image_path: String,

    /// Print the final state of every general-purpose register on exit
    #[arg(long)]
    dump_registers: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let file = match File::open(&args.image_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("could not open {}: {e}", args.image_path);
            return ExitCode::FAILURE;
        }
    };
    let (address_space, context) = match image::load(BufReader::new(file)) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("could not load {}: {e}", args.image_path);
            return ExitCode::FAILURE;
        }
    };

    let mut simulator = Simulator::new(address_space, context);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stdin = io::stdin();
    let mut in_ = stdin.lock();

    match simulator.run(&mut out, &mut in_) {
        Halt::Exited(report) => {
            out.flush().ok();
            if args.dump_registers {
                dump_registers(&simulator);
            }
            if let Err(e) = write_report(&report) {
                eprintln!("could not write output.txt: {e}");
            }
            // The exit syscall always reports process status 1, matching
            // the reference simulator's own behaviour.
            ExitCode::from(1)
        }
        Halt::Fault { fault, pc } => {
            // Fatal faults are reported on standard output, not stderr,
            // matching the reference simulator's own diagnostic path.
            writeln!(out, "fatal fault at pc 0x{pc:08x}: {fault}").ok();
            out.flush().ok();
            if args.dump_registers {
                dump_registers(&simulator);
            }
            // Fatal faults exit with the same status as a clean `exit`
            // syscall, matching the reference simulator.
            ExitCode::from(1)
        }
    }
}

fn dump_registers(simulator: &Simulator) {
    eprintln!("pc = 0x{:08x}", simulator.pc);
    for n in 0..32u8 {
        eprintln!("  ${n:<2} = 0x{:08x}", simulator.registers.read(n).unwrap());
    }
    eprintln!(
        "  hi = 0x{:08x}  lo = 0x{:08x}",
        simulator.registers.hi, simulator.registers.lo
    );
}

fn write_report(report: &mipsemu::RunReport) -> io::Result<()> {
    let file = File::create("output.txt")?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "Output File")?;
    writeln!(writer, "Total Instruction Count: {}", report.instruction_count)?;
    writeln!(writer, "Time Elapsed: {} nanoseconds", report.elapsed_nanos)?;
    writer.flush()
}
