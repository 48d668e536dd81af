use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pinvm::console::{run_console, ConsoleConfig};
use pinvm::system_config::{ConfiguredSystem, SystemFactory};

/// Discrete-event simulator for pin-level digital circuits.
#[derive(Debug, Parser)]
#[command(name = "pinvm", version, about)]
struct Args {
    /// JSON system description
    system: PathBuf,

    /// Number of ticks to run without the console
    #[arg(long, default_value_t = 32)]
    ticks: u64,

    /// Open the interactive terminal monitor
    #[arg(long)]
    console: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log: String,

    /// Write a snapshot of the engine here on exit
    #[arg(long, value_name = "FILE")]
    snapshot_out: Option<PathBuf>,

    /// Resume from a snapshot taken of the same system
    #[arg(long, value_name = "FILE")]
    restore: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    pinvm::init_logging(&args.log);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("pinvm: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut system = SystemFactory::new().create_from_json(&args.system)?;
    let info = system.get_system_info();
    info!(
        name = %info.name,
        boards = info.board_count,
        components = info.component_count,
        "loaded {}",
        args.system.display()
    );

    system.engine.init()?;
    if let Some(path) = &args.restore {
        let mut reader = BufReader::new(File::open(path)?);
        system.engine.restore(&mut reader)?;
    }

    if args.console {
        run_console(&mut system, ConsoleConfig::default())?;
    } else {
        let executed = system.engine.run(args.ticks);
        if system.engine.is_halted() {
            println!("halted at tick {}", system.engine.current_tick());
        }
        print_report(&system, executed);
    }

    if let Some(path) = &args.snapshot_out {
        let mut writer = BufWriter::new(File::create(path)?);
        system.engine.snapshot(&mut writer)?;
        info!("snapshot written to {}", path.display());
    }
    Ok(())
}

fn print_report(system: &ConfiguredSystem, executed: u64) {
    let engine = &system.engine;
    println!("{}: {} tick(s) run, now at tick {}", system.name, executed, engine.current_tick());

    for watch in &system.watched {
        println!("\n{}", watch.label);
        for record in engine.trace().of(watch.board, watch.component, &watch.pin) {
            println!(
                "  {:>6}  {:#x} -> {:#x}  ({})",
                record.tick, record.old, record.new, record.new_state
            );
        }
    }

    let diagnostics = engine.diagnostics();
    if !diagnostics.is_empty() {
        println!("\ndiagnostics ({}):", diagnostics.len());
        for diagnostic in diagnostics.records() {
            println!("  {}", diagnostic);
        }
    }
    let (setup, hold) = engine.violations();
    println!("\nsetup violations: {}, hold violations: {}", setup, hold);
}
