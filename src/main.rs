mod live_view;

use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};

use pv_tracer::export::{list_recent, read_curve};
use pv_tracer::instrument::{InstrumentSelection, DEFAULT_QUERY_TIMEOUT};
use pv_tracer::link::available_ports;
use pv_tracer::scpi::ScpiCommand;
use pv_tracer::settings::DEFAULT_SETTINGS_FILE;
use pv_tracer::sink::LogSink;
use pv_tracer::{
    ChannelSink, CsvSink, CurveCollection, InstrumentAdapter, PersistenceSink, SenseMode, Settings, SimulatedLoad,
    SweepController, SweepMode, SweepResult,
};

/// I-V curve tracer for photovoltaic cells
#[derive(Parser)]
#[command(name = "iv_tracer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file, created after the first sweep
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep; flags override the saved settings
    Sweep(SweepArgs),

    /// Print statistics for recorded curves
    Compare {
        /// CSV files written by earlier sweeps
        #[arg(value_name = "FILES")]
        files: Vec<PathBuf>,

        /// Add the N most recent measurements from the output directory
        #[arg(long, value_name = "N")]
        recent: Option<usize>,
    },

    /// List serial ports
    Ports,

    /// Send commands to the instrument by hand ('back' to leave)
    Console {
        /// `simulated` or a serial port path
        #[arg(long)]
        instrument: Option<String>,

        #[arg(long)]
        baud: Option<u32>,
    },

    /// Answer commands on a serial port with the simulated load
    Serve {
        /// Serial port to listen on
        #[arg(value_name = "PORT")]
        port: String,

        #[arg(long, default_value_t = 9600)]
        baud: u32,
    },
}

#[derive(Args)]
struct SweepArgs {
    /// CC or CV
    #[arg(long)]
    mode: Option<SweepMode>,

    /// 2-Wire or 4-Wire
    #[arg(long)]
    sense: Option<SenseMode>,

    #[arg(long, allow_negative_numbers = true)]
    start: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    end: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    step: Option<f64>,

    /// Settle delay after each setpoint, in seconds
    #[arg(long)]
    delay: Option<f64>,

    /// Voltage limit in V (mandatory in CC mode)
    #[arg(long)]
    voltage_limit: Option<f64>,

    /// Current limit in A (mandatory in CV mode)
    #[arg(long)]
    current_limit: Option<f64>,

    /// `simulated` or a serial port path
    #[arg(long)]
    instrument: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Directory receiving the dated CSV folders
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not write a CSV file
    #[arg(long)]
    no_save: bool,

    /// Log progress lines instead of drawing the live plot
    #[arg(long)]
    plain: bool,
}

impl SweepArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(sense) = self.sense {
            settings.sense = sense;
        }
        if let Some(start) = self.start {
            settings.start = start;
        }
        if let Some(end) = self.end {
            settings.end = end;
        }
        if let Some(step) = self.step {
            settings.step = step;
        }
        if let Some(delay) = self.delay {
            settings.settle_delay_s = delay;
        }
        if self.voltage_limit.is_some() {
            settings.voltage_limit = self.voltage_limit;
        }
        if self.current_limit.is_some() {
            settings.current_limit = self.current_limit;
        }
        if let Some(instrument) = &self.instrument {
            settings.instrument = instrument.clone();
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if self.no_save {
            settings.save_csv = false;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // log lines would tear the live plot, keep it quiet unless asked
    let live_view = matches!(&cli.command, Commands::Sweep(args) if !args.plain);
    let log_level = match (cli.verbose, live_view) {
        (0, true) => "off",
        (0, false) => "warn",
        (1, _) => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Sweep(args) => run_sweep(&cli.settings, &args),
        Commands::Compare { files, recent } => run_compare(&cli.settings, files, recent),
        Commands::Ports => run_ports(),
        Commands::Console { instrument, baud } => run_console(&cli.settings, instrument, baud),
        Commands::Serve { port, baud } => run_serve(&port, baud),
    }
}

fn run_sweep(settings_path: &Path, args: &SweepArgs) -> Result<()> {
    let mut settings = Settings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    // refuse bad input before any instrument is opened
    let config = settings.to_sweep_config();
    config.validate().context("Invalid sweep configuration")?;
    let selection = settings.instrument_selection()?;

    let adapter = selection
        .open(DEFAULT_QUERY_TIMEOUT)
        .with_context(|| format!("Failed to open instrument '{}'", selection.label()))?;

    let persistence: Option<Box<dyn PersistenceSink + Send>> = if settings.save_csv {
        Some(Box::new(CsvSink::new(settings.output_dir.clone())))
    } else {
        None
    };

    let mut controller = SweepController::new();
    let result = if args.plain {
        controller.run(config, adapter, Box::new(LogSink::default()), persistence)?
    } else {
        let (sender, receiver) = crossbeam_channel::unbounded();
        controller.start(config, adapter, Box::new(ChannelSink::new(sender)), persistence)?;
        let title = format!(
            "{} sweep {} -> {} {} on {}",
            settings.mode,
            settings.start,
            settings.end,
            settings.mode.unit(),
            selection.label()
        );
        let view = live_view::run(&controller, receiver, &title);
        if view.is_err() {
            // the worker still owns the instrument, stop it before waiting
            controller.cancel();
        }
        let result = controller.wait()?;
        view.context("Live view failed")?;
        result
    };

    print_result(&result);

    if let Err(e) = settings.save(settings_path) {
        warn!("Could not save settings: {}", e);
    }
    Ok(())
}

fn print_result(result: &SweepResult) {
    println!("{}", result.stopped);
    println!("Samples: {} of {} setpoints", result.samples.len(), result.steps_planned);
    match result.max_power {
        Some(mpp) => {
            println!("Pmp: {:.3} W", mpp.pmp);
            println!("Vmp: {:.3} V", mpp.vmp);
            println!("Imp: {:.3} A", mpp.imp);
        }
        None => println!("No data"),
    }
}

fn run_compare(settings_path: &Path, mut files: Vec<PathBuf>, recent: Option<usize>) -> Result<()> {
    if let Some(count) = recent {
        let settings = Settings::load(settings_path)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
        let found = list_recent(&settings.output_dir)
            .with_context(|| format!("Failed to list {}", settings.output_dir.display()))?;
        files.extend(found.into_iter().take(count));
    }
    if files.is_empty() {
        bail!("No curve files given");
    }

    let mut curves = CurveCollection::new();
    for file in &files {
        match read_curve(file) {
            Ok(record) => {
                info!("Loaded {} ({} samples)", record.label, record.samples.len());
                curves.add(record);
            }
            Err(e) => eprintln!("[ERROR] Failed to load {}: {}", file.display(), e),
        }
    }

    print!("{}", curves.report());
    Ok(())
}

fn run_ports() -> Result<()> {
    let ports = available_ports().context("Could not enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

// Commands outside the typed set count as queries when they end in '?'.
fn expects_response(command: &str) -> bool {
    command
        .parse::<ScpiCommand>()
        .map(|parsed| parsed.is_query())
        .unwrap_or_else(|_| command.ends_with('?'))
}

// Manual command mode: queries print their answer, anything else is written.
fn run_console(settings_path: &Path, instrument: Option<String>, baud: Option<u32>) -> Result<()> {
    let settings = Settings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let selection = InstrumentSelection::from_name(
        instrument.as_deref().unwrap_or(&settings.instrument),
        baud.unwrap_or(settings.baud_rate),
    )?;
    let mut adapter = selection
        .open(DEFAULT_QUERY_TIMEOUT)
        .with_context(|| format!("Failed to open instrument '{}'", selection.label()))?;

    println!("\n--- Manual Mode ({}) ---", adapter.identity());
    println!("Enter commands, or type 'back' to leave.");
    prompt()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "back" {
            break;
        }
        if !command.is_empty() {
            let outcome = if expects_response(command) {
                adapter.query(command).map(|response| println!("< {}", response))
            } else {
                adapter.write(command)
            };
            if let Err(e) = outcome {
                eprintln!("[ERROR] {}", e);
            }
        }
        prompt()?;
    }

    adapter.close()?;
    Ok(())
}

// Serves the simulated load on a serial port so a second tracer can sweep it.
fn run_serve(port_name: &str, baud_rate: u32) -> Result<()> {
    let mut port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
        .with_context(|| format!("Failed to open port '{}'", port_name))?;
    let mut load = SimulatedLoad::new();

    println!("\nListening on {} at {} baud. Press Ctrl+C to exit.", port_name, baud_rate);

    let mut serial_buf = [0u8; 128];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match port.read(&mut serial_buf) {
            Ok(bytes_read) => pending.extend_from_slice(&serial_buf[..bytes_read]),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                eprintln!("[ERROR] Serial port error: {}", e);
                continue;
            }
        }

        while let Some(end) = pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line).trim().to_string();
            if command.is_empty() {
                continue;
            }
            println!("> Received: {}", command);
            let response = match load.process_command(&command) {
                Ok(Some(response)) => Some(response),
                // every query gets an answer, like the adapter interface
                Ok(None) if expects_response(&command) => Some(String::from("0")),
                Ok(None) => None,
                Err(e) => {
                    eprintln!("[ERROR] {}", e);
                    None
                }
            };
            if let Some(response) = response {
                println!("< {}", response);
                port.write_all(format!("{}\n", response).as_bytes())
                    .context("Failed to write to serial port")?;
            }
        }
    }
}
