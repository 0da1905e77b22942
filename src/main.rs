use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use common::cli::GlobalOpts;
use common::ThreadAdapter;
use n64::cic::{CicEngine, CIC};
use n64::link::{self, CicSide, PifSide};
use n64::pif::PifEngine;
use n64::ports::{PifPorts, Ports};
use n64::script::ScriptPorts;
use n64::{Fault, Region};

/// Exit status when a CIC script names a part we have no secrets for.
const UNKNOWN_CIC: i32 = 4;

#[derive(Debug, Parser)]
#[clap(name = "pif-cic", version)]
struct Cli {
    #[clap(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the PIF alone; the script answers every port read, CIC line included
    Pif {
        #[arg(long, value_enum, default_value = "ntsc")]
        region: Region,
        /// Stimulus file, stdin if omitted
        script: Option<PathBuf>,
    },
    /// Run a CIC alone against a scripted clock
    Cic {
        /// Variant to emulate, otherwise read from the first script value
        #[arg(long, value_enum)]
        cic: Option<CIC>,
        script: Option<PathBuf>,
    },
    /// Run a PIF and a CIC on their own threads, joined by the serial link
    Pair {
        #[arg(long, value_enum)]
        cic: CIC,
        /// Console region, defaults to the cartridge's
        #[arg(long, value_enum)]
        region: Option<Region>,
        /// Stimulus for the CPU and peripheral side of the PIF
        script: Option<PathBuf>,
    },
}

fn load_script(path: Option<&Path>) -> anyhow::Result<String> {
    let mut source = String::new();
    match path {
        Some(path) => {
            source = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut source)
                .context("reading stimulus from stdin")?;
        }
    }
    Ok(source)
}

/// Print the verdict line the port log ends with and pick the exit status.
fn report(result: Result<u64, Fault>) -> i32 {
    match result {
        Ok(ticks) => {
            info!("tick limit reached after {} ticks", ticks);
            0
        }
        Err(fault) => {
            match &fault {
                Fault::Protocol(_) => println!("fatal error"),
                Fault::Unimplemented(what) => println!("not impl {}", what),
                _ => {}
            }
            if fault == Fault::Stopped {
                info!("{}", fault);
            } else {
                error!("{}", fault);
            }
            fault.exit_code()
        }
    }
}

fn run_pif(region: Region, source: &str, ticks: Option<u64>) -> i32 {
    let mut engine = PifEngine::new(region);
    let mut io: Box<dyn PifPorts + Send> = Box::new(ScriptPorts::new(source, std::io::stdout()));
    let result = common::run(&mut engine, &mut io, ticks);
    info!("PIF finished in {:?}", engine.phase());
    report(result)
}

fn run_cic(cic: Option<CIC>, source: &str, ticks: Option<u64>) -> i32 {
    let mut script = ScriptPorts::new(source, std::io::stdout());
    let cic = match cic {
        Some(cic) => cic,
        None => match script.read_cic() {
            Ok(number) => match CIC::from_number(number) {
                Some(cic) => cic,
                None => {
                    println!("unknown cic");
                    error!("no CIC with part number {}", number);
                    return UNKNOWN_CIC;
                }
            },
            Err(fault) => return report(Err(fault)),
        },
    };

    let mut engine = CicEngine::new(cic);
    let mut io: Box<dyn Ports + Send> = Box::new(script);
    let result = common::run(&mut engine, &mut io, ticks);
    info!("CIC {:?} finished in {:?}", cic, engine.state());
    report(result)
}

fn run_pair(cic: CIC, region: Region, source: &str, ticks: Option<u64>) -> anyhow::Result<i32> {
    let (master, slave) = link::duplex(link::LINK_TIMEOUT);

    let cic_io: Box<dyn Ports + Send> = Box::new(CicSide::new(slave, cic.is_dd()));
    let cic_thread = ThreadAdapter::spawn(CicEngine::new(cic), cic_io, None)?;

    let script = ScriptPorts::new(source, std::io::stdout());
    let pif_io: Box<dyn PifPorts + Send> = Box::new(PifSide::new(script, master));
    let pif_thread = ThreadAdapter::spawn(PifEngine::new(region), pif_io, ticks)?;

    let pif = pif_thread.join()?;
    // Hang up so the CIC stops waiting for the next pulse.
    drop(pif.io);
    let cic = cic_thread.join()?;
    info!("PIF finished in {:?}, CIC in {:?}", pif.engine.phase(), cic.engine.state());

    // A dead CIC only shows up on the PIF side as silence.
    let result = match pif.result {
        Err(Fault::LinkClosed) => match cic.result {
            Err(fault @ Fault::Protocol(_)) => Err(fault),
            _ => Err(Fault::LinkClosed),
        },
        other => other,
    };
    Ok(report(result))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.global.log_level())
        .init();

    let ticks = cli.global.ticks;
    let code = match cli.command {
        Command::Pif { region, script } => run_pif(region, &load_script(script.as_deref())?, ticks),
        Command::Cic { cic, script } => run_cic(cic, &load_script(script.as_deref())?, ticks),
        Command::Pair { cic, region, script } => {
            let region = region.unwrap_or_else(|| cic.region());
            run_pair(cic, region, &load_script(script.as_deref())?, ticks)?
        }
    };
    std::process::exit(code)
}
