// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use argh::FromArgs;
use tracing_subscriber::filter::LevelFilter;
use vdcd_engine::{EngineOptions, VdcdEngine};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// vdcd - virtual device controller for the digitalSTROM system.
///
/// Bridges DALI ballasts, EnOcean radio devices and static I/O onto the
/// vdSM bus.
#[derive(FromArgs)]
pub struct VdcdCliArguments {
  /// print version and exit.
  #[argh(switch)]
  version: bool,

  /// DALI bridge: serial device path or host[:port].
  #[argh(option)]
  dali: Option<String>,

  /// enOcean modem: serial device path or host[:port].
  #[argh(option)]
  enocean: Option<String>,

  /// console test device, <key>:(in|out|io). May be given repeatedly.
  #[argh(option)]
  consoleio: Vec<String>,

  /// digital I/O pin device, <pin>:(in|out). May be given repeatedly.
  #[argh(option)]
  digitalio: Vec<String>,

  /// directory for SQLite stores and scene override files.
  #[argh(option, default = "\".\".to_owned()")]
  sqlitedir: String,

  /// TCP port for the vdSM API.
  #[argh(option, default = "8440")]
  vdsmport: u16,

  /// log level, 0 (errors only) .. 4 (trace).
  #[argh(option, default = "2")]
  loglevel: u8,
}

fn level_filter(loglevel: u8) -> LevelFilter {
  match loglevel {
    0 => LevelFilter::ERROR,
    1 => LevelFilter::WARN,
    2 => LevelFilter::INFO,
    3 => LevelFilter::DEBUG,
    _ => LevelFilter::TRACE,
  }
}

#[tokio::main]
async fn main() {
  let args: VdcdCliArguments = argh::from_env();
  if args.version {
    println!("vdcd-engine {VERSION}");
    return;
  }
  tracing_subscriber::fmt()
    .with_max_level(level_filter(args.loglevel))
    .init();

  let mut builder = EngineOptions::builder()
    .sqlitedir(&args.sqlitedir)
    .vdsmport(args.vdsmport)
    .loglevel(args.loglevel);
  if let Some(dali) = &args.dali {
    builder = builder.dali(dali);
  }
  if let Some(enocean) = &args.enocean {
    builder = builder.enocean(enocean);
  }
  for spec in &args.consoleio {
    builder = builder.consoleio(spec);
  }
  for spec in &args.digitalio {
    builder = builder.digitalio(spec);
  }

  let engine = VdcdEngine::new(builder.finish());
  match engine.run().await {
    Ok(code) => std::process::exit(code),
    Err(e) => {
      eprintln!("vdcd-engine failed: {e}");
      std::process::exit(1);
    }
  }
}
