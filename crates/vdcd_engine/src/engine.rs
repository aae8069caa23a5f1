// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Engine assembly: builds the host from the options, wires the
//! technology containers and their transports, runs until shutdown.

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vdc_core::errors::{VdcApiError, VdcError};
use vdc_core::ident::{DsUid, Fnv64, OBJECTCLASS_MACADDRESS};
use vdc_core::util::async_manager;
use vdc_core::VdcResult;

use vdc_server::host::{HostEvent, VdcHost, VdcHostConfig};
use vdc_server::persist::ParamStore;
use vdc_server::vdc::VdcServices;

use vdc_server_hwmgr_dali::DaliVdc;
use vdc_server_hwmgr_enocean::{spawn_port_reader, EnoceanVdc};
use vdc_server_hwmgr_static::{StaticDeviceConfig, StaticVdc};

use crate::options::EngineOptions;
use crate::transport::{
  open_link,
  LinkDaliBridge,
  LinkEnoceanPort,
  DALI_BAUDRATE,
  ENOCEAN_BAUDRATE,
};

// Process exit codes. The factory reset / firmware update gestures are
// detected by platform tooling outside this binary; the codes are part
// of the contract with the init scripts.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FACTORY_RESET_CLEAN: i32 = -2;
pub const EXIT_FIRMWARE_UPDATE: i32 = -3;
pub const EXIT_FACTORY_RESET_CONFIRMED: i32 = -42;

/// Default TCP port of remote DALI bridges.
const DALI_DEFAULT_PORT: u16 = 2101;
/// Default TCP port of remote ESP3 modems.
const ENOCEAN_DEFAULT_PORT: u16 = 2102;

pub struct VdcdEngine {
  options: EngineOptions,
}

impl VdcdEngine {
  pub fn new(options: EngineOptions) -> Self {
    Self { options }
  }

  /// The host's own identity: stable per data directory.
  fn host_dsuid(&self) -> DsUid {
    let mut hash = Fnv64::new();
    hash.add_bytes(b"vdcd-host");
    hash.add_bytes(self.options.sqlitedir().as_bytes());
    let mut dsuid = DsUid::new();
    dsuid.set_object_class(OBJECTCLASS_MACADDRESS);
    dsuid.set_serial_no(0x7_0000_0000_0000 + hash.hash48());
    dsuid
  }

  /// Build everything, collect devices once, then serve the vdSM API
  /// until the process is stopped.
  pub async fn run(self) -> VdcResult<i32> {
    let data_dir = PathBuf::from(self.options.sqlitedir());
    std::fs::create_dir_all(&data_dir)
      .map_err(|e| VdcError::from(VdcApiError::GeneralFailure(format!("cannot create data dir: {e}"))))?;
    let store = ParamStore::open(data_dir.join("DsParams.sqlite3"))?;
    let services = VdcServices::new(store, data_dir);
    let host_dsuid = self.host_dsuid();
    info!("vdcd host {} starting", host_dsuid);
    let mut host = VdcHost::new(VdcHostConfig::new("vdcd", host_dsuid), services);
    let host_events = host.event_sender();
    let shutdown_token = host.cancellation_token();

    if let Some(connection) = self.options.dali() {
      let link = open_link(connection, DALI_BAUDRATE, DALI_DEFAULT_PORT).await?;
      host.add_vdc(Box::new(DaliVdc::new(1, Box::new(LinkDaliBridge::new(link)))));
    }

    if let Some(connection) = self.options.enocean() {
      let link = open_link(connection, ENOCEAN_BAUDRATE, ENOCEAN_DEFAULT_PORT).await?;
      let (vdc, packet_tx) = EnoceanVdc::new(1);
      spawn_port_reader(
        Box::new(LinkEnoceanPort::new(link)),
        packet_tx,
        host_events.clone(),
        shutdown_token.child_token(),
      );
      host.add_vdc(Box::new(vdc));
    }

    let mut static_configs = Vec::new();
    for spec in self.options.consoleio() {
      static_configs.push(StaticDeviceConfig::parse(spec, true)?);
    }
    for spec in self.options.digitalio() {
      static_configs.push(StaticDeviceConfig::parse(spec, false)?);
    }
    if !static_configs.is_empty() {
      let console_keys: Vec<String> = static_configs
        .iter()
        .filter(|c| c.console)
        .map(|c| c.name.clone())
        .collect();
      let (vdc, input_tx) = StaticVdc::new(1, static_configs);
      if !console_keys.is_empty() {
        spawn_console_key_reader(
          console_keys,
          input_tx,
          host_events.clone(),
          shutdown_token.child_token(),
        );
      }
      host.add_vdc(Box::new(vdc));
    }

    host.collect_devices(false, false, false).await?;

    let listener = TcpListener::bind(("0.0.0.0", self.options.vdsmport()))
      .await
      .map_err(|e| VdcError::from(VdcApiError::GeneralFailure(format!("cannot bind API port: {e}"))))?;
    info!("vdSM API listening on port {}", self.options.vdsmport());

    // ctrl-c cancels the host's token; the event loop and every child
    // task (API server, port readers) wind down on it
    let signal_token = shutdown_token.clone();
    async_manager::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
        signal_token.cancel();
      }
    });
    host.run(listener).await?;
    Ok(EXIT_OK)
  }
}

/// Console key reader: every configured key name read from stdin
/// simulates a short button push on the matching console device.
fn spawn_console_key_reader(
  keys: Vec<String>,
  input_tx: mpsc::Sender<(String, bool)>,
  host_events: mpsc::Sender<HostEvent>,
  cancellation: CancellationToken,
) {
  async_manager::spawn(async move {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console keys active: {}", keys.join(", "));
    loop {
      let line = tokio::select! {
        line = lines.next_line() => match line {
          Ok(Some(line)) => line,
          _ => break,
        },
        _ = cancellation.cancelled() => break,
      };
      for key in keys.iter() {
        if !key.is_empty() && line.contains(key.chars().next().unwrap_or_default()) {
          // simulate a short push
          let _ = input_tx.send((key.clone(), true)).await;
          let _ = host_events.send(HostEvent::Hardware).await;
          async_manager::sleep(std::time::Duration::from_millis(200)).await;
          let _ = input_tx.send((key.clone(), false)).await;
          let _ = host_events.send(HostEvent::Hardware).await;
        }
      }
    }
  });
}
