// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use getset::{CopyGetters, Getters};

/// Resolved engine options, one flag per device technology.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct EngineOptions {
  /// DALI bridge: serial device path or host[:port].
  #[getset(get = "pub")]
  dali: Option<String>,
  /// EnOcean modem: serial device path or host[:port].
  #[getset(get = "pub")]
  enocean: Option<String>,
  /// Console stub devices, `<key>:(in|out|io)` each.
  #[getset(get = "pub")]
  consoleio: Vec<String>,
  /// Digital I/O pin devices, `<pin>:(in|out)` each.
  #[getset(get = "pub")]
  digitalio: Vec<String>,
  /// Directory for the SQLite stores and scene override files.
  #[getset(get = "pub")]
  sqlitedir: String,
  /// TCP port the vdSM API listens on.
  #[getset(get_copy = "pub")]
  vdsmport: u16,
  /// Log level 0 (errors only) .. 4 (trace).
  #[getset(get_copy = "pub")]
  loglevel: u8,
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      dali: None,
      enocean: None,
      consoleio: Vec::new(),
      digitalio: Vec::new(),
      sqlitedir: ".".to_owned(),
      vdsmport: 8440,
      loglevel: 2,
    }
  }
}

/// Builder used by the CLI frontend (and tests) to assemble options.
#[derive(Default)]
pub struct EngineOptionsBuilder {
  options: EngineOptions,
}

impl EngineOptionsBuilder {
  pub fn dali(mut self, connection: &str) -> Self {
    self.options.dali = Some(connection.to_owned());
    self
  }

  pub fn enocean(mut self, connection: &str) -> Self {
    self.options.enocean = Some(connection.to_owned());
    self
  }

  pub fn consoleio(mut self, spec: &str) -> Self {
    self.options.consoleio.push(spec.to_owned());
    self
  }

  pub fn digitalio(mut self, spec: &str) -> Self {
    self.options.digitalio.push(spec.to_owned());
    self
  }

  pub fn sqlitedir(mut self, dir: &str) -> Self {
    self.options.sqlitedir = dir.to_owned();
    self
  }

  pub fn vdsmport(mut self, port: u16) -> Self {
    self.options.vdsmport = port;
    self
  }

  pub fn loglevel(mut self, level: u8) -> Self {
    self.options.loglevel = level;
    self
  }

  pub fn finish(self) -> EngineOptions {
    self.options
  }
}

impl EngineOptions {
  pub fn builder() -> EngineOptionsBuilder {
    EngineOptionsBuilder::default()
  }
}
