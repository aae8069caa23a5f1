// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Concrete byte transports for the hardware bridges.
//!
//! Both the EnOcean modem and the DALI bridge speak over either a local
//! serial device or a TCP link to a remote bridge; the option string
//! decides (`host[:port]` vs device path). Serial reads are blocking and
//! run on a dedicated thread feeding a channel; writes are short enough
//! to issue inline.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use vdc_core::errors::{VdcError, VdcProtocolError};
use vdc_core::VdcResult;

use vdc_server_hwmgr_dali::dali_comm::{DaliBridge, DaliQueryResult};
use vdc_server_hwmgr_enocean::EnoceanPort;

/// ESP3 runs at 57600 8N1 on the modem link.
pub const ENOCEAN_BAUDRATE: u32 = 57600;
/// Pseudo-baudrate of the DALI bridge link; real bus timing is in the
/// bridge.
pub const DALI_BAUDRATE: u32 = 9600;

fn io_err(e: std::io::Error) -> VdcError {
  VdcProtocolError::Transport(e.to_string()).into()
}

/// A raw byte link, serial or TCP.
#[async_trait]
pub trait ByteLink: Send {
  async fn read_some(&mut self, buf: &mut [u8]) -> VdcResult<usize>;
  async fn write_all_bytes(&mut self, bytes: &[u8]) -> VdcResult<()>;
}

pub struct TcpLink {
  stream: TcpStream,
}

impl TcpLink {
  pub async fn connect(connection: &str, default_port: u16) -> VdcResult<Self> {
    let target = if connection.contains(':') {
      connection.to_owned()
    } else {
      format!("{connection}:{default_port}")
    };
    let stream = TcpStream::connect(&target).await.map_err(io_err)?;
    info!("connected to bridge at {}", target);
    Ok(Self { stream })
  }
}

#[async_trait]
impl ByteLink for TcpLink {
  async fn read_some(&mut self, buf: &mut [u8]) -> VdcResult<usize> {
    self.stream.read(buf).await.map_err(io_err)
  }

  async fn write_all_bytes(&mut self, bytes: &[u8]) -> VdcResult<()> {
    self.stream.write_all(bytes).await.map_err(io_err)
  }
}

/// Serial link: a reader thread pumps blocking reads into a channel, the
/// writer half is shared with the async side.
pub struct SerialLink {
  rx: mpsc::Receiver<Vec<u8>>,
  writer: Box<dyn serialport::SerialPort>,
  pending: Vec<u8>,
}

impl SerialLink {
  pub fn open(path: &str, baud_rate: u32) -> VdcResult<Self> {
    let port = serialport::new(path, baud_rate)
      .timeout(Duration::from_millis(100))
      .open()
      .map_err(|e| VdcError::from(VdcProtocolError::Transport(e.to_string())))?;
    let mut reader = port
      .try_clone()
      .map_err(|e| VdcError::from(VdcProtocolError::Transport(e.to_string())))?;
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
      let mut buf = [0u8; 256];
      loop {
        match reader.read(&mut buf) {
          Ok(0) => break,
          Ok(n) => {
            if tx.blocking_send(buf[..n].to_vec()).is_err() {
              break;
            }
          }
          Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
          Err(_) => break,
        }
      }
    });
    info!("opened serial port {} at {} baud", path, baud_rate);
    Ok(Self {
      rx,
      writer: port,
      pending: Vec::new(),
    })
  }
}

#[async_trait]
impl ByteLink for SerialLink {
  async fn read_some(&mut self, buf: &mut [u8]) -> VdcResult<usize> {
    if self.pending.is_empty() {
      match self.rx.recv().await {
        Some(bytes) => self.pending = bytes,
        None => return Ok(0),
      }
    }
    let n = self.pending.len().min(buf.len());
    buf[..n].copy_from_slice(&self.pending[..n]);
    self.pending.drain(..n);
    Ok(n)
  }

  async fn write_all_bytes(&mut self, bytes: &[u8]) -> VdcResult<()> {
    use std::io::Write;
    self.writer.write_all(bytes).map_err(io_err)?;
    self.writer.flush().map_err(io_err)
  }
}

/// Open a link from an option string: `host[:port]` means TCP, anything
/// else is a serial device path.
pub async fn open_link(connection: &str, baud_rate: u32, default_port: u16) -> VdcResult<Box<dyn ByteLink>> {
  if connection.starts_with('/') {
    Ok(Box::new(SerialLink::open(connection, baud_rate)?))
  } else {
    Ok(Box::new(TcpLink::connect(connection, default_port).await?))
  }
}

/// EnOcean modem port over any byte link: ESP3 is self-framing, the
/// port just moves bytes.
pub struct LinkEnoceanPort {
  link: Box<dyn ByteLink>,
}

impl LinkEnoceanPort {
  pub fn new(link: Box<dyn ByteLink>) -> Self {
    Self { link }
  }
}

#[async_trait]
impl EnoceanPort for LinkEnoceanPort {
  async fn read_bytes(&mut self, buf: &mut [u8]) -> VdcResult<usize> {
    self.link.read_some(buf).await
  }

  async fn write_bytes(&mut self, bytes: &[u8]) -> VdcResult<()> {
    self.link.write_all_bytes(bytes).await
  }
}

// DALI bridge link framing: 3-byte requests [op b1 b2], 2-byte answers
// [status data].
const BRIDGE_OP_SEND: u8 = 0x00;
const BRIDGE_OP_QUERY: u8 = 0x01;
const BRIDGE_OP_SPECIAL: u8 = 0x02;

const BRIDGE_RESP_ACK: u8 = 0x00;
const BRIDGE_RESP_DATA: u8 = 0x01;
const BRIDGE_RESP_YES: u8 = 0x02;
const BRIDGE_RESP_NONE: u8 = 0x03;
const BRIDGE_RESP_COLLISION: u8 = 0x04;

/// DALI bridge over a byte link.
pub struct LinkDaliBridge {
  link: Box<dyn ByteLink>,
}

impl LinkDaliBridge {
  pub fn new(link: Box<dyn ByteLink>) -> Self {
    Self { link }
  }

  async fn transact(&mut self, op: u8, b1: u8, b2: u8) -> VdcResult<(u8, u8)> {
    self.link.write_all_bytes(&[op, b1, b2]).await?;
    let mut response = [0u8; 2];
    let mut got = 0;
    while got < 2 {
      let n = self.link.read_some(&mut response[got..]).await?;
      if n == 0 {
        return Err(VdcProtocolError::Transport("bridge link closed".into()).into());
      }
      got += n;
    }
    Ok((response[0], response[1]))
  }
}

#[async_trait(?Send)]
impl DaliBridge for LinkDaliBridge {
  async fn send(&mut self, address_byte: u8, opcode: u8) -> VdcResult<()> {
    let (status, _) = self.transact(BRIDGE_OP_SEND, address_byte, opcode).await?;
    if status == BRIDGE_RESP_ACK {
      Ok(())
    } else {
      Err(VdcProtocolError::InvalidFrame(format!("unexpected bridge status {status:#04x}")).into())
    }
  }

  async fn query(&mut self, address_byte: u8, opcode: u8) -> VdcResult<DaliQueryResult> {
    let (status, data) = self.transact(BRIDGE_OP_QUERY, address_byte, opcode).await?;
    Ok(match status {
      BRIDGE_RESP_DATA => DaliQueryResult::Value(data),
      BRIDGE_RESP_YES => DaliQueryResult::Yes,
      BRIDGE_RESP_COLLISION => DaliQueryResult::Collision,
      BRIDGE_RESP_NONE => DaliQueryResult::None,
      _ => DaliQueryResult::None,
    })
  }

  async fn send_special(&mut self, special: u8, value: u8) -> VdcResult<()> {
    let (status, _) = self.transact(BRIDGE_OP_SPECIAL, special, value).await?;
    if status == BRIDGE_RESP_ACK {
      Ok(())
    } else {
      Err(VdcProtocolError::InvalidFrame(format!("unexpected bridge status {status:#04x}")).into())
    }
  }
}
