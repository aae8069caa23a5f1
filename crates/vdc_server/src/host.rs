// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The process-wide root of the vDC: owns all device class containers,
//! the shared parameter store, the upstream API server and the announce,
//! session-timeout and periodic-save loops.
//!
//! All state mutation happens in the host's single event task. Inbound
//! connections get a reader task that only parses lines into events and
//! a writer task that only flushes outbound lines; neither touches any
//! model state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vdc_core::errors::{VdcApiError, VdcError};
use vdc_core::ident::DsUid;
use vdc_core::message::{
  self,
  serializer::{self, IncomingMessage},
  CallSceneParams,
  GetPropertyParams,
  HelloParams,
  HelloResult,
  RpcId,
  RpcRequest,
  RpcResponse,
  SceneParams,
  SetPropertyParams,
  ControlValueParams,
  VDC_API_VERSION,
};
use vdc_core::util::async_manager;
use vdc_core::VdcResult;

use crate::behaviour::button::BUTTON_TICK_INTERVAL_MS;
use crate::device::DevicePush;
use crate::property::{PropIndex, PropertyContainer};
use crate::vdc::{DeviceNotification, Vdc, VdcServices};

/// Host configuration. The timing defaults implement the standard
/// announce retry behaviour and the 3 minute session activity timeout.
#[derive(Debug, Clone)]
pub struct VdcHostConfig {
  pub name: String,
  pub dsuid: DsUid,
  /// Session ends after this much API inactivity.
  pub session_timeout: Duration,
  /// Announce reply wait before moving on to the next device.
  pub announce_timeout: Duration,
  /// Back-off before re-announcing a device whose announce never
  /// completed.
  pub announce_retry: Duration,
  /// Cadence of the periodic settings save run.
  pub save_interval: Duration,
}

impl VdcHostConfig {
  pub fn new(name: &str, dsuid: DsUid) -> Self {
    Self {
      name: name.to_owned(),
      dsuid,
      session_timeout: Duration::from_secs(180),
      announce_timeout: Duration::from_secs(15),
      announce_retry: Duration::from_secs(300),
      save_interval: Duration::from_secs(5),
    }
  }
}

/// Upstream session state. Only one connection is "the session"; other
/// connections stay open but are answered with 401 for anything but
/// hello/bye.
#[derive(Debug, Clone)]
pub enum SessionState {
  Idle,
  Connected { peer: DsUid, conn_id: u64 },
}

/// Events driving the host task.
#[derive(Debug)]
pub enum HostEvent {
  Connected { conn_id: u64, tx: mpsc::Sender<String> },
  Disconnected { conn_id: u64 },
  Incoming { conn_id: u64, line: String },
  /// A technology signalled pending hardware input.
  Hardware,
}

pub struct VdcHost {
  config: VdcHostConfig,
  services: VdcServices,
  vdcs: Vec<Box<dyn Vdc>>,
  /// dSUID -> index into `vdcs`, for addressed method routing.
  device_index: HashMap<DsUid, usize>,
  session: SessionState,
  last_activity: Instant,
  connections: HashMap<u64, mpsc::Sender<String>>,
  /// In-flight announce: (request id, device, reply deadline).
  pending_announce: Option<(RpcId, DsUid, Instant)>,
  announce_seq: u64,
  collecting: bool,
  event_tx: mpsc::Sender<HostEvent>,
  event_rx: Option<mpsc::Receiver<HostEvent>>,
  /// Cancellation token for the event loop and every task spawned on
  /// its behalf (API server, hardware readers).
  loop_cancellation_token: CancellationToken,
}

impl VdcHost {
  pub fn new(config: VdcHostConfig, services: VdcServices) -> Self {
    let (event_tx, event_rx) = mpsc::channel(256);
    Self {
      config,
      services,
      vdcs: Vec::new(),
      device_index: HashMap::new(),
      session: SessionState::Idle,
      last_activity: Instant::now(),
      connections: HashMap::new(),
      pending_announce: None,
      announce_seq: 0,
      collecting: false,
      event_tx,
      event_rx: Some(event_rx),
      loop_cancellation_token: CancellationToken::new(),
    }
  }

  pub fn dsuid(&self) -> DsUid {
    self.config.dsuid
  }

  pub fn services(&self) -> &VdcServices {
    &self.services
  }

  /// Sender for feeding events into the host task; hardware tasks use
  /// this to signal activity.
  pub fn event_sender(&self) -> mpsc::Sender<HostEvent> {
    self.event_tx.clone()
  }

  /// The host's cancellation token. Cancelling it stops the event loop;
  /// hardware reader tasks should run under child tokens of this one so
  /// a shutdown reaches them too.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.loop_cancellation_token.clone()
  }

  pub fn add_vdc(&mut self, vdc: Box<dyn Vdc>) {
    info!("adding device class container {} ({})", vdc.class_id(), vdc.dsuid());
    self.vdcs.push(vdc);
  }

  pub fn session_active(&self) -> bool {
    matches!(self.session, SessionState::Connected { .. })
  }

  /// Run device collection on all containers. The announce loop no-ops
  /// for the whole duration.
  pub async fn collect_devices(&mut self, incremental: bool, exhaustive: bool, clear_settings: bool) -> VdcResult<()> {
    self.collecting = true;
    for vdc in self.vdcs.iter_mut() {
      if let Err(e) = vdc
        .collect_devices(&self.services, incremental, exhaustive, clear_settings)
        .await
      {
        error!("collecting devices for {} failed: {}", vdc.class_id(), e);
      }
    }
    self.rebuild_device_index();
    self.collecting = false;
    Ok(())
  }

  fn rebuild_device_index(&mut self) {
    self.device_index.clear();
    for (idx, vdc) in self.vdcs.iter().enumerate() {
      for dsuid in vdc.device_dsuids() {
        self.device_index.insert(dsuid, idx);
      }
    }
    info!("{} devices total", self.device_index.len());
  }

  /// Serve the upstream API on `listener` and process events until the
  /// cancellation token fires (or the event channel dies).
  pub async fn run(mut self, listener: TcpListener) -> VdcResult<()> {
    let tx = self.event_tx.clone();
    async_manager::spawn(accept_loop(
      listener,
      tx,
      self.loop_cancellation_token.child_token(),
    ));
    let mut event_rx = self.event_rx.take().ok_or_else(|| {
      VdcError::from(VdcApiError::GeneralFailure("host already running".into()))
    })?;
    let cancellation = self.loop_cancellation_token.clone();
    let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
    let mut save_run = tokio::time::interval(self.config.save_interval);
    let mut button_ticks = tokio::time::interval(Duration::from_millis(BUTTON_TICK_INTERVAL_MS));
    loop {
      select! {
        ev = event_rx.recv() => {
          match ev {
            Some(ev) => self.handle_event(ev).await,
            None => break,
          }
        }
        _ = housekeeping.tick() => self.periodic_housekeeping().await,
        _ = save_run.tick() => self.save_all(),
        _ = button_ticks.tick(), if self.any_buttons_active() => self.process_button_ticks().await,
        _ = cancellation.cancelled() => {
          debug!("host event loop cancelled, exiting");
          break;
        }
      }
    }
    // a last save run so a clean shutdown loses no dirty settings
    self.save_all();
    Ok(())
  }

  pub async fn handle_event(&mut self, event: HostEvent) {
    match event {
      HostEvent::Connected { conn_id, tx } => {
        debug!("API connection {} started", conn_id);
        self.connections.insert(conn_id, tx);
      }
      HostEvent::Disconnected { conn_id } => {
        debug!("API connection {} ended", conn_id);
        self.connections.remove(&conn_id);
        if matches!(self.session, SessionState::Connected { conn_id: sc, .. } if sc == conn_id) {
          self.end_session().await;
        }
      }
      HostEvent::Incoming { conn_id, line } => {
        self.handle_line(conn_id, &line).await;
      }
      HostEvent::Hardware => {
        self.service_vdcs().await;
      }
    }
  }

  async fn handle_line(&mut self, conn_id: u64, line: &str) {
    match serializer::parse_line(line) {
      Ok(IncomingMessage::Request(request)) => self.handle_request(conn_id, request).await,
      Ok(IncomingMessage::Response(response)) => self.handle_response(response).await,
      Err(e) => {
        // malformed input is dropped; scanners/peers must not be able to
        // wedge the session with garbage
        warn!("dropping unparseable API line: {}", e);
      }
    }
  }

  async fn handle_request(&mut self, conn_id: u64, request: RpcRequest) {
    let is_session_conn =
      matches!(self.session, SessionState::Connected { conn_id: sc, .. } if sc == conn_id);
    if is_session_conn {
      self.last_activity = Instant::now();
    }
    match request.method().as_str() {
      message::METHOD_HELLO => self.handle_hello(conn_id, &request).await,
      message::METHOD_BYE => {
        // bye is always acknowledged, even out of session
        if let Some(id) = request.id() {
          self.reply(conn_id, RpcResponse::success(json!({}), id.clone())).await;
        }
        self.close_connection(conn_id).await;
      }
      _ => {
        if !is_session_conn {
          if let Some(id) = request.id() {
            let err = VdcError::from(VdcApiError::NoSession);
            self.reply(conn_id, RpcResponse::failure(&err, id.clone())).await;
          }
          return;
        }
        let dsuid = match serializer::parse_dsid(request.params()) {
          Ok(d) => d,
          Err(e) => {
            if let Some(id) = request.id() {
              self.reply(conn_id, RpcResponse::failure(&e, id.clone())).await;
            }
            return;
          }
        };
        let result = self.dispatch_addressed(&dsuid, &request).await;
        if let Some(id) = request.id() {
          let response = match result {
            Ok(value) => RpcResponse::success(value, id.clone()),
            Err(e) => RpcResponse::failure(&e, id.clone()),
          };
          self.reply(conn_id, response).await;
        } else if let Err(e) = result {
          // notifications never carry error replies
          debug!("notification {} failed: {}", request.method(), e);
        }
      }
    }
  }

  async fn handle_hello(&mut self, conn_id: u64, request: &RpcRequest) {
    let Some(id) = request.id() else {
      warn!("hello sent as notification, ignored");
      return;
    };
    let params: HelloParams = match serializer::parse_params(request.params()) {
      Ok(p) => p,
      Err(e) => {
        self.reply(conn_id, RpcResponse::failure(&e, id.clone())).await;
        return;
      }
    };
    if params.api_version() != VDC_API_VERSION {
      let err = VdcError::from(VdcApiError::IncompatibleApiVersion(params.api_version().clone()));
      self.reply(conn_id, RpcResponse::failure(&err, id.clone())).await;
      return;
    }
    let peer = *params.dsid();
    // the same vdSM may restart its session any time, others are rejected
    if let SessionState::Connected { peer: current, .. } = &self.session {
      if *current != peer {
        let err = VdcError::from(VdcApiError::SessionBusy(current.to_string()));
        self.reply(conn_id, RpcResponse::failure(&err, id.clone())).await;
        self.close_connection(conn_id).await;
        return;
      }
    }
    info!("vDC session started with vdSM {}", peer);
    self.session = SessionState::Connected { peer, conn_id };
    self.last_activity = Instant::now();
    let result = serde_json::to_value(HelloResult::new(self.config.dsuid)).unwrap_or(json!({}));
    self.reply(conn_id, RpcResponse::success(result, id.clone())).await;
    // enable sending announces now
    self.process_announcements().await;
  }

  async fn dispatch_addressed(&mut self, dsuid: &DsUid, request: &RpcRequest) -> VdcResult<Value> {
    let method = request.method().as_str();
    // host level
    if *dsuid == self.config.dsuid {
      return self.handle_host_method(method, request).await;
    }
    // container level
    if let Some((vdc_dsuid, class_id)) = self
      .vdcs
      .iter()
      .find(|v| v.dsuid() == *dsuid)
      .map(|v| (v.dsuid(), v.class_id()))
    {
      return match method {
        message::METHOD_PING => {
          self.send_pong(&vdc_dsuid).await;
          Ok(json!({}))
        }
        message::METHOD_GET_PROPERTY => Ok(json!({
          "dSUID": vdc_dsuid.to_string(),
          "type": "vDC",
          "model": class_id,
        })),
        _ => Err(VdcApiError::UnknownMethod(method.to_owned()).into()),
      };
    }
    // device level
    let Some(vdc_idx) = self.device_index.get(dsuid).copied() else {
      return Err(VdcApiError::UnknownAddressable(dsuid.to_string()).into());
    };
    if method == message::METHOD_REMOVE {
      return self.handle_remove(vdc_idx, dsuid).await;
    }
    if method == message::METHOD_PING {
      self.send_pong(dsuid).await;
      return Ok(json!({}));
    }
    let vdc = self
      .vdcs
      .get_mut(vdc_idx)
      .ok_or_else(|| VdcError::from(VdcApiError::UnknownAddressable(dsuid.to_string())))?;
    let device = vdc
      .device_mut(dsuid)
      .ok_or_else(|| VdcError::from(VdcApiError::UnknownAddressable(dsuid.to_string())))?;
    match method {
      message::METHOD_CALL_SCENE => {
        let params: CallSceneParams = serializer::parse_params(request.params())?;
        device.call_scene(params.scene(), params.force()).await;
        Ok(json!({}))
      }
      message::METHOD_SAVE_SCENE => {
        let params: SceneParams = serializer::parse_params(request.params())?;
        device.save_scene(params.scene());
        Ok(json!({}))
      }
      message::METHOD_UNDO_SCENE => {
        let params: SceneParams = serializer::parse_params(request.params())?;
        device.undo_scene(params.scene()).await;
        Ok(json!({}))
      }
      message::METHOD_SET_LOCAL_PRIORITY => {
        let params: SceneParams = serializer::parse_params(request.params())?;
        device.set_local_priority(params.scene());
        Ok(json!({}))
      }
      message::METHOD_CALL_SCENE_MIN => {
        let params: SceneParams = serializer::parse_params(request.params())?;
        device.call_scene_min(params.scene()).await;
        Ok(json!({}))
      }
      message::METHOD_SET_CONTROL_VALUE => {
        let params: ControlValueParams = serializer::parse_params(request.params())?;
        device.set_control_value(params.name(), params.value()).await;
        Ok(json!({}))
      }
      message::METHOD_IDENTIFY => {
        device.identify().await;
        Ok(json!({}))
      }
      message::METHOD_GET_PROPERTY => {
        let params: GetPropertyParams = serializer::parse_params(request.params())?;
        device.read_path(params.name(), PropIndex::from_api(*params.index(), *params.count()))
      }
      message::METHOD_SET_PROPERTY => {
        let params: SetPropertyParams = serializer::parse_params(request.params())?;
        let index = match params.index() {
          Some(i) => PropIndex::At((*i).max(0) as usize),
          None => PropIndex::None,
        };
        device.write_path(params.name(), index, params.value())?;
        Ok(json!({}))
      }
      _ => Err(VdcApiError::UnknownMethod(method.to_owned()).into()),
    }
  }

  async fn handle_host_method(&mut self, method: &str, _request: &RpcRequest) -> VdcResult<Value> {
    match method {
      message::METHOD_PING => {
        let dsuid = self.config.dsuid;
        self.send_pong(&dsuid).await;
        Ok(json!({}))
      }
      message::METHOD_GET_PROPERTY => Ok(json!({
        "dSUID": self.config.dsuid.to_string(),
        "name": self.config.name,
        "type": "vDC host",
      })),
      _ => Err(VdcApiError::UnknownMethod(method.to_owned()).into()),
    }
  }

  async fn handle_remove(&mut self, vdc_idx: usize, dsuid: &DsUid) -> VdcResult<Value> {
    let disconnected = match self.vdcs.get_mut(vdc_idx).and_then(|v| v.device_mut(dsuid)) {
      Some(device) => device.disconnect(true).await,
      None => return Err(VdcApiError::UnknownAddressable(dsuid.to_string()).into()),
    };
    if !disconnected {
      return Err(VdcApiError::RemovalRefused(dsuid.to_string()).into());
    }
    if let Some(vdc) = self.vdcs.get_mut(vdc_idx) {
      vdc.remove_device(&self.services, dsuid, true).await?;
    }
    self.device_index.remove(dsuid);
    Ok(json!({}))
  }

  async fn handle_response(&mut self, response: RpcResponse) {
    let matches_pending = self
      .pending_announce
      .as_ref()
      .map(|(id, _, _)| id == response.id())
      .unwrap_or(false);
    if !matches_pending {
      trace!("unmatched response for id {}", response.id());
      return;
    }
    let (_, dsuid, _) = self.pending_announce.take().expect("checked above");
    if response.is_error() {
      warn!("announce for {} failed, will retry later", dsuid);
      // keep the announcing timestamp; the device is retried after the
      // announce_retry back-off
    } else if let Some(device) = self.device_mut(&dsuid) {
      info!("device {} announced", dsuid);
      device.set_announced(Some(Instant::now()));
      device.set_announcing(None);
    }
    // continue with the next unannounced device
    self.process_announcements().await;
  }

  fn device_mut(&mut self, dsuid: &DsUid) -> Option<&mut crate::device::Device> {
    let idx = *self.device_index.get(dsuid)?;
    self.vdcs.get_mut(idx)?.device_mut(dsuid)
  }

  /// Announce the next unannounced public device, if any. No-ops while
  /// collection is running or an announce is already in flight.
  pub async fn process_announcements(&mut self) {
    if !self.session_active() || self.collecting || self.pending_announce.is_some() {
      return;
    }
    let retry = self.config.announce_retry;
    let mut candidate: Option<DsUid> = None;
    'outer: for vdc in self.vdcs.iter() {
      for dsuid in vdc.device_dsuids() {
        if let Some(device) = vdc.device(&dsuid) {
          let retriable = device
            .announcing()
            .map(|at| at.elapsed() > retry)
            .unwrap_or(true);
          if device.is_public() && device.announced().is_none() && retriable {
            candidate = Some(dsuid);
            break 'outer;
          }
        }
      }
    }
    let Some(dsuid) = candidate else {
      return;
    };
    if let Some(device) = self.device_mut(&dsuid) {
      device.set_announcing(Some(Instant::now()));
    }
    self.announce_seq += 1;
    let id = RpcId::String(format!("announce_{}", self.announce_seq));
    let request = RpcRequest::new(
      message::METHOD_ANNOUNCE,
      json!({ "dSID": dsuid.to_string() }),
      Some(id.clone()),
    );
    let deadline = Instant::now() + self.config.announce_timeout;
    self.pending_announce = Some((id, dsuid, deadline));
    info!("announcing device {}", dsuid);
    self.send_to_session(&request).await;
  }

  async fn periodic_housekeeping(&mut self) {
    // session activity timeout
    if let SessionState::Connected { conn_id, .. } = self.session {
      if self.last_activity.elapsed() > self.config.session_timeout {
        info!("vDC API session timed out");
        self.close_connection(conn_id).await;
      }
    }
    // announce reply timeout: move on, the device is retried after the
    // announce_retry back-off
    if let Some((_, dsuid, deadline)) = self.pending_announce.as_ref() {
      if Instant::now() > *deadline {
        warn!("announce for {} timed out", dsuid);
        self.pending_announce = None;
        self.process_announcements().await;
      }
    }
  }

  /// Walk all devices and save dirty settings; cheap when clean.
  pub fn save_all(&mut self) {
    for vdc in self.vdcs.iter_mut() {
      for dsuid in vdc.device_dsuids() {
        if let Some(device) = vdc.device_mut(&dsuid) {
          if let Err(e) = device.save_settings(self.services.store()) {
            error!("saving device {} failed: {}", dsuid, e);
          }
        }
      }
    }
  }

  fn any_buttons_active(&self) -> bool {
    self.vdcs.iter().any(|vdc| {
      vdc
        .device_dsuids()
        .iter()
        .any(|d| vdc.device(d).map(|dev| dev.buttons_want_timer()).unwrap_or(false))
    })
  }

  async fn process_button_ticks(&mut self) {
    let now_ms = self.services.now_ms();
    let mut pushes: Vec<(DsUid, DevicePush)> = Vec::new();
    for vdc in self.vdcs.iter_mut() {
      for dsuid in vdc.device_dsuids() {
        if let Some(device) = vdc.device_mut(&dsuid) {
          if device.buttons_want_timer() {
            for push in device.process_button_timers(now_ms).await {
              pushes.push((dsuid, push));
            }
          }
        }
      }
    }
    for (dsuid, push) in pushes {
      self.push_device_event(&dsuid, &push).await;
    }
  }

  async fn service_vdcs(&mut self) {
    let mut notifications = Vec::new();
    for vdc in self.vdcs.iter_mut() {
      notifications.extend(vdc.service(&self.services).await);
    }
    for notification in notifications {
      match notification {
        DeviceNotification::Push { dsuid, push } => self.push_device_event(&dsuid, &push).await,
        DeviceNotification::Appeared { dsuid } => {
          self.rebuild_device_index();
          info!("device {} appeared", dsuid);
          self.process_announcements().await;
        }
        DeviceNotification::Vanished { dsuid } => {
          self.device_index.remove(&dsuid);
          let request = RpcRequest::new(
            message::METHOD_VANISH,
            json!({ "dSID": dsuid.to_string() }),
            None,
          );
          self.send_to_session(&request).await;
        }
      }
    }
  }

  /// Push a device state change upstream as a pushProperty notification
  /// addressing the changed node of the device's property tree.
  async fn push_device_event(&mut self, dsuid: &DsUid, push: &DevicePush) {
    let (name, value) = match push {
      DevicePush::ButtonClick { index, click, key } => (
        format!("buttons.{index}.clickType"),
        json!({ "click": *click as u8, "key": key.as_u8() }),
      ),
      DevicePush::InputState { index, value } => {
        (format!("binaryInputs.{index}.value"), json!(value))
      }
      DevicePush::SensorValue { index, value } => {
        (format!("sensors.{index}.value"), json!(value))
      }
    };
    let request = RpcRequest::new(
      "pushProperty",
      json!({ "dSID": dsuid.to_string(), "name": name, "value": value }),
      None,
    );
    self.send_to_session(&request).await;
  }

  async fn send_pong(&mut self, dsuid: &DsUid) {
    let request = RpcRequest::new(
      message::METHOD_PONG,
      json!({ "dSID": dsuid.to_string() }),
      None,
    );
    self.send_to_session(&request).await;
  }

  async fn send_to_session(&mut self, request: &RpcRequest) {
    let SessionState::Connected { conn_id, .. } = self.session else {
      return;
    };
    let Ok(line) = serializer::to_line(request) else {
      return;
    };
    if let Some(tx) = self.connections.get(&conn_id) {
      if tx.send(line).await.is_err() {
        warn!("session connection gone while sending");
      }
    }
  }

  async fn reply(&mut self, conn_id: u64, response: RpcResponse) {
    let Ok(line) = serializer::to_line(&response) else {
      return;
    };
    if let Some(tx) = self.connections.get(&conn_id) {
      let _ = tx.send(line).await;
    }
  }

  async fn close_connection(&mut self, conn_id: u64) {
    self.connections.remove(&conn_id);
    if matches!(self.session, SessionState::Connected { conn_id: sc, .. } if sc == conn_id) {
      self.end_session().await;
    }
  }

  /// End the session: all devices go back to unannounced, pending
  /// announce retries are cancelled.
  async fn end_session(&mut self) {
    info!("vDC session ended");
    self.session = SessionState::Idle;
    self.pending_announce = None;
    for vdc in self.vdcs.iter_mut() {
      for dsuid in vdc.device_dsuids() {
        if let Some(device) = vdc.device_mut(&dsuid) {
          device.reset_announcement();
        }
      }
    }
  }
}

/// Accept loop of the API server: every connection gets a line reader
/// feeding host events and a writer draining the connection's outbound
/// queue. All tasks run under child tokens of the host's cancellation
/// token, so one cancel tears the whole server down.
async fn accept_loop(listener: TcpListener, events: mpsc::Sender<HostEvent>, cancellation: CancellationToken) {
  let mut next_conn_id: u64 = 0;
  loop {
    let (stream, peer) = select! {
      conn = listener.accept() => match conn {
        Ok(conn) => conn,
        Err(e) => {
          error!("API accept failed: {}", e);
          break;
        }
      },
      _ = cancellation.cancelled() => {
        debug!("API accept loop cancelled, exiting");
        break;
      }
    };
    next_conn_id += 1;
    let conn_id = next_conn_id;
    debug!("API connection {} from {}", conn_id, peer);
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    if events
      .send(HostEvent::Connected { conn_id, tx: out_tx })
      .await
      .is_err()
    {
      break;
    }
    let (read_half, mut write_half) = stream.into_split();
    let connection_token = cancellation.child_token();
    let writer_token = connection_token.clone();
    async_manager::spawn(async move {
      loop {
        select! {
          line = out_rx.recv() => {
            let Some(line) = line else {
              break;
            };
            if write_half.write_all(line.as_bytes()).await.is_err() {
              break;
            }
            if write_half.write_all(b"\n").await.is_err() {
              break;
            }
          }
          _ = writer_token.cancelled() => break,
        }
      }
    });
    let reader_events = events.clone();
    async_manager::spawn(async move {
      let mut lines = BufReader::new(read_half).lines();
      loop {
        select! {
          line = lines.next_line() => {
            let Ok(Some(line)) = line else {
              break;
            };
            if reader_events
              .send(HostEvent::Incoming { conn_id, line })
              .await
              .is_err()
            {
              return;
            }
          }
          _ = connection_token.cancelled() => break,
        }
      }
      let _ = reader_events.send(HostEvent::Disconnected { conn_id }).await;
    });
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::device::test::light_device;
  use crate::device::Device;
  use crate::persist::ParamStore;
  use crate::vdc::VdcCommon;
  use async_trait::async_trait;

  struct TestVdc {
    common: VdcCommon,
    devices: HashMap<DsUid, Device>,
  }

  #[async_trait(?Send)]
  impl Vdc for TestVdc {
    fn common(&self) -> &VdcCommon {
      &self.common
    }

    fn common_mut(&mut self) -> &mut VdcCommon {
      &mut self.common
    }

    fn device_dsuids(&self) -> Vec<DsUid> {
      self.devices.keys().copied().collect()
    }

    fn device(&self, dsuid: &DsUid) -> Option<&Device> {
      self.devices.get(dsuid)
    }

    fn device_mut(&mut self, dsuid: &DsUid) -> Option<&mut Device> {
      self.devices.get_mut(dsuid)
    }

    async fn collect_devices(
      &mut self,
      _services: &VdcServices,
      _incremental: bool,
      _exhaustive: bool,
      _clear_settings: bool,
    ) -> VdcResult<()> {
      Ok(())
    }

    async fn remove_device(&mut self, _services: &VdcServices, dsuid: &DsUid, _forget: bool) -> VdcResult<()> {
      self.devices.remove(dsuid);
      Ok(())
    }
  }

  struct Fixture {
    host: VdcHost,
    device_dsuid: DsUid,
    conn_rx: mpsc::Receiver<String>,
    conn_id: u64,
  }

  async fn fixture() -> Fixture {
    let store = ParamStore::open_in_memory().expect("store opens");
    let services = VdcServices::new(store, std::env::temp_dir());
    let host_dsuid = DsUid::classic(0x000002, 0xBEEF);
    let config = VdcHostConfig::new("test host", host_dsuid);
    let mut host = VdcHost::new(config, services);

    let (device, _applied) = light_device();
    let device_dsuid = *device.dsuid();
    let mut devices = HashMap::new();
    devices.insert(device_dsuid, device);
    host.add_vdc(Box::new(TestVdc {
      common: VdcCommon::new("test_class", 1),
      devices,
    }));
    host.collect_devices(false, false, false).await.expect("collect");

    let (tx, conn_rx) = mpsc::channel(64);
    let conn_id = 1;
    host.handle_event(HostEvent::Connected { conn_id, tx }).await;
    Fixture {
      host,
      device_dsuid,
      conn_rx,
      conn_id,
    }
  }

  async fn send_line(fixture: &mut Fixture, line: String) {
    fixture
      .host
      .handle_event(HostEvent::Incoming {
        conn_id: fixture.conn_id,
        line,
      })
      .await;
  }

  fn hello_line(peer: &DsUid, id: i64) -> String {
    format!(
      r#"{{"jsonrpc":"2.0","method":"hello","params":{{"APIVersion":"1.0","dSID":"{peer}"}},"id":{id}}}"#
    )
  }

  #[tokio::test]
  async fn test_method_before_hello_is_401() {
    let mut fixture = fixture().await;
    let dsuid = fixture.device_dsuid;
    send_line(
      &mut fixture,
      format!(r#"{{"jsonrpc":"2.0","method":"undoScene","params":{{"dSID":"{dsuid}","scene":5}},"id":1}}"#),
    )
    .await;
    let reply = fixture.conn_rx.recv().await.expect("reply");
    assert!(reply.contains("401"), "expected 401, got {reply}");
  }

  #[tokio::test]
  async fn test_hello_and_announce_flow() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    // hello reply with our dSID and allowDisconnect false
    let reply = fixture.conn_rx.recv().await.expect("hello reply");
    assert!(reply.contains("allowDisconnect"));
    // announce for the one public device follows immediately
    let announce = fixture.conn_rx.recv().await.expect("announce");
    assert!(announce.contains("announce"), "got {announce}");
    assert!(announce.contains(&fixture.device_dsuid.to_string()));
    // confirm the announce; device becomes announced
    let announce_msg = serializer::parse_line(&announce).expect("parses");
    let IncomingMessage::Request(req) = announce_msg else {
      panic!("expected request");
    };
    let id = req.id().clone().expect("announce has id");
    let id_json = serde_json::to_string(&id).expect("id");
    send_line(
      &mut fixture,
      format!(r#"{{"jsonrpc":"2.0","result":{{}},"id":{id_json}}}"#),
    )
    .await;
    let device_announced = fixture
      .host
      .device_mut(&fixture.device_dsuid.clone())
      .expect("device")
      .announced()
      .is_some();
    assert!(device_announced);
  }

  #[tokio::test]
  async fn test_hello_wrong_version_505() {
    let mut fixture = fixture().await;
    send_line(
      &mut fixture,
      r#"{"jsonrpc":"2.0","method":"hello","params":{"APIVersion":"2.0","dSID":"3504175FE0000010000014D9"},"id":1}"#.to_owned(),
    )
    .await;
    let reply = fixture.conn_rx.recv().await.expect("reply");
    assert!(reply.contains("505"), "expected 505, got {reply}");
    assert!(!fixture.host.session_active());
  }

  #[tokio::test]
  async fn test_second_peer_rejected_503() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    let _ = fixture.conn_rx.recv().await; // hello reply
    let _ = fixture.conn_rx.recv().await; // announce
    // second connection, different vdSM
    let (tx2, mut conn_rx2) = mpsc::channel(64);
    fixture.host.handle_event(HostEvent::Connected { conn_id: 2, tx: tx2 }).await;
    let other = DsUid::classic(0x000003, 0x99);
    fixture
      .host
      .handle_event(HostEvent::Incoming {
        conn_id: 2,
        line: hello_line(&other, 7),
      })
      .await;
    let reply = conn_rx2.recv().await.expect("reply");
    assert!(reply.contains("503"), "expected 503, got {reply}");
    // original session is untouched
    assert!(fixture.host.session_active());
  }

  #[tokio::test]
  async fn test_call_scene_notification_reaches_device() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    let _ = fixture.conn_rx.recv().await;
    let _ = fixture.conn_rx.recv().await;
    let dsuid = fixture.device_dsuid;
    // callScene is a notification: no id, no reply
    send_line(
      &mut fixture,
      format!(r#"{{"jsonrpc":"2.0","method":"callScene","params":{{"dSID":"{dsuid}","scene":5}}}}"#),
    )
    .await;
    let device = fixture.host.device_mut(&dsuid).expect("device");
    let value = device.output.as_ref().expect("output").channels()[0].cached_value();
    assert_eq!(value, 100.0);
  }

  #[tokio::test]
  async fn test_unknown_dsid_404() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    let _ = fixture.conn_rx.recv().await;
    let _ = fixture.conn_rx.recv().await;
    send_line(
      &mut fixture,
      r#"{"jsonrpc":"2.0","method":"undoScene","params":{"dSID":"3504175FE000001000009999","scene":5},"id":9}"#.to_owned(),
    )
    .await;
    let reply = fixture.conn_rx.recv().await.expect("reply");
    assert!(reply.contains("404"), "expected 404, got {reply}");
  }

  #[tokio::test]
  async fn test_get_property_on_device() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    let _ = fixture.conn_rx.recv().await;
    let _ = fixture.conn_rx.recv().await;
    let dsuid = fixture.device_dsuid;
    send_line(
      &mut fixture,
      format!(r#"{{"jsonrpc":"2.0","method":"getProperty","params":{{"dSID":"{dsuid}","name":"primaryGroup"}},"id":3}}"#),
    )
    .await;
    let reply = fixture.conn_rx.recv().await.expect("reply");
    let parsed = serializer::parse_line(&reply).expect("parses");
    let IncomingMessage::Response(resp) = parsed else {
      panic!("expected response");
    };
    assert_eq!(resp.result().clone().expect("result"), json!(1)); // yellow/light
  }

  #[tokio::test]
  async fn test_bye_ends_session_and_resets_announcements() {
    let mut fixture = fixture().await;
    let peer = DsUid::classic(0x000003, 0x42);
    send_line(&mut fixture, hello_line(&peer, 1)).await;
    let _ = fixture.conn_rx.recv().await;
    let _ = fixture.conn_rx.recv().await;
    // mark announced via response path is tested elsewhere; end session now
    send_line(&mut fixture, r#"{"jsonrpc":"2.0","method":"bye","params":{},"id":2}"#.to_owned()).await;
    assert!(!fixture.host.session_active());
    let device = fixture.host.device_mut(&fixture.device_dsuid.clone()).expect("device");
    assert!(device.announced().is_none());
    assert!(device.announcing().is_none());
  }
}
