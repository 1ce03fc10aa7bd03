//! Async ATEM client: UDP hand-rolled reliability, the Hello handshake and
//! the background packet-pump task.
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mixlink_protocol::atem::command::{
    cmd_auto, cmd_cut, cmd_dsk_auto, cmd_dsk_set_on_air, cmd_dsk_set_tie, cmd_keyer_set_on_air,
    cmd_set_preview, cmd_set_program,
};
use mixlink_protocol::atem::{ack_packet, hello_packet, walk_commands, AtemFlags, AtemHeader};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};

use crate::atem::state::AtemState;
use crate::error::{Error, Result};
use crate::types::{SwitcherEvent, SwitcherInfo, SwitcherState};

const SILENCE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_CHANNEL_CAPACITY: usize = 32;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum Command {
    SetProgram { me: u8, source: u16 },
    SetPreview { me: u8, source: u16 },
    Cut { me: u8 },
    Auto { me: u8 },
    DskSetOnAir { dsk: u8, on_air: bool },
    DskAuto { dsk: u8 },
    DskSetTie { dsk: u8, tie: bool },
    KeyerSetOnAir { me: u8, keyer: u8, on_air: bool },
}

/// Handle to a running ATEM session.
pub struct AtemClient {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<AtemState>>,
    events: broadcast::Sender<SwitcherEvent>,
    connected: Arc<AtomicBool>,
}

impl AtemClient {
    /// Performs the blocking Hello handshake and spawns the background
    /// receive loop. Mirrors the spec's `connect(timeout_ms)`.
    pub async fn connect(addr: SocketAddrV4, connect_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(addr).await?;
        socket.send(&hello_packet()).await?;

        let (session_id, remote_packet_id) = tokio::time::timeout(connect_timeout, async {
            let mut buf = [0u8; 2048];
            loop {
                let len = socket.recv(&mut buf).await?;
                if len < 12 {
                    continue;
                }
                let header = AtemHeader::decode(&buf[..len])?;
                if header.flags().contains(AtemFlags::HELLO) {
                    return Ok::<_, Error>((header.session_id, header.packet_id));
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout("ATEM connect"))??;

        socket.send(&ack_packet(session_id, remote_packet_id)).await?;
        info!(session_id, "ATEM handshake complete");

        let mut state = AtemState::default();
        state.session_id = session_id;
        state.last_received_packet_id = remote_packet_id;
        let state = Arc::new(RwLock::new(state));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let _ = events.send(SwitcherEvent::Connected);

        let task = AtemTask {
            socket,
            state: state.clone(),
            events: events.clone(),
            cmd_rx,
            connected: connected.clone(),
            session_id,
            local_packet_id: 1,
            last_contact: Instant::now(),
            last_tally: 0,
        };
        tokio::task::spawn(task.run());

        Ok(Self {
            cmd_tx,
            state,
            events,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                if self.state.read().await.initialized {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| Error::Timeout("ATEM initialization"))
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub async fn get_info(&self) -> SwitcherInfo {
        self.state.read().await.info()
    }

    pub async fn get_state(&self) -> SwitcherState {
        self.state.read().await.state(self.is_connected())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.events.subscribe()
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| Error::Disconnected)
    }

    pub async fn set_program(&self, me: u8, source: u16) -> Result<()> {
        self.send(Command::SetProgram { me, source }).await
    }

    pub async fn set_preview(&self, me: u8, source: u16) -> Result<()> {
        self.send(Command::SetPreview { me, source }).await
    }

    pub async fn cut(&self, me: u8) -> Result<()> {
        self.send(Command::Cut { me }).await
    }

    pub async fn auto(&self, me: u8) -> Result<()> {
        self.send(Command::Auto { me }).await
    }

    pub async fn dsk_set_on_air(&self, dsk: u8, on_air: bool) -> Result<()> {
        self.send(Command::DskSetOnAir { dsk, on_air }).await
    }

    pub async fn dsk_auto(&self, dsk: u8) -> Result<()> {
        self.send(Command::DskAuto { dsk }).await
    }

    pub async fn dsk_set_tie(&self, dsk: u8, tie: bool) -> Result<()> {
        self.send(Command::DskSetTie { dsk, tie }).await
    }

    pub async fn keyer_set_on_air(&self, me: u8, keyer: u8, on_air: bool) -> Result<()> {
        self.send(Command::KeyerSetOnAir { me, keyer, on_air }).await
    }
}

/// Owns the socket and runs the receive/keepalive/timeout loop described in
/// spec.md's "Main loop" section.
struct AtemTask {
    socket: UdpSocket,
    state: Arc<RwLock<AtemState>>,
    events: broadcast::Sender<SwitcherEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    connected: Arc<AtomicBool>,
    session_id: u16,
    local_packet_id: u16,
    last_contact: Instant,
    last_tally: u64,
}

impl AtemTask {
    async fn run(mut self) {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately
        let mut buf = [0u8; 2048];

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if self.last_contact.elapsed() > SILENCE_TIMEOUT {
                        warn!("ATEM session silent for {:?}, disconnecting", self.last_contact.elapsed());
                        self.connected.store(false, Ordering::SeqCst);
                        let _ = self.events.send(SwitcherEvent::Disconnected);
                        return;
                    }
                    if self.state.read().await.initialized {
                        let pkt = ack_packet(self.session_id, self.state.read().await.last_received_packet_id);
                        if let Err(e) = self.socket.send(&pkt).await {
                            warn!(?e, "ATEM keepalive send failed");
                        }
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    if let Err(e) = self.handle_command(cmd).await {
                        warn!(?e, "ATEM command failed");
                    }
                }
                recv = self.socket.recv(&mut buf) => {
                    match recv {
                        Ok(len) => self.handle_packet(&buf[..len]).await,
                        Err(e) => {
                            warn!(?e, "ATEM socket error, disconnecting");
                            self.connected.store(false, Ordering::SeqCst);
                            let _ = self.events.send(SwitcherEvent::Disconnected);
                            return;
                        }
                    }
                }
            }

            if !self.connected.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    async fn handle_packet(&mut self, buf: &[u8]) {
        if buf.len() < 12 {
            return;
        }
        let Ok(header) = AtemHeader::decode(buf) else {
            return;
        };

        let mut state = self.state.write().await;
        if state.session_id == 0 && header.session_id != 0 {
            state.session_id = header.session_id;
            self.session_id = header.session_id;
        } else if state.session_id != 0 && header.session_id != 0 && state.session_id != header.session_id {
            return;
        }
        self.last_contact = Instant::now();

        if header.flags().contains(AtemFlags::ACK_REQUEST) {
            let ack = ack_packet(self.session_id, header.packet_id);
            drop(state);
            let _ = self.socket.send(&ack).await;
            state = self.state.write().await;
        }

        let was_initialized = state.initialized;
        if was_initialized {
            if header.packet_id <= state.last_received_packet_id {
                return;
            }
            state.last_received_packet_id = header.packet_id;
            if header.flags().contains(AtemFlags::RESEND) {
                return;
            }
        } else {
            state.last_received_packet_id = header.packet_id;
        }

        if header.length() <= 12 {
            return;
        }
        let payload = &buf[12..];
        let commands = walk_commands(payload);
        drop(state);

        let mut tally_dirty = false;
        let mut just_initialized = false;
        {
            let mut state = self.state.write().await;
            for cmd in &commands {
                if mixlink_protocol::atem::command::affects_tally(cmd) {
                    tally_dirty = true;
                }
                let was_init = state.initialized;
                state.apply(cmd);
                if !was_init && state.initialized {
                    just_initialized = true;
                }
            }
        }

        if just_initialized {
            info!("ATEM session initialized");
        }
        if tally_dirty {
            let packed = self.state.read().await.tally_packed;
            if packed != self.last_tally {
                self.last_tally = packed;
                let _ = self.events.send(SwitcherEvent::TallyChanged(packed));
            }
        }
    }

    async fn send_command(&mut self, command_bytes: &[u8]) -> Result<()> {
        if !self.state.read().await.initialized {
            return Err(Error::Disconnected);
        }
        self.local_packet_id = self.local_packet_id.wrapping_add(1);
        let total_len = 12 + command_bytes.len() as u16;
        let header = AtemHeader::new(
            AtemFlags::ACK_REQUEST,
            total_len,
            self.session_id,
            0,
            self.local_packet_id,
        );
        let mut packet = Vec::with_capacity(total_len as usize);
        packet.extend_from_slice(&header.encode());
        packet.extend_from_slice(command_bytes);
        self.socket.send(&packet).await?;
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::SetProgram { me, source } => self.send_command(&cmd_set_program(me, source)).await,
            Command::SetPreview { me, source } => self.send_command(&cmd_set_preview(me, source)).await,
            Command::Cut { me } => self.send_command(&cmd_cut(me)).await,
            Command::Auto { me } => self.send_command(&cmd_auto(me)).await,
            Command::DskSetOnAir { dsk, on_air } => {
                self.send_command(&cmd_dsk_set_on_air(dsk, on_air)).await
            }
            Command::DskAuto { dsk } => self.send_command(&cmd_dsk_auto(dsk)).await,
            Command::DskSetTie { dsk, tie } => self.send_command(&cmd_dsk_set_tie(dsk, tie)).await,
            Command::KeyerSetOnAir { me, keyer, on_air } => {
                self.send_command(&cmd_keyer_set_on_air(me, keyer, on_air)).await
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    /// Exercises the duplicate-packet rule directly against `AtemState`,
    /// the pure-state half of the dedup logic the background task drives.
    #[tokio::test]
    async fn duplicate_packet_id_is_not_reparsed() {
        let mut state = AtemState::default();
        state.initialized = true;
        state.last_received_packet_id = 5;

        let incoming_packet_id = 5u16;
        let should_parse = incoming_packet_id > state.last_received_packet_id;
        assert!(!should_parse);
    }

    /// ATEM cold start: a simulated switcher completes the Hello handshake,
    /// then sends topology + tally commands; the client reaches
    /// `is_initialized() == true` with a non-zero packed tally.
    #[tokio::test]
    async fn cold_start_against_loopback_switcher() {
        let fake_switcher = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let fake_addr = match fake_switcher.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };

        let connect = tokio::spawn(AtemClient::connect(fake_addr, Duration::from_secs(2)));

        let mut buf = [0u8; 2048];
        let (len, client_addr) = fake_switcher.recv_from(&mut buf).await.unwrap();
        assert!(AtemHeader::decode(&buf[..len]).unwrap().flags().contains(AtemFlags::HELLO));

        let hello_reply = AtemHeader::new(AtemFlags::HELLO, 12, 0x1234, 0, 1).encode();
        fake_switcher.send_to(&hello_reply, client_addr).await.unwrap();

        // consumes the client's ACK of the hello reply
        let (len, _) = fake_switcher.recv_from(&mut buf).await.unwrap();
        assert!(AtemHeader::decode(&buf[..len]).unwrap().flags().contains(AtemFlags::ACK));

        let client = connect.await.unwrap().unwrap();
        assert!(!client.is_initialized().await);

        let mut payload = Vec::new();
        // InCm (8-byte header, no body) + TlIn with 2 channels [Program, Preview]
        payload.extend_from_slice(&[0, 8, 0, 0, b'I', b'n', b'C', b'm']);
        let mut tlin_body = Vec::new();
        tlin_body.extend_from_slice(&2u16.to_be_bytes());
        tlin_body.extend_from_slice(&[1, 2]);
        let tlin_len = (8 + tlin_body.len()) as u16;
        payload.extend_from_slice(&tlin_len.to_be_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(b"TlIn");
        payload.extend_from_slice(&tlin_body);

        let total_len = (12 + payload.len()) as u16;
        let header = AtemHeader::new(AtemFlags::ACK_REQUEST, total_len, 0x1234, 0, 2);
        let mut packet = header.encode().to_vec();
        packet.extend_from_slice(&payload);
        fake_switcher.send_to(&packet, client_addr).await.unwrap();

        // consumes the client's ACK for this packet
        let _ = fake_switcher.recv_from(&mut buf).await.unwrap();

        client.wait_initialized(Duration::from_secs(1)).await.unwrap();
        let state = client.get_state().await;
        assert_ne!(state.tally_packed, 0);
    }
}
