//! Async vMix client: line-oriented TCP, TALLY subscription and keepalive.
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mixlink_protocol::vmix::{
    drain_lines, line_cut, line_fade, line_function, line_overlay_in, line_overlay_out,
    line_quick_play, line_set_preview, line_set_program, line_subscribe_tally, line_tally_poll,
    parse_line, VmixLine,
};
use mixlink_protocol::TallyValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{SwitcherEvent, SwitcherInfo, SwitcherState};
use crate::vmix::state::VmixState;

const SILENCE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);
const EVENT_CHANNEL_CAPACITY: usize = 32;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum Command {
    Line(String),
}

pub struct VmixClient {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<VmixState>>,
    events: broadcast::Sender<SwitcherEvent>,
    connected: Arc<AtomicBool>,
}

impl VmixClient {
    pub async fn connect(addr: SocketAddrV4, connect_timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout("vMix connect"))??;
        let mut stream = stream;
        stream.write_all(line_subscribe_tally().as_bytes()).await?;

        let state = Arc::new(RwLock::new(VmixState::default()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let _ = events.send(SwitcherEvent::Connected);

        let task = VmixTask {
            stream,
            state: state.clone(),
            events: events.clone(),
            cmd_rx,
            connected: connected.clone(),
            accum: Vec::new(),
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

    /// vMix is treated as initialized once `SUBSCRIBE TALLY` is accepted.
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.subscribed
    }

    pub async fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                if self.state.read().await.subscribed {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| Error::Timeout("vMix subscribe"))
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

    /// Raw per-channel tally, including channels beyond the packed tally's
    /// 20-channel window.
    pub async fn raw_tally_at(&self, index: usize) -> Option<TallyValue> {
        self.state.read().await.raw_tally_at(index)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.events.subscribe()
    }

    async fn send_line(&self, line: String) -> Result<()> {
        self.cmd_tx
            .send(Command::Line(line))
            .await
            .map_err(|_| Error::Disconnected)
    }

    pub async fn cut(&self) -> Result<()> {
        self.send_line(line_cut()).await
    }

    pub async fn fade(&self) -> Result<()> {
        self.send_line(line_fade()).await
    }

    pub async fn set_preview(&self, input: u32) -> Result<()> {
        self.send_line(line_set_preview(input)).await
    }

    pub async fn set_program(&self, input: u32) -> Result<()> {
        self.send_line(line_set_program(input)).await
    }

    pub async fn quick_play(&self, input: u32) -> Result<()> {
        self.send_line(line_quick_play(input)).await
    }

    pub async fn overlay_in(&self, overlay: u8, input: u32) -> Result<()> {
        self.send_line(line_overlay_in(overlay, input)).await
    }

    pub async fn overlay_out(&self, overlay: u8) -> Result<()> {
        self.send_line(line_overlay_out(overlay)).await
    }

    pub async fn function(&self, name: &str, params: Option<&str>) -> Result<()> {
        self.send_line(line_function(name, params)).await
    }
}

struct VmixTask {
    stream: TcpStream,
    state: Arc<RwLock<VmixState>>,
    events: broadcast::Sender<SwitcherEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    connected: Arc<AtomicBool>,
    accum: Vec<u8>,
    last_contact: Instant,
    last_tally: u64,
}

impl VmixTask {
    async fn run(mut self) {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;
        let mut buf = [0u8; 4096];

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if self.last_contact.elapsed() > SILENCE_TIMEOUT {
                        warn!("vMix session silent too long, disconnecting");
                        self.connected.store(false, Ordering::SeqCst);
                        let _ = self.events.send(SwitcherEvent::Disconnected);
                        return;
                    }
                    if let Err(e) = self.stream.write_all(line_tally_poll().as_bytes()).await {
                        warn!(?e, "vMix keepalive send failed");
                    }
                }
                Some(Command::Line(line)) = self.cmd_rx.recv() => {
                    if let Err(e) = self.stream.write_all(line.as_bytes()).await {
                        warn!(?e, "vMix command send failed");
                    }
                }
                read = self.stream.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            info!("vMix connection closed by peer");
                            self.connected.store(false, Ordering::SeqCst);
                            let _ = self.events.send(SwitcherEvent::Disconnected);
                            return;
                        }
                        Ok(n) => {
                            self.last_contact = Instant::now();
                            self.accum.extend_from_slice(&buf[..n]);
                            self.dispatch_lines().await;
                        }
                        Err(e) => {
                            warn!(?e, "vMix socket error, disconnecting");
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

    async fn dispatch_lines(&mut self) {
        let lines = drain_lines(&mut self.accum);
        for line in lines {
            match parse_line(&line) {
                VmixLine::SubscribeOkTally => {
                    self.state.write().await.subscribed = true;
                    info!("vMix TALLY subscription confirmed");
                }
                VmixLine::TallyOk(digits) => {
                    let packed = {
                        let mut state = self.state.write().await;
                        state.apply_tally_digits(&digits);
                        state.tally_packed
                    };
                    if packed != self.last_tally {
                        self.last_tally = packed;
                        let _ = self.events.send(SwitcherEvent::TallyChanged(packed));
                    }
                }
                VmixLine::Other(other) => {
                    tracing::trace!(%other, "unrecognized vMix response");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    /// vMix mid-line split: a `SUBSCRIBE OK TALLY\r\nTALLY OK 01200\r\n`
    /// response delivered across two writes produces exactly one
    /// `TallyChanged` event with the expected program/preview indices.
    #[tokio::test]
    async fn mid_line_split_produces_one_tally_event() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(&mut sock);
            let mut subscribe_line = String::new();
            reader.read_line(&mut subscribe_line).await.unwrap();
            assert_eq!(subscribe_line, "SUBSCRIBE TALLY\r\n");

            let mut inner = reader.into_inner();
            inner.write_all(b"SUBSCRIBE OK TALLY\r\nTALLY O").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            inner.write_all(b"K 01200\r\n").await.unwrap();
            // keep the connection open long enough for the client to process
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let client = VmixClient::connect(addr, Duration::from_secs(1)).await.unwrap();
        let mut events = client.subscribe();
        client.wait_initialized(Duration::from_secs(1)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SwitcherEvent::TallyChanged(client.get_state().await.tally_packed));

        let state = client.get_state().await;
        assert_eq!(state.program_input, 2);
        assert_eq!(state.preview_input, 3);
        server.await.unwrap();
    }
}
