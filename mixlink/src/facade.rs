//! `Switcher`: the single polymorphic handle that unifies ATEM, vMix and
//! OBS behind one vocabulary of operations.
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use mixlink_protocol::{tally_get, tally_unpack, TallyValue};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::debug;

use crate::atem::AtemClient;
use crate::error::{Error, Result};
use crate::obs::ObsClient;
use crate::types::{SwitcherEvent, SwitcherInfo, SwitcherState, SwitcherType};
use crate::vmix::VmixClient;

enum Backend {
    Atem(AtemClient),
    Vmix(VmixClient),
    Obs(ObsClient),
}

/// A single handle over one of the three backends. Mirrors the C-style
/// `create()`/`connect()` split: constructing a handle only validates and
/// stores configuration, `connect()` performs the network handshake.
pub struct Switcher {
    switcher_type: SwitcherType,
    host: String,
    port: u16,
    password: Option<String>,
    backend: RwLock<Option<Backend>>,
    camera_limit: AtomicU8,
    camera_offset: AtomicU8,
    debug: AtomicBool,
}

impl Switcher {
    /// Validates construction parameters; `port == 0` requests the
    /// backend's default. Fails with `NotSupported` for the reserved
    /// `Osee` tag and `InvalidParam` for an empty host.
    pub fn create(
        switcher_type: SwitcherType,
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
    ) -> Result<Self> {
        if switcher_type == SwitcherType::Osee {
            return Err(Error::NotSupported("OSEE switcher backend"));
        }
        let host = host.into();
        if host.is_empty() {
            return Err(Error::InvalidParam("empty host"));
        }
        let port = if port == 0 { switcher_type.default_port() } else { port };

        Ok(Self {
            switcher_type,
            host,
            port,
            password,
            backend: RwLock::new(None),
            camera_limit: AtomicU8::new(0),
            camera_offset: AtomicU8::new(0),
            debug: AtomicBool::new(false),
        })
    }

    pub fn get_type(&self) -> SwitcherType {
        self.switcher_type
    }

    async fn resolve_addr(&self) -> Result<SocketAddrV4> {
        let target = format!("{}:{}", self.host, self.port);
        let mut addrs = tokio::net::lookup_host(&target).await?;
        addrs
            .find_map(|a| match a {
                std::net::SocketAddr::V4(v4) => Some(v4),
                _ => None,
            })
            .ok_or(Error::InvalidParam("host did not resolve to an IPv4 address"))
    }

    /// Performs the backend-specific handshake and replaces any existing
    /// connection on this handle.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let addr = self.resolve_addr().await?;
        if self.debug.load(Ordering::Relaxed) {
            debug!(?addr, backend = ?self.switcher_type, "connecting");
        }

        let backend = match self.switcher_type {
            SwitcherType::Atem => Backend::Atem(AtemClient::connect(addr, timeout).await?),
            SwitcherType::Vmix => Backend::Vmix(VmixClient::connect(addr, timeout).await?),
            SwitcherType::Obs => Backend::Obs(
                ObsClient::connect(addr, "/", self.password.as_deref(), timeout).await?,
            ),
            SwitcherType::Osee => return Err(Error::NotSupported("OSEE switcher backend")),
        };

        *self.backend.write().await = Some(backend);
        Ok(())
    }

    pub fn disconnect(&self) {
        if let Ok(guard) = self.backend.try_read() {
            match guard.as_ref() {
                Some(Backend::Atem(c)) => c.disconnect(),
                Some(Backend::Vmix(c)) => c.disconnect(),
                Some(Backend::Obs(c)) => c.disconnect(),
                None => {}
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.is_connected(),
            Some(Backend::Vmix(c)) => c.is_connected(),
            Some(Backend::Obs(c)) => c.is_connected(),
            None => false,
        }
    }

    pub async fn is_initialized(&self) -> bool {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.is_initialized().await,
            Some(Backend::Vmix(c)) => c.is_initialized().await,
            Some(Backend::Obs(c)) => c.is_initialized().await,
            None => false,
        }
    }

    /// Polls `is_initialized()` until it returns `true` or `timeout`
    /// elapses. Works uniformly across backends, including OBS, which is
    /// already initialized by the time `connect()` returns.
    pub async fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                if self.is_initialized().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| Error::Timeout("switcher initialization"))
    }

    pub async fn get_info(&self) -> Result<SwitcherInfo> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => Ok(c.get_info().await),
            Some(Backend::Vmix(c)) => Ok(c.get_info().await),
            Some(Backend::Obs(c)) => Ok(c.get_info().await),
            None => Err(Error::Disconnected),
        }
    }

    pub async fn get_state(&self) -> Result<SwitcherState> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => Ok(c.get_state().await),
            Some(Backend::Vmix(c)) => Ok(c.get_state().await),
            Some(Backend::Obs(c)) => Ok(c.get_state().await),
            None => Err(Error::Disconnected),
        }
    }

    pub async fn get_program(&self) -> Result<u16> {
        Ok(self.get_state().await?.program_input)
    }

    pub async fn get_preview(&self) -> Result<u16> {
        Ok(self.get_state().await?.preview_input)
    }

    pub async fn get_tally_packed(&self) -> Result<u64> {
        Ok(self.get_state().await?.tally_packed)
    }

    /// Reads channel `index`'s tally state. `index` is an internal
    /// switcher-channel index, never offset by `camera_offset` (the offset
    /// only applies to the outward-facing numbers [`Switcher::tally_unpack`]
    /// emits). For vMix, indices beyond the packed tally's 20-channel window
    /// fall back to the backend's raw per-channel tally.
    pub async fn get_tally_by_index(&self, index: u8) -> Result<TallyValue> {
        if index as usize >= mixlink_protocol::MAX_CHANNELS as usize {
            if let Some(Backend::Vmix(c)) = self.backend.read().await.as_ref() {
                return Ok(c.raw_tally_at(index as usize).await.unwrap_or(TallyValue::Off));
            }
        }
        Ok(tally_get(self.get_tally_packed().await?, index))
    }

    /// Splits the packed tally into program/preview channel lists, adding
    /// `get_camera_offset()` to each outward-facing 1-based channel number.
    pub async fn tally_unpack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let packed = self.get_tally_packed().await?;
        let limit = self.get_effective_camera_count().await?;
        let offset = self.camera_offset.load(Ordering::Relaxed);
        let (program, preview) = tally_unpack(packed, limit);
        let apply_offset = |channels: Vec<u8>| {
            channels.into_iter().map(|n| n.saturating_add(offset)).collect()
        };
        Ok((apply_offset(program), apply_offset(preview)))
    }

    pub async fn cut(&self) -> Result<()> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.cut(0).await,
            Some(Backend::Vmix(c)) => c.cut().await,
            Some(Backend::Obs(c)) => {
                if c.studio_mode().await {
                    match c.preview_scene_name().await {
                        Some(name) => c.set_program_scene(&name).await,
                        None => Ok(()),
                    }
                } else {
                    Ok(())
                }
            }
            None => Err(Error::Disconnected),
        }
    }

    pub async fn auto(&self) -> Result<()> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.auto(0).await,
            Some(Backend::Vmix(c)) => c.fade().await,
            Some(Backend::Obs(c)) => {
                if c.studio_mode().await {
                    c.trigger_studio_mode_transition().await
                } else {
                    Err(Error::InvalidParam("auto() requires OBS studio mode"))
                }
            }
            None => Err(Error::Disconnected),
        }
    }

    /// `input` is 1-based for every backend. ATEM addresses the numeric
    /// source id directly; vMix addresses the channel number directly;
    /// OBS subtracts 1 to index its 0-based scene table.
    pub async fn set_program(&self, input: u16) -> Result<()> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.set_program(0, input).await,
            Some(Backend::Vmix(c)) => c.set_program(input as u32).await,
            Some(Backend::Obs(c)) => {
                let name = self.obs_scene_name(c, input).await?;
                c.set_program_scene(&name).await
            }
            None => Err(Error::Disconnected),
        }
    }

    pub async fn set_preview(&self, input: u16) -> Result<()> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => c.set_preview(0, input).await,
            Some(Backend::Vmix(c)) => c.set_preview(input as u32).await,
            Some(Backend::Obs(c)) => {
                let name = self.obs_scene_name(c, input).await?;
                c.set_preview_scene(&name).await
            }
            None => Err(Error::Disconnected),
        }
    }

    async fn obs_scene_name(&self, client: &ObsClient, input: u16) -> Result<String> {
        let index = (input as usize)
            .checked_sub(1)
            .ok_or(Error::InvalidParam("scene index must be >= 1"))?;
        client
            .scene_name_at(index)
            .await
            .ok_or(Error::InvalidParam("scene index out of range"))
    }

    pub fn set_camera_limit(&self, limit: u8) {
        self.camera_limit.store(limit, Ordering::Relaxed);
    }

    pub fn set_camera_offset(&self, offset: u8) {
        self.camera_offset.store(offset, Ordering::Relaxed);
    }

    pub fn get_camera_limit(&self) -> u8 {
        self.camera_limit.load(Ordering::Relaxed)
    }

    pub fn get_camera_offset(&self) -> u8 {
        self.camera_offset.load(Ordering::Relaxed)
    }

    pub async fn get_effective_camera_count(&self) -> Result<u8> {
        let num_cameras = self.get_info().await?.num_cameras;
        let user_limit = self.camera_limit.load(Ordering::Relaxed);
        Ok(mixlink_protocol::effective_camera_limit(user_limit, num_cameras))
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SwitcherEvent>> {
        match self.backend.read().await.as_ref() {
            Some(Backend::Atem(c)) => Ok(c.subscribe()),
            Some(Backend::Vmix(c)) => Ok(c.subscribe()),
            Some(Backend::Obs(c)) => Ok(c.subscribe()),
            None => Err(Error::Disconnected),
        }
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// A `Stream` view of [`Switcher::subscribe`], for callers that drive
    /// events through combinators instead of a bare `broadcast::Receiver`.
    pub async fn subscribe_stream(
        &self,
    ) -> Result<BroadcastStream<SwitcherEvent>> {
        Ok(BroadcastStream::new(self.subscribe().await?))
    }
}

pub type SwitcherEventStreamError = BroadcastStreamRecvError;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_rejects_empty_host() {
        let err = Switcher::create(SwitcherType::Obs, "", 0, None).unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }

    #[test]
    fn create_rejects_osee() {
        let err = Switcher::create(SwitcherType::Osee, "host", 0, None).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn create_resolves_default_port() {
        let switcher = Switcher::create(SwitcherType::Vmix, "localhost", 0, None).unwrap();
        assert_eq!(switcher.port, 8099);
    }

    #[test]
    fn create_honors_explicit_port() {
        let switcher = Switcher::create(SwitcherType::Atem, "localhost", 1234, None).unwrap();
        assert_eq!(switcher.port, 1234);
    }

    #[tokio::test]
    async fn operations_fail_with_disconnected_before_connect() {
        let switcher = Switcher::create(SwitcherType::Atem, "localhost", 0, None).unwrap();
        assert!(matches!(switcher.get_state().await, Err(Error::Disconnected)));
        assert!(!switcher.is_connected().await);
    }

    /// `camera_offset` shifts the 1-based channel numbers `tally_unpack`
    /// emits outward but must never shift the raw index `get_tally_by_index`
    /// reads -- spec.md is explicit that the offset applies only outward.
    #[tokio::test]
    async fn camera_offset_shifts_tally_unpack_but_not_tally_by_index() {
        use std::net::Ipv4Addr;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

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
            let mut inner = reader.into_inner();
            inner.write_all(b"SUBSCRIBE OK TALLY\r\nTALLY OK 0120\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let switcher =
            Switcher::create(SwitcherType::Vmix, addr.ip().to_string(), addr.port(), None).unwrap();
        switcher.connect(Duration::from_secs(1)).await.unwrap();
        switcher.wait_initialized(Duration::from_secs(1)).await.unwrap();
        // wait for at least one tally line past the subscribe ack
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if switcher.get_tally_packed().await.unwrap() != 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        switcher.set_camera_offset(10);
        let (program, preview) = switcher.tally_unpack().await.unwrap();
        assert_eq!(program, vec![12]);
        assert_eq!(preview, vec![13]);

        // the raw index lookup is untouched by the offset
        assert_eq!(switcher.get_tally_by_index(1).await.unwrap(), TallyValue::Program);
        assert_eq!(switcher.get_tally_by_index(2).await.unwrap(), TallyValue::Preview);

        server.await.unwrap();
    }
}
