use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::core::builder::{Packet, Payload, MTU_WORDS};
use crate::core::config::TargetConfig;
use crate::core::error::Error;
use crate::core::header::{encode_packet_header, PacketType, TransactionType};
use crate::core::signal::{Signal, SignalBus};
use crate::core::transaction::{Destination, TransactionOutcome};
use crate::core::validator::validate;

/// Number of words in a status probe datagram: one header word
/// followed by fifteen zero words.
const STATUS_WORDS: usize = 16;
const STATUS_BYTES: usize = STATUS_WORDS * 4;
const MTU_BYTES: usize = MTU_WORDS * 4;

fn status_header() -> u32 {
    encode_packet_header(PacketType::Status, 0)
}

fn status_packet() -> [u32; STATUS_WORDS] {
    let mut words = [0u32; STATUS_WORDS];
    words[0] = status_header();
    words
}

fn words_to_le_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

fn le_word_at(bytes: &[u8], byte_offset: usize) -> u32 {
    LittleEndian::read_u32(&bytes[byte_offset..byte_offset + 4])
}

/// Connectivity state of one [`Target`], per §4.4 of the wire spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    Probing = 1,
    Online = 2,
    /// A local socket write failure or short write. The keepalive
    /// handler stops reacting until the next successful `reconnect`.
    Error = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Disconnected,
            1 => State::Probing,
            2 => State::Online,
            _ => State::Error,
        }
    }
}

/// A single IPbus target: a UDP endpoint plus the connectivity state
/// machine, mutex-guarded socket, and signal bus that make up the
/// exchange engine.
///
/// All I/O happens on the caller's task — `Target` never spawns a
/// worker of its own. The mutex around the socket serialises
/// concurrent callers into FIFO issue order; the keepalive handler
/// returned by [`Target::keepalive`] must be spawned (or awaited) by
/// the caller onto whichever task owns this target, so it never runs
/// concurrently with an in-flight `exchange`.
pub struct Target {
    config: TargetConfig,
    socket: Mutex<Option<UdpSocket>>,
    state: AtomicU8,
    signals: SignalBus,
}

impl Target {
    pub fn new(config: TargetConfig) -> Self {
        Target {
            config,
            socket: Mutex::new(None),
            state: AtomicU8::new(State::Disconnected as u8),
            signals: SignalBus::new(),
        }
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_online(&self) -> bool {
        self.state() == State::Online
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    fn set_state(&self, state: State) {
        trace!("target {} -> {:?}", self.config.ip_address, state);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn publish(&self, signal: Signal) {
        self.signals.publish(signal);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms as u64)
    }

    /// The address this target's socket is bound to, once connected.
    pub async fn local_addr(&self) -> Result<SocketAddr, Error> {
        let guard = self.socket.lock().await;
        let socket = guard.as_ref().ok_or_else(|| Error::network("socket not bound"))?;
        Ok(socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.ip_address, self.config.port)
    }

    /// Binds a local UDP socket, connects it to the remote target, and
    /// sends an initial status probe. Re-arms the keepalive (by moving
    /// the target out of `Error`/`Disconnected`) on success.
    pub async fn reconnect(&self) -> Result<(), Error> {
        self.set_state(State::Probing);

        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.local_port);
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.remote_addr()).await?;
        debug!(
            "bound {} -> connected to {}",
            socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            self.remote_addr()
        );

        *self.socket.lock().await = Some(socket);
        self.send_status().await
    }

    /// Sends a 64-byte status probe and waits for the target to echo
    /// its header back. On success the target becomes `Online`; on
    /// timeout or a malformed reply it becomes `Disconnected`.
    pub async fn send_status(&self) -> Result<(), Error> {
        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or_else(|| Error::network("socket not bound"))?;

        let request = words_to_le_bytes(&status_packet());
        let written = match socket.send(&request).await {
            Ok(n) => n,
            Err(err) => {
                drop(guard);
                self.enter_error(&err.to_string());
                return Err(Error::from(err));
            }
        };
        if written != request.len() {
            drop(guard);
            self.enter_error("short write to target");
            return Err(Error::network("short write to target"));
        }

        let mut buf = [0u8; STATUS_BYTES];
        let outcome = tokio::time::timeout(self.timeout(), socket.recv(&mut buf)).await;
        drop(guard);

        match outcome {
            Ok(Ok(n)) if n == STATUS_BYTES && le_word_at(&buf, 0) == status_header() => {
                self.set_state(State::Online);
                self.publish(Signal::StatusOk);
                Ok(())
            }
            Ok(Ok(_)) => {
                self.set_state(State::Disconnected);
                self.publish(Signal::NoResponse {
                    message: "malformed status reply".into(),
                });
                Err(Error::network("malformed status reply"))
            }
            Ok(Err(err)) => {
                self.set_state(State::Disconnected);
                self.publish(Signal::NoResponse {
                    message: err.to_string(),
                });
                Err(Error::from(err))
            }
            Err(_) => {
                self.set_state(State::Disconnected);
                self.publish(Signal::NoResponse {
                    message: "no response to status probe".into(),
                });
                Err(Error::network("no response to status probe"))
            }
        }
    }

    /// Sends `packet`'s request and validates the reply. Guarded by
    /// the target's mutex so concurrent callers serialise cleanly.
    ///
    /// Returns `Ok(outcomes)` only once the full round trip succeeded
    /// *and* the response validated cleanly; on any error the packet
    /// is left populated for the caller to inspect — an explicit
    /// `reset()` is required before reuse (see `DESIGN.md`).
    pub async fn exchange(&self, packet: &mut Packet<'_>) -> Result<Vec<TransactionOutcome>, Error> {
        if !self.is_online() {
            return Err(Error::network("target is not online"));
        }
        if packet.request_len() <= 1 {
            return Ok(Vec::new());
        }

        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or_else(|| Error::network("socket not bound"))?;

        let request_bytes = words_to_le_bytes(packet.request_words());
        let written = match socket.send(&request_bytes).await {
            Ok(n) => n,
            Err(err) => {
                drop(guard);
                self.enter_error(&err.to_string());
                return Err(Error::from(err));
            }
        };
        if written != request_bytes.len() {
            drop(guard);
            self.enter_error("short write to target");
            return Err(Error::network("short write to target"));
        }

        let mut buf = [0u8; MTU_BYTES];
        let word_count = loop {
            let received = match tokio::time::timeout(self.timeout(), socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(err)) => {
                    drop(guard);
                    self.set_state(State::Disconnected);
                    return Err(Error::from(err));
                }
                Err(_) => {
                    drop(guard);
                    self.set_state(State::Disconnected);
                    self.publish(Signal::NoResponse {
                        message: "no response to exchange".into(),
                    });
                    return Err(Error::network("no response within timeout"));
                }
            };

            if received == STATUS_BYTES && le_word_at(&buf, 0) == status_header() {
                trace!("discarding stale status reply from {}", self.remote_addr());
                continue;
            }

            if received == 0 || received % 4 != 0 {
                drop(guard);
                self.set_state(State::Disconnected);
                return Err(Error::network("malformed datagram size"));
            }

            let word_count = received / 4;
            if word_count > packet.response_capacity() {
                drop(guard);
                self.set_state(State::Disconnected);
                return Err(Error::network("response larger than reserved capacity"));
            }
            if le_word_at(&buf, 0) != packet.request_words()[0] {
                drop(guard);
                self.set_state(State::Disconnected);
                return Err(Error::network("response packet header does not match request"));
            }

            break word_count;
        };
        drop(guard);

        {
            let response = packet.response_buffer_mut();
            for i in 0..word_count {
                response[i] = le_word_at(&buf, i * 4);
            }
        }
        packet.set_response_len(word_count);

        let (outcomes, result) = validate(packet);
        for outcome in &outcomes {
            match outcome {
                TransactionOutcome::ReadSucceeded { words, .. } => {
                    self.publish(Signal::ReadSucceeded { words: *words })
                }
                TransactionOutcome::WriteSucceeded { words, .. } => {
                    self.publish(Signal::WriteSucceeded { words: *words })
                }
            }
        }

        match result {
            Ok(()) => {
                packet.reset();
                Ok(outcomes)
            }
            Err(err) => {
                warn!("exchange with {} failed validation: {err}", self.remote_addr());
                self.publish(Signal::Error {
                    message: err.message.clone(),
                    kind: err.kind,
                });
                Err(err)
            }
        }
    }

    fn enter_error(&self, message: &str) {
        warn!("target {} entering Error state: {message}", self.config.ip_address);
        self.set_state(State::Error);
        self.publish(Signal::Error {
            message: message.to_string(),
            kind: crate::core::error::ErrorKind::Network,
        });
    }

    /// Reads one word; returns `0xFFFFFFFF` on any failure rather than
    /// propagating an error, matching the convenience contract of §4.4.
    pub async fn read_register(&self, address: u32) -> u32 {
        let mut dest = [0u32; 1];
        let mut packet = Packet::new();
        let added = packet.add_transaction(
            TransactionType::Read,
            address,
            Payload::Read(Destination::Borrowed(&mut dest)),
        );
        if added.is_err() {
            return 0xFFFF_FFFF;
        }
        match self.exchange(&mut packet).await {
            Ok(_) => dest[0],
            Err(_) => 0xFFFF_FFFF,
        }
    }

    pub async fn write_register(&self, address: u32, value: u32) -> Result<(), Error> {
        let mut packet = Packet::new();
        packet.add_word_write(address, value)?;
        self.exchange(&mut packet).await.map(|_| ())
    }

    pub async fn set_bit(&self, n: u32, address: u32) -> Result<(), Error> {
        let mut packet = Packet::new();
        packet.add_bit_change(address, 1, 1, n)?;
        self.exchange(&mut packet).await.map(|_| ())
    }

    pub async fn clear_bit(&self, n: u32, address: u32) -> Result<(), Error> {
        let mut packet = Packet::new();
        packet.add_bit_change(address, 0, 1, n)?;
        self.exchange(&mut packet).await.map(|_| ())
    }

    pub async fn write_nbits(&self, address: u32, data: u32, nbits: u32, shift: u32) -> Result<(), Error> {
        let mut packet = Packet::new();
        packet.add_bit_change(address, data, nbits, shift)?;
        self.exchange(&mut packet).await.map(|_| ())
    }

    /// Drives the periodic keepalive: every `update_period_ms`, either
    /// invokes `sync` (when `Online`, typically refreshing a caller's
    /// register cache) or re-probes with `send_status`. Never
    /// returns; the caller spawns this onto the task that owns this
    /// target, per §5's requirement that the handler not run on an
    /// arbitrary I/O task.
    pub async fn keepalive(self: Arc<Self>, sync: impl Fn() + Send + Sync + 'static) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.update_period_ms as u64));
        loop {
            ticker.tick().await;
            if self.state() == State::Error {
                continue;
            }
            if self.is_online() {
                sync();
            } else {
                let _ = self.send_status().await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::header::encode_transaction_header;
    use tokio::net::UdpSocket as TokioUdpSocket;

    async fn target_against_loopback_echo() -> (Arc<Target>, TokioUdpSocket) {
        let _ = env_logger::try_init();

        let remote = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let mut config = TargetConfig::default();
        config.ip_address = remote_addr.ip();
        config.port = remote_addr.port();
        config.timeout_ms = 200;

        let target = Arc::new(Target::new(config));
        (target, remote)
    }

    #[tokio::test]
    async fn reconnect_transitions_to_online_on_status_reply() {
        let (target, remote) = target_against_loopback_echo().await;

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; STATUS_BYTES];
            let (n, peer) = remote.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, STATUS_BYTES);
            remote.send_to(&buf[..n], peer).await.unwrap();
        });

        target.reconnect().await.unwrap();
        responder.await.unwrap();
        assert_eq!(target.state(), State::Online);
    }

    #[tokio::test]
    async fn exchange_without_reconnect_fails_fast() {
        let config = TargetConfig::default();
        let target = Target::new(config);
        let mut packet = Packet::new();
        packet.add_word_write(0x10, 1).unwrap();
        let err = target.exchange(&mut packet).await.unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Network);
    }

    #[tokio::test]
    async fn exchange_discards_stale_status_reply_then_completes() {
        let (target, remote) = target_against_loopback_echo().await;

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; MTU_BYTES];
            let (n, peer) = remote.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, STATUS_BYTES);
            remote.send_to(&buf[..n], peer).await.unwrap();

            let (_n, peer) = remote.recv_from(&mut buf).await.unwrap();
            let header = le_word_at(&buf, 0);
            let mut reply = vec![0u8; 8];
            reply[0..4].copy_from_slice(&header.to_le_bytes());
            let txn_header = encode_transaction_header(TransactionType::Write, 1, 0);
            reply[4..8].copy_from_slice(&txn_header.to_le_bytes());

            // Send a stale status reply first, then the real control reply.
            let status = words_to_le_bytes(&status_packet());
            remote.send_to(&status, peer).await.unwrap();
            remote.send_to(&reply, peer).await.unwrap();
        });

        target.reconnect().await.unwrap();

        let mut packet = Packet::new();
        packet.add_word_write(0x10, 1).unwrap();
        let outcomes = target.exchange(&mut packet).await.unwrap();
        assert_eq!(outcomes, vec![TransactionOutcome::WriteSucceeded { index: 0, words: 1 }]);

        responder.await.unwrap();
    }
}
