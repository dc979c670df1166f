use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use futures::{future::FutureExt, select_biased, sink::SinkExt, stream::StreamExt};

use futures_timer::Delay;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, Serial, SerialPortSettings, StopBits};
use tokio_util::codec::Framed;

use crate::constants::*;
use crate::error::*;
use crate::frame::*;

/// The read timeout used by [RelayCard::discover] when none was set. 300 milliseconds.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(300);

/// Converts a user supplied read timeout in seconds. Only positive,
/// finite values are accepted.
pub fn timeout_from_secs(secs: f64) -> Result<Duration, Error> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::InvalidTimeout)
    }
}

/// A card that answered chain discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controller {
    /// The address the card assigned itself during setup.
    pub address: u8,
    /// The firmware version reported by the card.
    pub firmware_version: u8,
}

/// A [RelayCard] is a connection to a chain of relay cards. Exactly one
/// request is outstanding at a time; every command is tried once.
pub struct RelayCard<T> {
    framed: Framed<T, FrameCodec>,
    timeout: Option<Duration>,
}

impl RelayCard<Serial> {
    /// Opens the serial port the card chain is attached to, at 19200 baud 8N1.
    ///
    /// # Arguments
    /// * `path` - The path to a serial port, e.g. /dev/ttyUSB0.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        debug!("Opening relay card at {}", path.as_ref().display());

        let settings = SerialPortSettings {
            baud_rate: BAUD_RATE,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(100),
        };

        let port = Serial::from_path(path.as_ref(), &settings)?;
        Ok(Self::new(port))
    }
}

impl<T> RelayCard<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Constructs a new `RelayCard` from an arbitrary I/O handle
    ///
    /// # Arguments
    /// * `handle` - An async readable, writable connection to the chain
    pub fn new(handle: T) -> Self {
        Self {
            framed: Framed::new(handle, FrameCodec::new()),
            timeout: None,
        }
    }

    /// The current read timeout. `None` waits forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    async fn send(&mut self, request: Request) -> Result<(), Error> {
        debug!("Sending Request {:?}", request);
        self.framed.send(request).await
    }

    // Waits for one response. Running out of time or input is reported
    // as `Error::Length` with the number of bytes that did arrive.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Response, Error> {
        let received = {
            let mut next = self.framed.next().fuse();
            match timeout {
                Some(duration) => {
                    let mut delay = Delay::new(duration).fuse();
                    select_biased! {
                        r = next => Some(r),
                        _ = delay => None,
                    }
                }
                None => Some(next.await),
            }
        };

        match received {
            Some(Some(response)) => {
                debug!("Received Response {:?}", response);
                response
            }
            Some(None) => {
                debug!("Connection closed while waiting for a response");
                Err(Error::Length(self.framed.codec().pending()))
            }
            None => {
                debug!("No response within {:?}", timeout);
                Err(Error::Length(self.framed.codec().pending()))
            }
        }
    }

    async fn transact(&mut self, request: Request) -> Result<Response, Error> {
        self.send(request).await?;
        let response = self.receive(self.timeout).await?;

        if response.acknowledges(request.command) {
            Ok(response)
        } else {
            Err(Error::CommandFailed {
                command: request.command,
                code: response.code.into(),
            })
        }
    }

    /// Initializes the chain and collects the announcement of every card
    /// on it. The chain is considered complete once no response arrives
    /// within the read timeout, or [DEFAULT_DISCOVERY_TIMEOUT] if none
    /// was set. An empty chain is not an error.
    pub async fn discover(&mut self) -> Result<Vec<Controller>, Error> {
        self.discover_with(|_| ()).await
    }

    /// Like [RelayCard::discover], but hands every announcement to
    /// `on_announce` as soon as it arrives, so cards that answered before
    /// an ERROR are still reported.
    pub async fn discover_with(
        &mut self,
        mut on_announce: impl FnMut(&Controller),
    ) -> Result<Vec<Controller>, Error> {
        let timeout = self.timeout.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT);
        let mut controllers = Vec::new();

        self.send(Request::new(Command::Setup, SETUP_ADDRESS, 0))
            .await?;

        loop {
            let response = match self.receive(Some(timeout)).await {
                Ok(response) => response,
                // Nobody else is talking, the chain is done
                Err(Error::Length(_)) => break,
                Err(e) => return Err(e),
            };

            match response.code {
                ResponseCode::Announce => {
                    info!(
                        "Controller {}: Firmware version {}",
                        response.address, response.data
                    );
                    let controller = Controller {
                        address: response.address,
                        firmware_version: response.data,
                    };
                    on_announce(&controller);
                    controllers.push(controller);
                }
                ResponseCode::Error => {
                    warn!("Controller {} failed setup", response.address);
                    return Err(Error::CommandFailed {
                        command: Command::Setup,
                        code: ERROR,
                    });
                }
                code => debug!("Ignoring {:?} from {}", code, response.address),
            }
        }

        Ok(controllers)
    }

    /// Switches on one relay of the card at `address`.
    pub async fn set_relay(&mut self, address: u8, relay: Relay) -> Result<(), Error> {
        self.transact(Request::new(Command::SetSingle, address, relay.bit()))
            .await?;
        Ok(())
    }

    /// Switches off one relay of the card at `address`.
    pub async fn clear_relay(&mut self, address: u8, relay: Relay) -> Result<(), Error> {
        self.transact(Request::new(Command::DelSingle, address, relay.bit()))
            .await?;
        Ok(())
    }

    /// Toggles one relay of the card at `address`.
    pub async fn toggle_relay(&mut self, address: u8, relay: Relay) -> Result<(), Error> {
        self.transact(Request::new(Command::Toggle, address, relay.bit()))
            .await?;
        Ok(())
    }

    /// Reads the state of all eight relays of the card at `address`.
    pub async fn get_port(&mut self, address: u8) -> Result<Relays, Error> {
        let response = self
            .transact(Request::new(Command::GetPort, address, 0))
            .await?;
        Ok(Relays::from_bits_truncate(response.data))
    }

    /// Sets all eight relays of the card at `address` at once.
    pub async fn set_port(&mut self, address: u8, port: Relays) -> Result<(), Error> {
        self.transact(Request::new(Command::SetPort, address, port.bits()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;
    use std::{
        collections::VecDeque,
        env,
        pin::Pin,
        str::FromStr,
        sync::{Arc, Mutex},
        task::{Context, Poll},
    };

    const CARD_ENV_VAR: &str = "RELAY_TTY";

    lazy_static! {
        static ref CARD_PATH: Option<String> = {
            let _ = pretty_env_logger::try_init();
            env::var(CARD_ENV_VAR).ok()
        };
    }

    macro_rules! assume_card {
        () => {
            match CARD_PATH.as_ref() {
                Some(path) => path.clone(),
                None => return (),
            }
        };
    }

    /// Plays back canned bytes a few at a time, then goes quiet (or hits
    /// end of stream) so the read timeout can fire.
    struct Script {
        input: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
        chunk: usize,
        eof: bool,
    }

    impl AsyncRead for Script {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            let mut input = self.input.lock().unwrap();
            if input.is_empty() {
                return if self.eof {
                    Poll::Ready(Ok(0))
                } else {
                    Poll::Pending
                };
            }

            let n = buf.len().min(self.chunk).min(input.len());
            for b in buf.iter_mut().take(n) {
                *b = input.pop_front().unwrap();
            }
            Poll::Ready(Ok(n))
        }
    }

    impl AsyncWrite for Script {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Harness {
        card: RelayCard<Script>,
        input: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Harness {
        fn new(responses: &[Frame]) -> Self {
            let bytes = responses.iter().flat_map(|f| f.to_array().to_vec()).collect();
            Self::with_bytes(bytes, false)
        }

        fn with_bytes(bytes: VecDeque<u8>, eof: bool) -> Self {
            let input = Arc::new(Mutex::new(bytes));
            let written = Arc::new(Mutex::new(Vec::new()));
            let script = Script {
                input: input.clone(),
                written: written.clone(),
                chunk: FRAME_LEN,
                eof,
            };
            let mut card = RelayCard::new(script);
            card.set_timeout(Some(Duration::from_millis(50)));

            Harness {
                card,
                input,
                written,
            }
        }

        fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        fn unread(&self) -> usize {
            self.input.lock().unwrap().len()
        }
    }

    fn relay(n: u8) -> Relay {
        Relay::new(n).unwrap()
    }

    #[async_std::test]
    async fn set_relay() {
        let mut h = Harness::new(&[Frame::new(249, 5, 1)]);
        assert_eq!(h.card.set_relay(5, relay(1)).await, Ok(()));
        assert_eq!(h.written(), vec![0x06, 5, 1, 0x06 ^ 5 ^ 1]);
    }

    #[async_std::test]
    async fn set_relay_rejected() {
        let mut h = Harness::new(&[Frame::new(255, 5, 0)]);
        assert_eq!(
            h.card.set_relay(5, relay(1)).await,
            Err(Error::CommandFailed {
                command: Command::SetSingle,
                code: 255
            })
        );
    }

    #[async_std::test]
    async fn clear_relay() {
        let mut h = Harness::new(&[Frame::new(248, 2, 0x80)]);
        assert_eq!(h.card.clear_relay(2, relay(8)).await, Ok(()));
        assert_eq!(h.written(), vec![0x07, 2, 0x80, 0x07 ^ 2 ^ 0x80]);
    }

    #[async_std::test]
    async fn toggle_relay() {
        let mut h = Harness::new(&[Frame::new(247, 0, 4)]);
        assert_eq!(h.card.toggle_relay(BROADCAST, relay(3)).await, Ok(()));
        assert_eq!(h.written(), vec![0x08, 0, 4, 0x08 ^ 4]);
    }

    #[async_std::test]
    async fn toggle_wrong_code() {
        // The set reply is not good enough for a toggle
        let mut h = Harness::new(&[Frame::new(249, 1, 1)]);
        assert_eq!(
            h.card.toggle_relay(1, relay(1)).await,
            Err(Error::CommandFailed {
                command: Command::Toggle,
                code: 249
            })
        );
    }

    #[async_std::test]
    async fn get_port() {
        let mut h = Harness::new(&[Frame::new(253, 4, 0b0000_0101)]);
        let port = h.card.get_port(4).await.unwrap();
        assert_eq!(h.written(), vec![0x02, 4, 0, 0x02 ^ 4]);

        for r in Relay::all() {
            assert_eq!(
                port.contains_relay(r),
                r.number() == 1 || r.number() == 3,
                "relay {}",
                r
            );
        }
    }

    #[async_std::test]
    async fn set_port() {
        let mut h = Harness::new(&[Frame::new(252, 1, 0)]);
        let port = Relays::from_str("0xa5").unwrap();
        assert_eq!(h.card.set_port(1, port).await, Ok(()));
        assert_eq!(h.written(), vec![0x03, 1, 0xa5, 0x03 ^ 1 ^ 0xa5]);
    }

    #[async_std::test]
    async fn no_response() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.card.set_relay(1, relay(1)).await, Err(Error::Length(0)));
    }

    #[async_std::test]
    async fn partial_response() {
        let mut h = Harness::with_bytes(vec![249u8, 1].into(), false);
        assert_eq!(h.card.set_relay(1, relay(1)).await, Err(Error::Length(2)));
    }

    #[async_std::test]
    async fn disconnected() {
        let mut h = Harness::with_bytes(VecDeque::new(), true);
        h.card.set_timeout(None);
        assert_eq!(h.card.get_port(1).await, Err(Error::Length(0)));
    }

    #[async_std::test]
    async fn corrupted_response() {
        let mut h = Harness::with_bytes(vec![249u8, 1, 1, 0].into(), false);
        assert_eq!(
            h.card.set_relay(1, relay(1)).await,
            Err(Error::Checksum {
                expected: 249 ^ 1 ^ 1,
                actual: 0
            })
        );
    }

    #[async_std::test]
    async fn discover_chain() {
        let mut h = Harness::new(&[Frame::new(254, 1, 3), Frame::new(254, 2, 7)]);
        h.card.set_timeout(None);
        let controllers = h.card.discover().await.unwrap();

        assert_eq!(h.written(), vec![0x01, 1, 0, 0x01 ^ 1]);
        assert_eq!(
            controllers,
            vec![
                Controller {
                    address: 1,
                    firmware_version: 3
                },
                Controller {
                    address: 2,
                    firmware_version: 7
                },
            ]
        );
        assert_eq!(h.card.timeout(), None);
    }

    #[async_std::test]
    async fn discover_empty_chain() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.card.discover().await, Ok(vec![]));
    }

    #[async_std::test]
    async fn discover_stops_on_error() {
        let mut h = Harness::new(&[
            Frame::new(254, 1, 3),
            Frame::new(255, 2, 0),
            Frame::new(254, 3, 3),
        ]);
        assert_eq!(
            h.card.discover().await,
            Err(Error::CommandFailed {
                command: Command::Setup,
                code: 255
            })
        );
        assert_eq!(h.unread(), FRAME_LEN);
    }

    #[async_std::test]
    async fn discover_reports_before_error() {
        let mut h = Harness::new(&[Frame::new(254, 1, 3), Frame::new(255, 2, 0)]);
        let mut announced = Vec::new();
        let result = h.card.discover_with(|c| announced.push(*c)).await;

        assert_eq!(
            result,
            Err(Error::CommandFailed {
                command: Command::Setup,
                code: 255
            })
        );
        assert_eq!(
            announced,
            vec![Controller {
                address: 1,
                firmware_version: 3
            }]
        );
    }

    #[async_std::test]
    async fn discover_reports_in_order() {
        let mut h = Harness::new(&[Frame::new(254, 1, 3), Frame::new(254, 2, 7)]);
        let mut announced = Vec::new();
        let controllers = h
            .card
            .discover_with(|c| announced.push(c.address))
            .await
            .unwrap();

        assert_eq!(announced, vec![1, 2]);
        assert_eq!(controllers.len(), 2);
    }

    #[async_std::test]
    async fn discover_skips_unknown_codes() {
        let mut h = Harness::new(&[Frame::new(42, 1, 0), Frame::new(254, 1, 9)]);
        assert_eq!(
            h.card.discover().await,
            Ok(vec![Controller {
                address: 1,
                firmware_version: 9
            }])
        );
    }

    #[async_std::test]
    async fn discover_bad_checksum() {
        let mut h = Harness::with_bytes(vec![254u8, 1, 3, 0].into(), false);
        assert_eq!(
            h.card.discover().await,
            Err(Error::Checksum {
                expected: 254 ^ 1 ^ 3,
                actual: 0
            })
        );
    }

    #[test]
    fn timeout_values() {
        assert_eq!(timeout_from_secs(0.3), Ok(Duration::from_millis(300)));
        assert_eq!(timeout_from_secs(2.0), Ok(Duration::from_secs(2)));
        assert_eq!(timeout_from_secs(0.0), Err(Error::InvalidTimeout));
        assert_eq!(timeout_from_secs(-1.0), Err(Error::InvalidTimeout));
        assert_eq!(timeout_from_secs(f64::INFINITY), Err(Error::InvalidTimeout));
        assert_eq!(timeout_from_secs(f64::NAN), Err(Error::InvalidTimeout));
    }

    #[tokio::test]
    async fn discover_hardware() {
        let path = assume_card!();

        let mut card = RelayCard::from_path(path).unwrap();
        let controllers = card.discover().await.unwrap();
        assert!(!controllers.is_empty());
    }

    #[tokio::test]
    async fn bad_path() {
        assert!(RelayCard::from_path("/this/does/not/exist").is_err());
    }
}
