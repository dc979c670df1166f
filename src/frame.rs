use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use bitflags::bitflags;

use log::debug;

use nom::{do_parse, named, number::streaming::be_u8};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::*;
use crate::error::*;

/// A request opcode understood by the relay card.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    /// Initializes the chain. Every card answers with an announcement
    /// carrying its address and firmware version.
    Setup,
    /// Reads the port (all eight relays) of a card.
    GetPort,
    /// Writes the port (all eight relays) of a card.
    SetPort,
    /// Switches on the relays selected in the data byte.
    SetSingle,
    /// Switches off the relays selected in the data byte.
    DelSingle,
    /// Toggles the relays selected in the data byte.
    Toggle,
}

impl Command {
    /// The response code a card sends when this command succeeds.
    pub fn expected_response(self) -> ResponseCode {
        match self {
            Command::Setup => ResponseCode::Announce,
            Command::GetPort => ResponseCode::Port,
            Command::SetPort => ResponseCode::PortSet,
            Command::SetSingle => ResponseCode::Set,
            Command::DelSingle => ResponseCode::Cleared,
            Command::Toggle => ResponseCode::Toggled,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Setup => SETUP,
            Command::GetPort => GET_PORT,
            Command::SetPort => SET_PORT,
            Command::SetSingle => SET_SINGLE,
            Command::DelSingle => DEL_SINGLE,
            Command::Toggle => TOGGLE,
        }
    }
}

/// The first byte of a frame sent back by a card.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ResponseCode {
    /// Reply to [Command::Toggle].
    Toggled,
    /// Reply to [Command::DelSingle].
    Cleared,
    /// Reply to [Command::SetSingle].
    Set,
    /// Reply to [Command::SetPort].
    PortSet,
    /// Reply to [Command::GetPort]. The data byte holds the port.
    Port,
    /// Reply to [Command::Setup]. The data byte holds the firmware version.
    Announce,
    /// The card rejected the command.
    Error,
    /// Any code not covered above. It is carried through uninterpreted.
    Other(u8),
}

impl From<u8> for ResponseCode {
    fn from(b: u8) -> Self {
        use ResponseCode::*;
        match b {
            TOGGLE_OK => Toggled,
            DEL_SINGLE_OK => Cleared,
            SET_SINGLE_OK => Set,
            SET_PORT_OK => PortSet,
            GET_PORT_OK => Port,
            ANNOUNCE => Announce,
            ERROR => Error,
            _ => Other(b),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> Self {
        use ResponseCode::*;
        match code {
            Toggled => TOGGLE_OK,
            Cleared => DEL_SINGLE_OK,
            Set => SET_SINGLE_OK,
            PortSet => SET_PORT_OK,
            Port => GET_PORT_OK,
            Announce => ANNOUNCE,
            Error => ERROR,
            Other(b) => b,
        }
    }
}

// Accepts the same integer literals as `int(s, 0)`: decimal or a
// 0x / 0o / 0b prefixed value.
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (digits, radix) = match s.get(..2) {
        Some("0x") | Some("0X") => (&s[2..], 16),
        Some("0o") | Some("0O") => (&s[2..], 8),
        Some("0b") | Some("0B") => (&s[2..], 2),
        _ => (s, 10),
    };
    i64::from_str_radix(digits, radix).ok()
}

/// A single relay on a card, numbered 1 to 8 as printed on the board.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relay(u8);

impl Relay {
    /// Returns `None` unless `number` is in 1-8.
    pub fn new(number: u8) -> Option<Relay> {
        if (1..=8).contains(&number) {
            Some(Relay(number))
        } else {
            None
        }
    }

    /// All eight relays, in order.
    pub fn all() -> impl Iterator<Item = Relay> {
        (1..=8).map(Relay)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based bit position of the relay in the port.
    pub fn index(self) -> u8 {
        self.0 - 1
    }

    /// The selector byte sent in single-relay commands.
    pub fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl FromStr for Relay {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, <Self as FromStr>::Err> {
        match parse_int(s) {
            Some(n) if (1..=8).contains(&n) => Ok(Relay(n as u8)),
            _ => Err(Error::InvalidRelay),
        }
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// The port of a card: one bit per relay, relay 1 in the lowest bit.
    pub struct Relays: u8 {
        const RELAY_1 = (1 << 0);
        const RELAY_2 = (1 << 1);
        const RELAY_3 = (1 << 2);
        const RELAY_4 = (1 << 3);
        const RELAY_5 = (1 << 4);
        const RELAY_6 = (1 << 5);
        const RELAY_7 = (1 << 6);
        const RELAY_8 = (1 << 7);
        const NONE    = 0u8;
    }
}

impl Relays {
    /// Returns true if `relay` is switched on.
    pub fn contains_relay(&self, relay: Relay) -> bool {
        self.bits() & relay.bit() != 0
    }
}

impl From<Relay> for Relays {
    fn from(relay: Relay) -> Self {
        Relays::from_bits_truncate(relay.bit())
    }
}

impl FromStr for Relays {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, <Self as FromStr>::Err> {
        match parse_int(s) {
            Some(n) if (0..=255).contains(&n) => Ok(Relays::from_bits_truncate(n as u8)),
            _ => Err(Error::InvalidPortValue),
        }
    }
}

/// The 4 bytes on the wire: a code (command or response), an address,
/// a data byte and the XOR of those three.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub code: u8,
    pub address: u8,
    pub data: u8,
}

impl Frame {
    pub fn new(code: u8, address: u8, data: u8) -> Self {
        Frame {
            code,
            address,
            data,
        }
    }

    pub fn checksum(&self) -> u8 {
        self.code ^ self.address ^ self.data
    }

    pub fn to_array(&self) -> [u8; FRAME_LEN] {
        [self.code, self.address, self.data, self.checksum()]
    }

    /// Serializes the `Frame`, checksum included, into `bytes`.
    pub fn to_bytes(&self, bytes: &mut BytesMut) {
        bytes.reserve(FRAME_LEN);
        bytes.put_slice(&self.to_array());
    }

    /// Parse exactly one frame. Anything but 4 bytes is an
    /// `Error::Length`, and a bad checksum is an `Error::Checksum`.
    ///
    /// # Arguments
    /// * `src` - The received bytes.
    pub fn from_slice(src: &[u8]) -> Result<Frame, Error> {
        #[rustfmt::skip]
        named!(parse_frame<(u8, u8, u8, u8)>,
            do_parse!(
                code: be_u8     >>
                address: be_u8  >>
                data: be_u8     >>
                checksum: be_u8 >>
                ((code, address, data, checksum))
            )
        );

        // Short input is Incomplete, long input leaves a remainder
        let (code, address, data, checksum) = match parse_frame(src) {
            Ok((remainder, fields)) if remainder.is_empty() => fields,
            _ => return Err(Error::Length(src.len())),
        };

        let frame = Frame::new(code, address, data);
        if frame.checksum() != checksum {
            return Err(Error::Checksum {
                expected: frame.checksum(),
                actual: checksum,
            });
        }

        Ok(frame)
    }
}

/// A frame sent from the host to the cards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Request {
    pub command: Command,
    /// The target card, or 0 to broadcast.
    pub address: u8,
    pub data: u8,
}

impl Request {
    pub fn new(command: Command, address: u8, data: u8) -> Self {
        Request {
            command,
            address,
            data,
        }
    }
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Frame::new(request.command.into(), request.address, request.data)
    }
}

/// A frame sent back by one of the cards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    /// The card that answered.
    pub address: u8,
    pub data: u8,
}

impl Response {
    /// Returns true if this is the success reply to `command`.
    pub fn acknowledges(&self, command: Command) -> bool {
        self.code == command.expected_response()
    }
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Response {
            code: frame.code.into(),
            address: frame.address,
            data: frame.data,
        }
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        Frame::new(response.code.into(), response.address, response.data)
    }
}

/// Encodes [Request]s and decodes [Response]s. Raw bytes of every frame
/// are echoed at `debug` level.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of an incomplete frame seen by the last decode attempt.
    pub fn pending(&self) -> usize {
        self.pending
    }
}

impl Decoder for FrameCodec {
    type Item = Response;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_LEN {
            self.pending = src.len();
            return Ok(None);
        }

        self.pending = 0;
        let buf = src.split_to(FRAME_LEN);
        debug!("<-- {:3} {:3} {:3} {:3}", buf[0], buf[1], buf[2], buf[3]);
        Ok(Some(Frame::from_slice(&buf)?.into()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(response) => Ok(Some(response)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::Length(src.len())),
        }
    }
}

impl Encoder<Request> for FrameCodec {
    type Error = Error;
    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = Frame::from(item);
        debug!(
            "--> {:3} {:3} {:3} {:3}",
            frame.code,
            frame.address,
            frame.data,
            frame.checksum()
        );
        frame.to_bytes(dst);
        Ok(())
    }
}
