//! A crate for controlling a chain of Conrad Technology Centrum relay
//! cards attached to a serial port.
//!
//! Every exchange is a fixed 4 byte frame (`command`, `address`, `data`,
//! XOR checksum) answered by a single 4 byte frame. Address 0 broadcasts
//! to every card on the chain.
//!
//! # Example
//! ```no_run
//! # use std::str::FromStr;
//! # use ctc_relay::{Relay, RelayCard};
//! # use ctc_relay::Error;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Error>  {
//! // Use the card chain attached to /dev/ttyUSB0 to switch on relay 3
//! // of the card with address 1.
//! let mut card = RelayCard::from_path("/dev/ttyUSB0")?;
//! for controller in card.discover().await? {
//!     println!("{:?}", controller);
//! }
//! card.set_relay(1, Relay::from_str("3")?).await?;
//! # Ok(())
//! # }
//! ```

mod card;
mod constants;
mod error;
mod frame;

pub use card::*;
pub use error::*;

pub use constants::{BAUD_RATE, BROADCAST, FRAME_LEN};
pub use frame::{Command, Frame, FrameCodec, Relay, Relays, Request, Response, ResponseCode};
