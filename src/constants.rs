pub const FRAME_LEN: usize = 4;
pub const BAUD_RATE: u32 = 19200;
pub const BROADCAST: u8 = 0;

// Host -> card commands
pub const SETUP: u8 = 0x01u8;
pub const GET_PORT: u8 = 0x02u8;
pub const SET_PORT: u8 = 0x03u8;
pub const SET_SINGLE: u8 = 0x06u8;
pub const DEL_SINGLE: u8 = 0x07u8;
pub const TOGGLE: u8 = 0x08u8;

// Card -> host responses
pub const TOGGLE_OK: u8 = 247;
pub const DEL_SINGLE_OK: u8 = 248;
pub const SET_SINGLE_OK: u8 = 249;
pub const SET_PORT_OK: u8 = 252;
pub const GET_PORT_OK: u8 = 253;
pub const ANNOUNCE: u8 = 254;
pub const ERROR: u8 = 255;

// Every card accepts SETUP regardless of the address byte
pub const SETUP_ADDRESS: u8 = 1;
