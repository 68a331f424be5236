pub mod catalog;
pub mod chain;
pub mod error;
pub mod jtag;
pub mod pins;
pub mod rows;

pub use crate::{
    catalog::{Device, DeviceBuilder, RegisterInfo},
    chain::{ChainAccess, RegRef},
    error::{Error, InvariantError, ParseError, Result},
    jtag::{BitVec, Leg, LegKind, LegTag, TapState, TapWalker, WalkerState},
    pins::{phy_sync, Pin, PinDriver, RecordingPinDriver},
    rows::RowParser,
};
