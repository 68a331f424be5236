use thiserror::Error;

use crate::jtag::LegKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown chain kind {0:?}")]
    UnknownChain(String),

    #[error("row has too few fields: {0:?}")]
    ShortRow(Vec<String>),

    #[error("value {value:#x} does not fit in {width} bits")]
    ValueOverflow { value: u64, width: u8 },

    #[error("invalid integer literal {0:?}")]
    BadInt(String),
}

#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("{kind:?} is parsed but not walked: its Shift-state body is unimplemented")]
    Unimplemented { kind: LegKind },

    #[error("catalog has no register named {0:?}")]
    UnknownRegisterName(String),

    #[error("catalog has no register at address {0:#x}")]
    UnknownRegisterAddress(u32),

    #[error("device {0} is out of range for a chain of {1} device(s)")]
    DeviceIndexOutOfRange(usize, usize),

    #[error("device catalog entry is missing a BYPASS register")]
    MissingBypass,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
