use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] jtagpi_io::Error),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command prefix {0:?}")]
    UnknownCommand([u8; 2]),

    #[error("shift payload of {0} bytes exceeds the {1}-byte sanity cap")]
    OversizedShift(usize, usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
