pub mod error;
pub mod server;
pub mod shift;

pub use crate::{
    error::{Error, ProtocolError, Result},
    server::XvcServer,
};
