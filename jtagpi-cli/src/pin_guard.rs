//! RAII wrapper guaranteeing [`PinDriver::release_all`] runs on every exit
//! path — return, `?`-propagated error, or panic unwind — replacing the
//! source's manually-placed `try`/`finally` GPIO cleanup with a type-level
//! guarantee.

use jtagpi_io::pins::{Pin, PinDriver};
use tracing::warn;

pub struct PinGuard<P: PinDriver>(Option<P>);

impl<P: PinDriver> PinGuard<P> {
    pub fn new(pins: P) -> Self {
        Self(Some(pins))
    }
}

impl<P: PinDriver> PinDriver for PinGuard<P> {
    fn write(&mut self, pin: Pin, level: bool) -> jtagpi_io::error::Result<()> {
        self.0.as_mut().expect("pins released while still in use").write(pin, level)
    }

    fn read(&mut self, pin: Pin) -> jtagpi_io::error::Result<bool> {
        self.0.as_mut().expect("pins released while still in use").read(pin)
    }

    fn release_all(&mut self) -> jtagpi_io::error::Result<()> {
        if let Some(pins) = self.0.as_mut() {
            pins.release_all()?;
        }
        Ok(())
    }
}

impl<P: PinDriver> Drop for PinGuard<P> {
    fn drop(&mut self) {
        if let Some(mut pins) = self.0.take() {
            if let Err(err) = pins.release_all() {
                warn!(%err, "failed to release pins on shutdown");
            }
        }
    }
}
