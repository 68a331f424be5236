//! The four-wire seam between the TAP/XVC cores and whatever actually
//! wiggles GPIO: a real SBC header (`jtagpi-cli::gpio::GpioPins`) or, in
//! tests, a `RecordingPinDriver` that just remembers what happened.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    Tck,
    Tms,
    Tdi,
    Tdo,
}

/// Abstract four-pin output/input with guaranteed ordering.
///
/// Implementations must not buffer or coalesce writes: a write is visible to
/// the target before the call returns. `phy_sync` relies on this to get the
/// TCK/TDI/TMS setup-before-clock ordering right.
pub trait PinDriver {
    fn write(&mut self, pin: Pin, level: bool) -> Result<()>;
    fn read(&mut self, pin: Pin) -> Result<bool>;
    fn release_all(&mut self) -> Result<()>;
}

impl<P: PinDriver + ?Sized> PinDriver for Box<P> {
    fn write(&mut self, pin: Pin, level: bool) -> Result<()> {
        P::write(self, pin, level)
    }

    fn read(&mut self, pin: Pin) -> Result<bool> {
        P::read(self, pin)
    }

    fn release_all(&mut self) -> Result<()> {
        P::release_all(self)
    }
}

/// One TCK cycle: sample TDO before the edge, present TDI/TMS, toggle TCK.
///
/// Step order matters: TCK is driven low, then TDI, then TMS, so both are
/// stable at the rising edge latched in step 3.
#[tracing::instrument(skip_all)]
pub fn phy_sync(pins: &mut dyn PinDriver, tdi: bool, tms: bool) -> Result<bool> {
    let tdo = pins.read(Pin::Tdo)?;

    pins.write(Pin::Tck, false)?;
    pins.write(Pin::Tdi, tdi)?;
    pins.write(Pin::Tms, tms)?;

    pins.write(Pin::Tck, true)?;
    pins.write(Pin::Tck, false)?;

    Ok(tdo)
}

/// Test double that records every write and fixed read values, for
/// asserting exact cycle-by-cycle traces in unit tests.
#[derive(Debug, Default)]
pub struct RecordingPinDriver {
    pub trace: Vec<(Pin, bool)>,
    pub tdo_queue: std::collections::VecDeque<bool>,
    pub released: bool,
}

impl RecordingPinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue TDO values to be returned by successive reads; once drained,
    /// reads return `false`.
    pub fn with_tdo(mut self, bits: impl IntoIterator<Item = bool>) -> Self {
        self.tdo_queue.extend(bits);
        self
    }
}

impl PinDriver for RecordingPinDriver {
    fn write(&mut self, pin: Pin, level: bool) -> Result<()> {
        self.trace.push((pin, level));
        Ok(())
    }

    fn read(&mut self, pin: Pin) -> Result<bool> {
        debug_assert_eq!(pin, Pin::Tdo, "only TDO is ever read");
        Ok(self.tdo_queue.pop_front().unwrap_or(false))
    }

    fn release_all(&mut self) -> Result<()> {
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phy_sync_order_and_sample() {
        let mut pins = RecordingPinDriver::new().with_tdo([true]);
        let tdo = phy_sync(&mut pins, true, false).unwrap();
        assert!(tdo, "sampled value reflects the *previous* cycle's TDO");
        assert_eq!(
            pins.trace,
            vec![
                (Pin::Tck, false),
                (Pin::Tdi, true),
                (Pin::Tms, false),
                (Pin::Tck, true),
                (Pin::Tck, false),
            ]
        );
    }
}
