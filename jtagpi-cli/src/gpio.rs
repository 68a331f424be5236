//! `rppal`-backed [`PinDriver`] over real Raspberry Pi–class GPIO headers —
//! the ambient "real I/O" counterpart to the teacher's FTDI/XPC USB
//! backends, but for a bit-banged four-wire link instead of a USB bridge.

use jtagpi_io::pins::{Pin, PinDriver};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use tracing::debug;

fn as_io_error(err: rppal::gpio::Error) -> std::io::Error {
    std::io::Error::other(err)
}

fn level(on: bool) -> Level {
    if on { Level::High } else { Level::Low }
}

/// BCM GPIO pin numbers for the four JTAG signals, per `-c/-m/-i/-o`.
#[derive(Debug, Clone, Copy)]
pub struct PinNumbers {
    pub tck: u8,
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
}

pub struct GpioPins {
    tck: OutputPin,
    tms: OutputPin,
    tdi: OutputPin,
    tdo: InputPin,
}

impl GpioPins {
    /// Acquire the four header pins. Fails if another process already holds
    /// the GPIO chip, or if `rppal` can't find `/dev/gpiochip0` at all (e.g.
    /// not running on an SBC) — both surfaced here as a plain `io::Error`
    /// init failure, per the error design's fatal-init-failure rule.
    pub fn new(pins: PinNumbers) -> std::io::Result<Self> {
        let gpio = Gpio::new().map_err(as_io_error)?;

        let mut tck = gpio.get(pins.tck).map_err(as_io_error)?.into_output();
        let mut tms = gpio.get(pins.tms).map_err(as_io_error)?.into_output();
        let mut tdi = gpio.get(pins.tdi).map_err(as_io_error)?.into_output();
        let tdo = gpio.get(pins.tdo).map_err(as_io_error)?.into_input();

        // Matches the source's initial JTAG state: TCK=0, TMS=1, TDI=0.
        tck.write(Level::Low);
        tms.write(Level::High);
        tdi.write(Level::Low);

        debug!(
            tck = pins.tck,
            tms = pins.tms,
            tdi = pins.tdi,
            tdo = pins.tdo,
            "GPIO pins configured"
        );

        Ok(Self { tck, tms, tdi, tdo })
    }
}

impl PinDriver for GpioPins {
    fn write(&mut self, pin: Pin, on: bool) -> jtagpi_io::error::Result<()> {
        match pin {
            Pin::Tck => self.tck.write(level(on)),
            Pin::Tms => self.tms.write(level(on)),
            Pin::Tdi => self.tdi.write(level(on)),
            Pin::Tdo => panic!("TDO is an input pin; it cannot be written"),
        }
        Ok(())
    }

    fn read(&mut self, pin: Pin) -> jtagpi_io::error::Result<bool> {
        match pin {
            Pin::Tdo => Ok(self.tdo.is_high()),
            other => panic!("{other:?} is an output pin; it cannot be read"),
        }
    }

    /// Drives all outputs low and leaves TMS high, the same idle state the
    /// source leaves the bus in between debugging sessions. `rppal` resets
    /// each pin to its original mode when the `OutputPin`/`InputPin` drops,
    /// so this is a courtesy to whatever attaches next, not a hard release.
    fn release_all(&mut self) -> jtagpi_io::error::Result<()> {
        self.tck.write(Level::Low);
        self.tdi.write(Level::Low);
        self.tms.write(Level::High);
        Ok(())
    }
}
