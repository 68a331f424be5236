//! Bit-level TMS/TDI shifter driven directly by XVC `shift:` payloads.
//!
//! This does not go through [`jtagpi_io::jtag::TapWalker`] — the XVC host
//! already knows what TAP state it wants and drives TMS itself, so this is
//! just three pin writes and a sample per bit, not a state machine.

use jtagpi_io::pins::{Pin, PinDriver};

use crate::error::Result;

fn bit_at(buf: &[u8], i: u32) -> bool {
    (buf[(i / 8) as usize] >> (i % 8)) & 1 == 1
}

fn spin(delay_spins: u32) {
    for _ in 0..delay_spins {
        std::hint::spin_loop();
    }
}

/// Drive `tck`, `tdi`, `tms` in that order (same setup-before-clock ordering
/// as [`jtagpi_io::pins::phy_sync`]), then burn `delay_spins` iterations —
/// the XVC link's only timing knob, since unlike the TAP walker path this one
/// talks to hardware that wasn't told to expect software-speed edges.
fn write_and_delay(
    pins: &mut dyn PinDriver,
    tck: bool,
    tms: bool,
    tdi: bool,
    delay_spins: u32,
) -> Result<()> {
    pins.write(Pin::Tck, tck)?;
    pins.write(Pin::Tdi, tdi)?;
    pins.write(Pin::Tms, tms)?;
    spin(delay_spins);
    Ok(())
}

/// Shift `nbits` through the pins per the XVC `shift:` payload. `tms`/`tdi`
/// are `ceil(nbits/8)`-byte buffers, bit 0 of byte 0 shifted first. Returns a
/// same-sized TDO buffer with the same bit ordering.
pub fn shift(
    pins: &mut dyn PinDriver,
    nbits: u32,
    tms: &[u8],
    tdi: &[u8],
    delay_spins: u32,
) -> Result<Vec<u8>> {
    let nbytes = nbits.div_ceil(8) as usize;
    let mut tdo = vec![0u8; nbytes];

    write_and_delay(pins, false, true, true, delay_spins)?;

    for i in 0..nbits {
        let tms_bit = bit_at(tms, i);
        let tdi_bit = bit_at(tdi, i);

        write_and_delay(pins, false, tms_bit, tdi_bit, delay_spins)?;
        write_and_delay(pins, true, tms_bit, tdi_bit, delay_spins)?;
        if pins.read(Pin::Tdo)? {
            tdo[(i / 8) as usize] |= 1 << (i % 8);
        }
        write_and_delay(pins, false, tms_bit, tdi_bit, delay_spins)?;
    }

    write_and_delay(pins, false, true, false, delay_spins)?;

    Ok(tdo)
}

#[cfg(test)]
mod tests {
    use jtagpi_io::pins::RecordingPinDriver;

    use super::*;

    #[test]
    fn eight_bit_shift_toggles_tms_tdi_in_lsb_first_order() {
        // tms = 0x55 = 0b01010101, tdi = 0xaa = 0b10101010
        let mut pins = RecordingPinDriver::new();
        let tdo = shift(&mut pins, 8, &[0x55], &[0xaa], 0).unwrap();
        assert_eq!(tdo, vec![0]);

        let tms_trace: Vec<bool> = pins
            .trace
            .iter()
            .filter(|(p, _)| *p == jtagpi_io::pins::Pin::Tms)
            .map(|(_, v)| *v)
            .collect();
        let tdi_trace: Vec<bool> = pins
            .trace
            .iter()
            .filter(|(p, _)| *p == jtagpi_io::pins::Pin::Tdi)
            .map(|(_, v)| *v)
            .collect();

        // pre-roll + 8 bits (2 writes each) + post-roll = 10 TMS/TDI writes
        assert_eq!(tms_trace.len(), 10);
        assert_eq!(tdi_trace.len(), 10);

        let bit_tms: Vec<bool> = (0..8).map(|i| (0x55u8 >> i) & 1 == 1).collect();
        let bit_tdi: Vec<bool> = (0..8).map(|i| (0xaau8 >> i) & 1 == 1).collect();
        // each bit is driven on both the rising- and falling-edge write
        assert_eq!(tms_trace[1], bit_tms[0]);
        assert_eq!(tms_trace[2], bit_tms[0]);
        assert_eq!(tdi_trace[1], bit_tdi[0]);
        assert_eq!(tdi_trace[2], bit_tdi[0]);
    }

    #[test]
    fn shorted_tdi_to_tdo_target_echoes_the_request() {
        // bit symmetry property: if TDO == TDI on the wire, the returned
        // buffer must equal the TDI buffer we sent, truncated to nbits.
        let tdi_byte = 0b1011_0010u8;
        let mut pins = ShortedPins {
            inner: RecordingPinDriver::new(),
            last_tdi: false,
        };
        let tdo = shift(&mut pins, 8, &[0x00], &[tdi_byte], 0).unwrap();
        assert_eq!(tdo, vec![tdi_byte]);
    }

    struct ShortedPins {
        inner: RecordingPinDriver,
        last_tdi: bool,
    }

    impl PinDriver for ShortedPins {
        fn write(&mut self, pin: Pin, level: bool) -> jtagpi_io::error::Result<()> {
            if pin == Pin::Tdi {
                self.last_tdi = level;
            }
            self.inner.write(pin, level)
        }

        fn read(&mut self, pin: Pin) -> jtagpi_io::error::Result<bool> {
            if pin == Pin::Tdo {
                Ok(self.last_tdi)
            } else {
                self.inner.read(pin)
            }
        }

        fn release_all(&mut self) -> jtagpi_io::error::Result<()> {
            self.inner.release_all()
        }
    }
}
