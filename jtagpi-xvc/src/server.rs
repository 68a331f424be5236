//! TCP listener and framed XVC 1.0 protocol dispatcher.
//!
//! Single-threaded, one client at a time: concurrent clients would just
//! contend for the same four pins, so there is nothing to gain from
//! threading this. Shutdown is cooperative via a shared `running` flag,
//! checked on every accept-loop iteration and every blocked read.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jtagpi_io::pins::PinDriver;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::shift;

const VERSION_REPLY: &[u8] = b"xvcServer_v1.0:2048\n";
/// Hard sanity cap on a `shift:` payload's TMS+TDI buffer, independent of
/// the 2048-bit capability advertised in `VERSION_REPLY`.
const MAX_SHIFT_BUFFER: usize = 4096;
const ACCEPT_POLL: Duration = Duration::from_millis(200);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct XvcServer<P> {
    pins: P,
    port: u16,
    delay_spins: u32,
    running: Arc<AtomicBool>,
}

impl<P: PinDriver> XvcServer<P> {
    pub fn new(pins: P, port: u16, delay_spins: u32, running: Arc<AtomicBool>) -> Self {
        Self {
            pins,
            port,
            delay_spins,
            running,
        }
    }

    /// Bind and accept connections until `running` is cleared. Returns once
    /// the listener has been torn down; the caller is responsible for
    /// releasing the pins afterwards.
    #[instrument(skip(self), fields(port = self.port))]
    pub fn serve(&mut self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))?;
        listener.set_nonblocking(true)?;
        info!(port = self.port, "XVC server listening");

        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "connection accepted");
                    if let Err(err) = self.handle_client(stream) {
                        warn!(%addr, %err, "client connection ended with an error");
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn handle_client(&mut self, mut stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;

        while self.running.load(Ordering::Relaxed) {
            let mut prefix = [0u8; 2];
            if !self.safe_read(&mut stream, &mut prefix)? {
                break;
            }

            match &prefix {
                b"ge" => self.handle_getinfo(&mut stream)?,
                b"se" => self.handle_settck(&mut stream)?,
                b"sh" => {
                    if !self.handle_shift(&mut stream)? {
                        break;
                    }
                }
                _ => {
                    warn!(prefix = ?prefix, "unknown XVC command prefix, closing connection");
                    return Err(ProtocolError::UnknownCommand(prefix).into());
                }
            }
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes, retrying on a client-read timeout
    /// while `running` stays set. Returns `Ok(false)` on a clean EOF
    /// (client closed the connection) instead of erroring.
    fn safe_read(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.running.load(Ordering::Relaxed) {
                return Ok(false);
            }
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    fn handle_getinfo(&self, stream: &mut TcpStream) -> Result<()> {
        let mut rest = [0u8; 6]; // "tinfo:"
        if !self.safe_read(stream, &mut rest)? {
            return Ok(());
        }
        stream.write_all(VERSION_REPLY)?;
        Ok(())
    }

    fn handle_settck(&self, stream: &mut TcpStream) -> Result<()> {
        let mut rest = [0u8; 5]; // "ttck:"
        if !self.safe_read(stream, &mut rest)? {
            return Ok(());
        }
        let mut period = [0u8; 4];
        if !self.safe_read(stream, &mut period)? {
            return Ok(());
        }
        // The period is informational only; we don't alter clocking to
        // match it, so echoing it back is the entire implementation.
        stream.write_all(&period)?;
        Ok(())
    }

    /// Returns `Ok(false)` if the connection should be closed (oversized
    /// payload or client hang-up), `Ok(true)` to keep reading commands.
    fn handle_shift(&mut self, stream: &mut TcpStream) -> Result<bool> {
        let mut rest = [0u8; 4]; // "ift:"
        if !self.safe_read(stream, &mut rest)? {
            return Ok(false);
        }
        let mut nbits_buf = [0u8; 4];
        if !self.safe_read(stream, &mut nbits_buf)? {
            return Ok(false);
        }
        let nbits = u32::from_le_bytes(nbits_buf);
        let nbytes = nbits.div_ceil(8) as usize;
        let buffer_size = nbytes * 2;

        if buffer_size > MAX_SHIFT_BUFFER {
            warn!(buffer_size, "oversized shift payload, closing connection");
            return Err(ProtocolError::OversizedShift(buffer_size, MAX_SHIFT_BUFFER).into());
        }

        let mut payload = vec![0u8; buffer_size];
        if !self.safe_read(stream, &mut payload)? {
            return Ok(false);
        }
        let (tms, tdi) = payload.split_at(nbytes);

        let tdo = shift::shift(&mut self.pins, nbits, tms, tdi, self.delay_spins)?;
        stream.write_all(&tdo)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream as ClientStream;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use jtagpi_io::pins::RecordingPinDriver;

    use super::*;

    fn free_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn getinfo_is_idempotent() {
        let port = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let running_server = running.clone();
        let mut server = XvcServer::new(RecordingPinDriver::new(), port, 0, running_server);

        let handle = std::thread::spawn(move || server.serve());
        std::thread::sleep(Duration::from_millis(100));

        let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(b"getinfo:").unwrap();
        let mut reply1 = [0u8; 20];
        client.read_exact(&mut reply1).unwrap();

        client.write_all(b"getinfo:").unwrap();
        let mut reply2 = [0u8; 20];
        client.read_exact(&mut reply2).unwrap();

        assert_eq!(reply1, reply2);
        assert_eq!(&reply1, VERSION_REPLY);

        running.store(false, Ordering::Relaxed);
        drop(client);
        let _ = handle.join();
    }

    #[test]
    fn settck_echoes_the_period() {
        let port = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let running_server = running.clone();
        let mut server = XvcServer::new(RecordingPinDriver::new(), port, 0, running_server);

        let handle = std::thread::spawn(move || server.serve());
        std::thread::sleep(Duration::from_millis(100));

        let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        let mut request = b"settck:".to_vec();
        request.extend_from_slice(&12_500u32.to_le_bytes());
        client.write_all(&request).unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(u32::from_le_bytes(reply), 12_500);

        running.store(false, Ordering::Relaxed);
        drop(client);
        let _ = handle.join();
    }

    #[test]
    fn shift_eight_bits_round_trips_through_the_socket() {
        let port = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let running_server = running.clone();
        // RecordingPinDriver's TDO queue is empty, so every sampled bit is 0.
        let mut server = XvcServer::new(RecordingPinDriver::new(), port, 0, running_server);

        let handle = std::thread::spawn(move || server.serve());
        std::thread::sleep(Duration::from_millis(100));

        let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        let mut request = b"shift:".to_vec();
        request.extend_from_slice(&8u32.to_le_bytes());
        request.push(0x55);
        request.push(0xaa);
        client.write_all(&request).unwrap();

        let mut tdo = [0u8; 1];
        client.read_exact(&mut tdo).unwrap();
        assert_eq!(tdo, [0x00]);

        running.store(false, Ordering::Relaxed);
        drop(client);
        let _ = handle.join();
    }

    #[test]
    fn oversized_shift_closes_the_connection_but_the_server_keeps_accepting() {
        let port = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let running_server = running.clone();
        let mut server = XvcServer::new(RecordingPinDriver::new(), port, 0, running_server);

        let handle = std::thread::spawn(move || server.serve());
        std::thread::sleep(Duration::from_millis(100));

        // 40_000 bits => 5_000 bytes/buffer => 10_000-byte TMS+TDI payload,
        // well past the 4096-byte sanity cap. The server must reject this
        // before reading the (never-sent) payload and drop the connection.
        let mut bad_client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        let mut request = b"shift:".to_vec();
        request.extend_from_slice(&40_000u32.to_le_bytes());
        bad_client.write_all(&request).unwrap();

        let mut buf = [0u8; 1];
        let eof = bad_client.read(&mut buf).unwrap();
        assert_eq!(eof, 0, "oversized shift must close the connection without a reply");
        drop(bad_client);

        // A fresh client on the same server must still be served normally.
        let mut good_client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        good_client.write_all(b"getinfo:").unwrap();
        let mut reply = [0u8; 20];
        good_client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, VERSION_REPLY);

        running.store(false, Ordering::Relaxed);
        drop(good_client);
        let _ = handle.join();
    }

    #[test]
    fn unknown_command_prefix_closes_the_connection() {
        let port = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let running_server = running.clone();
        let mut server = XvcServer::new(RecordingPinDriver::new(), port, 0, running_server);

        let handle = std::thread::spawn(move || server.serve());
        std::thread::sleep(Duration::from_millis(100));

        let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(b"xx").unwrap();
        let mut buf = [0u8; 1];
        let eof = client.read(&mut buf).unwrap();
        assert_eq!(eof, 0);

        running.store(false, Ordering::Relaxed);
        drop(client);
        let _ = handle.join();
    }
}
