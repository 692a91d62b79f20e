use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use cycle_core::network::{Delay, Endpoint, Link, LinkCredentials, Transport};

/// Host stand-in for the Wi-Fi radio: the "link" is a switch the operator can
/// flip, the transport is a real TCP stream.
pub struct HostNet {
    radio_enabled: bool,
    stream: Option<TcpStream>,
}

impl HostNet {
    pub fn new() -> Self {
        Self {
            radio_enabled: true,
            stream: None,
        }
    }

    pub fn radio_enabled(&self) -> bool {
        self.radio_enabled
    }

    /// Simulates losing or regaining the access point. Dropping the radio also
    /// drops the socket.
    pub fn set_radio_enabled(&mut self, enabled: bool) {
        self.radio_enabled = enabled;
        if !enabled {
            self.shutdown();
        }
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    // Drains collector replies; returns `false` once the peer has closed.
    fn drain(stream: &mut TcpStream) -> io::Result<bool> {
        stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let alive = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break false,
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => break true,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(_) => break false,
            }
        };
        stream.set_nonblocking(false)?;
        Ok(alive)
    }
}

impl Default for HostNet {
    fn default() -> Self {
        Self::new()
    }
}

fn radio_off() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "radio disabled")
}

impl Link for HostNet {
    type Error = io::Error;

    async fn is_associated(&mut self) -> bool {
        self.radio_enabled
    }

    async fn associate(&mut self, _credentials: &LinkCredentials) -> Result<(), io::Error> {
        if self.radio_enabled {
            Ok(())
        } else {
            Err(radio_off())
        }
    }
}

impl Transport for HostNet {
    type Error = io::Error;

    async fn is_open(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match Self::drain(stream) {
            Ok(true) => true,
            Ok(false) | Err(_) => {
                self.shutdown();
                false
            }
        }
    }

    async fn close(&mut self) {
        self.shutdown();
    }

    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration) -> Result<(), io::Error> {
        if !self.radio_enabled {
            return Err(radio_off());
        }

        let address = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable, "unresolved host"))?;

        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<usize, io::Error> {
        if !self.radio_enabled {
            return Err(radio_off());
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        let written = stream.write(bytes)?;
        stream.flush()?;
        Ok(written)
    }
}

/// Blocking delay; the emulator runs everything on one thread.
pub struct HostDelay;

impl Delay for HostDelay {
    async fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::net::TcpListener;

    fn endpoint_for(listener: &TcpListener) -> Endpoint {
        let port = listener.local_addr().unwrap().port();
        Endpoint::new("127.0.0.1", port).unwrap()
    }

    #[test]
    fn connects_writes_and_detects_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);
        let mut net = HostNet::new();

        block_on(net.connect(&endpoint, Duration::from_secs(1))).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        assert!(block_on(net.is_open()));
        assert_eq!(block_on(net.write(b"A;1;1\n")).unwrap(), 6);

        let mut received = [0u8; 6];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"A;1;1\n");

        drop(peer);
        thread::sleep(Duration::from_millis(50));
        assert!(!block_on(net.is_open()));
    }

    #[test]
    fn radio_off_blocks_association_and_writes() {
        let mut net = HostNet::new();
        net.set_radio_enabled(false);

        assert!(!block_on(net.is_associated()));
        let credentials = LinkCredentials::new("bench", "").unwrap();
        assert!(block_on(net.associate(&credentials)).is_err());
        assert!(block_on(net.write(b"x")).is_err());
    }

    #[test]
    fn refused_connect_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);
        drop(listener);

        let mut net = HostNet::new();
        assert!(block_on(net.connect(&endpoint, Duration::from_millis(200))).is_err());
        assert!(!block_on(net.is_open()));
    }
}
