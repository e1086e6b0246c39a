//! Best-effort announcement of mutating actions to an external sink: a
//! small external collaborator that logs and swallows its own failures
//! rather than failing the mutation that triggered it.

use std::io::Write as _;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub trait Announcer {
    fn announce(&self, message: &str) -> crate::Result<()>;
}

/// Sends one newline-terminated line to a tcpircbot-style listener, per
/// the `tcpircbot_host`/`tcpircbot_port` config keys.
pub struct TcpIrcAnnouncer {
    pub host: String,
    pub port: u16,
}

impl TcpIrcAnnouncer {
    pub fn new(host: &str, port: u16) -> TcpIrcAnnouncer {
        TcpIrcAnnouncer {
            host: host.to_string(),
            port,
        }
    }
}

impl Announcer for TcpIrcAnnouncer {
    fn announce(&self, message: &str) -> crate::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| failure::err_msg(format!("could not resolve {}", addr)))?;
        let mut stream = TcpStream::connect_timeout(&resolved, Duration::from_secs(2))?;
        stream.write_all(message.as_bytes())?;
        stream.write_all(b"\n")?;
        Ok(())
    }
}

/// A sink that only logs, used in tests and dry-run code paths.
pub struct NullAnnouncer;

impl Announcer for NullAnnouncer {
    fn announce(&self, message: &str) -> crate::Result<()> {
        log::info!("[dry-run announce] {}", message);
        Ok(())
    }
}
