#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate implements the UDP discovery protocol ELEGOO resin printers
//! answer on the local network, used here to poll their print status.

mod error;
mod status;

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use tokio::net::UdpSocket;

pub use error::{Error, Result};
pub use status::{parse_response, Activity, PrintInfo, Status};

/// The UDP port printers listen for discovery on.
pub const DISCOVERY_PORT: u16 = 3000;
/// The discovery datagram.
pub const DISCOVERY_COMMAND: &[u8] = b"M99999";
/// Default bound on sending the request and on waiting for the answer.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_DATAGRAM: usize = 64 * 1024;

/// Client bound to one printer. Dropping it closes the socket.
#[derive(Debug)]
pub struct Client {
    socket: UdpSocket,
    target: SocketAddr,
    timeout: Duration,
}

impl Client {
    /// Bind a local socket for talking to the printer at `ip`.
    pub async fn bind(ip: IpAddr) -> Result<Self> {
        Self::bind_addr(SocketAddr::new(ip, DISCOVERY_PORT)).await
    }

    /// Bind a local socket for a printer answering on a non-standard port.
    pub async fn bind_addr(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match target.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        Ok(Self {
            socket: UdpSocket::bind(local).await?,
            target,
            timeout: IO_TIMEOUT,
        })
    }

    /// Override the send/receive bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The printer this client talks to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Ask the printer for its status.
    pub async fn status(&self) -> Result<Status> {
        tokio::time::timeout(self.timeout, self.socket.send_to(DISCOVERY_COMMAND, self.target))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = tokio::time::timeout(self.timeout, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| Error::Timeout(self.timeout))??;

            if from.ip() != self.target.ip() {
                tracing::debug!(%from, "ignoring datagram from another host");
                continue;
            }

            tracing::trace!(printer = %self.target, len, "received status datagram");
            return parse_response(&buf[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_against_local_responder() {
        let printer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let printer_addr = printer.local_addr().unwrap();

        let client = Client::bind_addr(printer_addr).await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = printer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], DISCOVERY_COMMAND);
            let body = br#"{"Data": {"Status": {"CurrentStatus": 0}}}"#;
            printer.send_to(body, from).await.unwrap();
        });

        let status = client.status().await.unwrap();
        assert_eq!(status.activity(), Activity::Idle);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_times_out() {
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let client = Client::bind_addr(silent.local_addr().unwrap())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        assert!(matches!(client.status().await, Err(Error::Timeout(_))));
    }
}
