use crate::error::{Result, SpanError};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Listening socket children connect to during the handshake.
pub struct ChildListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChildListener {
    /// Bind to `ip:base_port`, moving to the next port for as long as the
    /// address is in use.
    ///
    /// A `listen` that loses a race for the port reopens the socket and
    /// keeps walking up. Any other failure is fatal. Must be called from
    /// within a tokio runtime.
    pub fn bind_incrementing(ip: IpAddr, base_port: u16, backlog: u32) -> Result<Self> {
        let mut port = base_port;
        loop {
            let addr = SocketAddr::new(ip, port);
            let socket = open_socket(ip).map_err(|e| SpanError::transport("socket", addr, e))?;

            match socket.bind(addr) {
                Ok(()) => match socket.listen(backlog) {
                    Ok(listener) => {
                        let local_addr = listener
                            .local_addr()
                            .map_err(|e| SpanError::transport("local_addr", addr, e))?;
                        return Ok(Self {
                            listener,
                            local_addr,
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::AddrInUse => {
                        tracing::debug!(port, "listen lost the port, reopening");
                    }
                    Err(e) => return Err(SpanError::transport("listen", addr, e)),
                },
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    tracing::debug!(port, "port in use, trying next");
                }
                Err(e) => return Err(SpanError::transport("bind", addr, e)),
            }

            port = port
                .checked_add(1)
                .ok_or(SpanError::PortRangeExhausted { base: base_port })?;
        }
    }

    /// Accept one child connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| SpanError::transport("accept child", self.local_addr, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| SpanError::transport("set_nodelay", addr, e))?;
        Ok((stream, addr))
    }

    /// The address actually bound, including the chosen port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

fn open_socket(ip: IpAddr) -> std::io::Result<TcpSocket> {
    let socket = match ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    Ok(socket)
}
