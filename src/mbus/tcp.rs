//! TCP transport for M-Bus gateways (serial-to-Ethernet converters).

use tokio::net::TcpStream;

use crate::error::MBusError;
use crate::mbus::transport::StreamTransport;

/// TCP transport type.
pub type TcpTransport = StreamTransport<TcpStream>;

/// Connects to a gateway at `host:port`.
pub async fn open_tcp(host: &str, port: u16) -> Result<TcpTransport, MBusError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    log::info!("Connected to M-Bus gateway {host}:{port}");
    Ok(StreamTransport::new(stream, format!("tcp {host}:{port}")))
}
