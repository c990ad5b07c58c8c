use crate::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_PORT: u16 = 4444;
pub const DEFAULT_MAX_SESSIONS: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl ServerConfig {
    pub fn new(ip: &str, port: &str, max_sessions: &str) -> Result<Self> {
        Ok(Self {
            address: parse_address(ip, port)?,
            max_sessions: parse_max_sessions(max_sessions)?,
        })
    }
}

/// Ports 1024 and below are reserved, and 65535 is excluded as well.
pub fn parse_port(port: &str) -> Result<u16> {
    let number: u32 = match port.trim().parse() {
        Ok(number) => number,
        Err(_) => Err(format!("'{}' is not a port number", port))?,
    };
    if number <= 1024 || number >= 65535 {
        Err(format!("port {} must be between 1025 and 65534", number))?;
    }
    Ok(number as u16)
}

pub fn parse_address(ip: &str, port: &str) -> Result<SocketAddr> {
    let ip: IpAddr = match ip.trim().parse() {
        Ok(ip) => ip,
        Err(_) => Err(format!("'{}' is not an IP address", ip))?,
    };
    Ok(SocketAddr::new(ip, parse_port(port)?))
}

pub fn parse_max_sessions(max_sessions: &str) -> Result<usize> {
    match max_sessions.trim().parse() {
        Ok(0) | Err(_) => Err(format!(
            "'{}' is not a positive session count",
            max_sessions
        ))?,
        Ok(count) => Ok(count),
    }
}
