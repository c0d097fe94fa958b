use super::command::{run_first_available, run_tool};
use super::SourceError;
use crate::snapshot::{InterfaceAddress, NetworkListener, NetworkReport, Section};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4};
use std::path::PathBuf;
use tracing::debug;

const TCP_LISTEN: &str = "0A";
const UDP_UNCONNECTED: &str = "07";

pub trait NetworkSource: Send + Sync {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, SourceError>;
    fn listeners(&self) -> Result<Vec<NetworkListener>, SourceError>;
}

pub fn collect_network(source: &dyn NetworkSource, listener_limit: usize) -> NetworkReport {
    let addresses = source.addresses().map(|all| {
        all.into_iter()
            .filter(|a| is_private_loose(&a.address))
            .collect::<Vec<_>>()
    });
    let listeners = source.listeners().map(|mut all| {
        all.truncate(listener_limit);
        all
    });

    NetworkReport {
        addresses: Section::from(addresses),
        listeners: Section::from(listeners),
    }
}

/// Private IPv4 check by prefix. `172.` matches the whole 172.0.0.0/8, wider
/// than the RFC 1918 172.16.0.0/12 block; kept that way for output
/// compatibility.
pub fn is_private_loose(address: &str) -> bool {
    address.starts_with("10.") || address.starts_with("172.") || address.starts_with("192.168.")
}

pub struct NativeNetwork {
    proc_root: PathBuf,
}

impl NativeNetwork {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl NetworkSource for NativeNetwork {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, SourceError> {
        let addrs = nix::ifaddrs::getifaddrs().map_err(|errno| SourceError::ToolFailed {
            tool: "getifaddrs".to_string(),
            detail: errno.desc().to_string(),
        })?;

        Ok(addrs
            .filter_map(|ifa| {
                let sin = ifa.address.as_ref()?.as_sockaddr_in().copied()?;
                Some(InterfaceAddress {
                    interface: ifa.interface_name,
                    address: SocketAddrV4::from(sin).ip().to_string(),
                })
            })
            .collect())
    }

    fn listeners(&self) -> Result<Vec<NetworkListener>, SourceError> {
        let mut out = Vec::new();
        let mut readable = 0;
        for (protocol, wanted) in [
            ("tcp", TCP_LISTEN),
            ("tcp6", TCP_LISTEN),
            ("udp", UDP_UNCONNECTED),
            ("udp6", UDP_UNCONNECTED),
        ] {
            let path = self.proc_root.join("net").join(protocol);
            match fs::read_to_string(&path) {
                Ok(text) => {
                    readable += 1;
                    out.extend(parse_proc_net(&text, protocol, wanted));
                }
                Err(err) => debug!(path = %path.display(), error = %err, "socket table not readable"),
            }
        }

        if readable == 0 {
            debug!("no /proc/net socket table readable, falling back to ss/netstat");
            return ToolNetwork.listeners();
        }
        Ok(out)
    }
}

pub struct ToolNetwork;

impl NetworkSource for ToolNetwork {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, SourceError> {
        let out = run_tool("ip", &["-o", "-4", "addr", "show"])?;
        Ok(parse_ip_addr(&out))
    }

    fn listeners(&self) -> Result<Vec<NetworkListener>, SourceError> {
        let (tool, out) = run_first_available(&[("ss", &["-tuln"]), ("netstat", &["-tuln"])])?;
        Ok(match tool {
            "ss" => parse_ss(&out),
            _ => parse_netstat(&out),
        })
    }
}

/// Rows of a `/proc/net/{tcp,udp}[6]` table whose state is `wanted`.
pub fn parse_proc_net(text: &str, protocol: &str, wanted: &str) -> Vec<NetworkListener> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 || cols[3] != wanted {
                return None;
            }
            let (addr_hex, port_hex) = cols[1].split_once(':')?;
            Some(NetworkListener {
                protocol: protocol.to_string(),
                local_address: decode_hex_addr(addr_hex)?,
                local_port: u16::from_str_radix(port_hex, 16).ok()?,
                state: if wanted == TCP_LISTEN { "LISTEN" } else { "UNCONN" }.to_string(),
            })
        })
        .collect()
}

/// The kernel prints addresses as host-order 32-bit words.
fn decode_hex_addr(hex: &str) -> Option<String> {
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(Ipv4Addr::from(word.to_ne_bytes()).to_string())
        }
        32 => {
            let mut bytes = [0_u8; 16];
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(&hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Some(Ipv6Addr::from(bytes).to_string())
        }
        _ => None,
    }
}

/// `ip -o -4 addr show`: `2: eth0    inet 10.0.0.5/24 brd ... scope global eth0`.
pub fn parse_ip_addr(text: &str) -> Vec<InterfaceAddress> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let _index = tokens.next()?;
            let interface = tokens.next()?.to_string();
            let mut rest = tokens.skip_while(|t| *t != "inet");
            rest.next()?;
            let cidr = rest.next()?;
            let address = cidr.split('/').next()?.to_string();
            Some(InterfaceAddress { interface, address })
        })
        .collect()
}

/// `ss -tuln`: `Netid State Recv-Q Send-Q Local:Port Peer:Port`.
pub fn parse_ss(text: &str) -> Vec<NetworkListener> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            let (local_address, local_port) = split_host_port(cols[4])?;
            Some(NetworkListener {
                protocol: cols[0].to_string(),
                local_address,
                local_port,
                state: cols[1].to_string(),
            })
        })
        .collect()
}

/// `netstat -tuln`: `Proto Recv-Q Send-Q Local Foreign [State]`.
pub fn parse_netstat(text: &str) -> Vec<NetworkListener> {
    text.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 || !(cols[0].starts_with("tcp") || cols[0].starts_with("udp")) {
                return None;
            }
            let (local_address, local_port) = split_host_port(cols[3])?;
            Some(NetworkListener {
                protocol: cols[0].to_string(),
                local_address,
                local_port,
                state: cols.get(5).map_or("UNCONN", |s| *s).to_string(),
            })
        })
        .collect()
}

fn split_host_port(endpoint: &str) -> Option<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port.parse().ok()?))
}
