//! Usage: Listen-address parsing and TCP bind for the relay server.

use axum::Router;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedListenAddress {
    pub host: String,
    pub port: u16,
}

pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

pub fn parse_listen_address(input: &str, default_port: u16) -> Result<ParsedListenAddress, String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Ok(ParsedListenAddress {
            host: "127.0.0.1".to_string(),
            port: default_port,
        });
    }
    if raw.contains("://") || raw.contains('/') {
        return Err("listen address must be host or host:port".to_string());
    }

    if let Some(rest) = raw.strip_prefix('[') {
        let idx = rest
            .find(']')
            .ok_or_else(|| "invalid IPv6 address: missing closing ']'".to_string())?;
        let host = rest[..idx].trim();
        if host.is_empty() {
            return Err("listen address missing host".to_string());
        }
        let tail = rest[idx + 1..].trim();
        if tail.is_empty() {
            return Ok(ParsedListenAddress {
                host: host.to_string(),
                port: default_port,
            });
        }
        let port_raw = tail
            .strip_prefix(':')
            .ok_or_else(|| "listen address must be [ipv6]:port".to_string())?
            .trim();
        let port: u16 = port_raw
            .parse()
            .map_err(|_| "invalid listen port".to_string())?;
        return Ok(ParsedListenAddress {
            host: host.to_string(),
            port,
        });
    }

    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [host] => Ok(ParsedListenAddress {
            host: host.trim().to_string(),
            port: default_port,
        }),
        [host, port_raw] => {
            let host = host.trim();
            if host.is_empty() {
                return Err("listen address missing host".to_string());
            }
            let port: u16 = port_raw
                .trim()
                .parse()
                .map_err(|_| "invalid listen port".to_string())?;
            Ok(ParsedListenAddress {
                host: host.to_string(),
                port,
            })
        }
        _ => Err("IPv6 must use [addr]:port".to_string()),
    }
}

fn bind_listener(host: &str, port: u16) -> Result<std::net::TcpListener, String> {
    let listener = std::net::TcpListener::bind((host, port))
        .map_err(|err| format!("failed to bind {}: {err}", format_host_port(host, port)))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("failed to set listener nonblocking: {err}"))?;
    Ok(listener)
}

/// Bind the parsed address and serve the router until the process exits.
pub async fn serve(address: &ParsedListenAddress, router: Router) -> Result<(), String> {
    let std_listener = bind_listener(&address.host, address.port)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)
        .map_err(|err| format!("failed to adopt listener: {err}"))?;

    tracing::info!(
        addr = %format_host_port(&address.host, address.port),
        "relay listening"
    );

    axum::serve(listener, router)
        .await
        .map_err(|err| format!("server error: {err}"))
}
