use std::net::{IpAddr, SocketAddr};

use hyper::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// The address a request came from.
///
/// With `trust_forwarded`, the first parseable entry of `X-Forwarded-For`
/// wins, then `X-Real-IP`, then the TCP peer.
pub fn observe(headers: &HeaderMap, peer: SocketAddr, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = header(headers, FORWARDED_FOR)
            .and_then(|v| v.split(',').find_map(|ip| ip.trim().parse::<IpAddr>().ok()));
        if let Some(ip) = forwarded {
            return canonical(ip).to_string();
        }

        if let Some(ip) = header(headers, REAL_IP).and_then(|v| v.trim().parse::<IpAddr>().ok()) {
            return canonical(ip).to_string();
        }
    }

    canonical(peer.ip()).to_string()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// Dual-stack listeners see IPv4 clients as ::ffff:a.b.c.d.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}
