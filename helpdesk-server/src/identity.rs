use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Best-effort client identity used to key rate limiting.
///
/// With `trust_proxy_headers`, the left-most address in `X-Forwarded-For`
/// wins, then `X-Real-IP`. The peer socket address is the fallback. Header
/// values that are not IP addresses are ignored, so a proxy writing
/// `unknown` does not collapse every client into one bucket.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> Option<String> {
    let forwarded = trust_proxy_headers
        .then(|| forwarded_for(headers).or_else(|| real_ip(headers)))
        .flatten();

    forwarded
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    value.split(',').next().and_then(parse_ip)
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let value = headers.get("x-real-ip")?.to_str().ok()?;
    parse_ip(value)
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
