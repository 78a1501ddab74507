use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Extension key for the extracted client IP, recorded into usage rows.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware to extract the client IP address from a request.
///
/// Priority:
/// 1. X-Forwarded-For header (requests through proxies)
/// 2. X-Real-IP header (Nginx)
/// 3. ConnectInfo socket address (direct connection)
pub async fn extract_client_ip(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    } else if let Some(real_ip) = request.headers().get("x-real-ip") {
        real_ip.to_str().ok().and_then(|s| s.parse::<IpAddr>().ok())
    } else {
        connect_info.map(|ConnectInfo(addr)| addr.ip())
    };

    if let Some(ip) = ip {
        request.extensions_mut().insert(ClientIp(ip));
    }

    next.run(request).await
}
