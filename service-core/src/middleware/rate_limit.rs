use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Rate limiter keyed by client IP address.
///
/// `x-forwarded-for` is only consulted when `trust_forwarded_for` is set,
/// i.e. when a proxy in front of the service overwrites it.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
    trust_forwarded_for: bool,
}

impl IpRateLimiter {
    /// Allow `attempts` per `window_seconds` for each client IP.
    pub fn new(attempts: u32, window_seconds: u64, trust_forwarded_for: bool) -> Self {
        let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
        let period_ms = ((window_seconds * 1000) / attempts.get() as u64).max(1);
        let quota = Quota::with_period(Duration::from_millis(period_ms))
            .unwrap_or_else(|| Quota::per_second(attempts))
            .allow_burst(attempts);

        Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
            trust_forwarded_for,
        }
    }

    /// Best-effort client IP: the first `x-forwarded-for` hop when trusted,
    /// otherwise the socket peer.
    pub fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        let forwarded_ip = if self.trust_forwarded_for {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        } else {
            None
        };

        forwarded_ip.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
    }

    /// Seconds to wait when `ip` is over its quota.
    fn check(&self, ip: &IpAddr) -> Result<(), u64> {
        self.limiter.check_key(ip).map_err(|negative| {
            negative
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1)
        })
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of client IPs currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Prune `limiters` every `interval` for the life of the process.
pub fn spawn_pruning(limiters: Vec<IpRateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for limiter in &limiters {
                limiter.prune();
            }
            tracing::debug!(
                tracked = limiters.iter().map(IpRateLimiter::tracked_clients).sum::<usize>(),
                "Pruned rate limiter state"
            );
        }
    })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limiter.client_ip(&request) {
        Some(ip) => match limiter.check(&ip) {
            Ok(()) => Ok(next.run(request).await),
            Err(retry_after) => {
                tracing::warn!(client_ip = %ip, "Rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(retry_after),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}
