use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{config::RateLimitConfig, error::AppError};

/// Table size past which expired windows are swept, at most once per window length.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Fixed-window request counter keyed by client address.
pub struct RateLimiter {
    scope: &'static str,
    cfg: RateLimitConfig,
    message: &'static str,
    trust_proxy: bool,
    table: Mutex<Table>,
}

struct Table {
    windows: HashMap<String, Window>,
    last_sweep: Option<Instant>,
}

impl RateLimiter {
    pub fn new(
        scope: &'static str,
        cfg: RateLimitConfig,
        message: &'static str,
        trust_proxy: bool,
    ) -> Self {
        Self {
            scope,
            cfg,
            message,
            trust_proxy,
            table: Mutex::new(Table {
                windows: HashMap::new(),
                last_sweep: None,
            }),
        }
    }

    pub async fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> Decision {
        let window_len = self.cfg.window;
        let mut table = self.table.lock().await;
        let sweep_due = table
            .last_sweep
            .map_or(true, |at| now.duration_since(at) >= window_len);
        if table.windows.len() > PRUNE_THRESHOLD && sweep_due {
            table
                .windows
                .retain(|_, w| now.duration_since(w.started) < window_len);
            table.last_sweep = Some(now);
        }
        let window = table.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= window_len {
            *window = Window {
                started: now,
                count: 0,
            };
        }
        window.count = window.count.saturating_add(1);
        Decision {
            allowed: window.count <= self.cfg.max_requests,
            limit: self.cfg.max_requests,
            remaining: self.cfg.max_requests.saturating_sub(window.count),
            reset_after: window_len.saturating_sub(now.duration_since(window.started)),
        }
    }
}

/// First `x-forwarded-for` hop, if it looks like an address.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() || first.len() > 64 {
        return None;
    }
    if first
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b':' || b == b'-')
    {
        Some(first.to_string())
    } else {
        None
    }
}

pub fn client_key(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_for(req.headers()) {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset = decision.reset_after.as_secs().max(1);
    headers.insert(
        HeaderName::from_static("ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-reset"),
        HeaderValue::from(reset),
    );
    if !decision.allowed {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(reset));
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn enforce(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let key = client_key(&req, limiter.trust_proxy);
    let decision = limiter.check(&key).await;
    let mut res = if decision.allowed {
        next.run(req).await
    } else {
        warn!(scope = limiter.scope, client = %key, "rate limit exceeded");
        AppError::TooManyRequests(limiter.message.to_string()).into_response()
    };
    apply_headers(res.headers_mut(), &decision);
    res
}
