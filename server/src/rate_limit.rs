use std::{
    net::{IpAddr, Ipv4Addr},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

#[derive(Debug)]
pub struct TokenBucket {
    last_refill: Instant,
    tokens: u32,
    capacity: u32,
    refill_interval: Duration,
}

impl TokenBucket {
    fn new(capacity: u32, refill_interval: Duration, now: Instant) -> Self {
        Self {
            last_refill: now,
            tokens: capacity,
            capacity,
            refill_interval,
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Refills to full capacity once per elapsed interval.
    fn refill(&mut self, now: Instant) {
        if now.duration_since(self.last_refill) >= self.refill_interval {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
    }
}

/// Per client IP budget for creating sessions.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    capacity: u32,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_interval: Duration::from_secs(60),
        }
    }

    pub fn check(&self, client_ip: &ClientIp) -> Result<(), Status> {
        self.check_at(client_ip.0, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), Status> {
        let mut entry = self
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_interval, now));

        if entry.try_consume(now) {
            Ok(())
        } else {
            Err(Status::TooManyRequests)
        }
    }
}

#[derive(Debug)]
pub struct ClientIp(pub IpAddr);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|header| header.split(',').next())
            .and_then(|ip| ip.trim().parse().ok())
            .or_else(|| {
                req.headers()
                    .get_one("X-Real-IP")
                    .and_then(|ip| ip.parse().ok())
            })
            .or_else(|| req.client_ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        request::Outcome::Success(ClientIp(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_per_ip_and_refills_after_interval() {
        let limiter = RateLimiter::per_minute(2);
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let start = Instant::now();

        assert_eq!(limiter.check_at(a, start), Ok(()));
        assert_eq!(limiter.check_at(a, start), Ok(()));
        assert_eq!(limiter.check_at(a, start), Err(Status::TooManyRequests));
        assert_eq!(limiter.check_at(b, start), Ok(()));

        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.check_at(a, later), Ok(()));
    }

    #[test]
    fn zero_budget_rejects_everything() {
        let limiter = RateLimiter::per_minute(0);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(
            limiter.check_at(ip, Instant::now()),
            Err(Status::TooManyRequests)
        );
    }
}
