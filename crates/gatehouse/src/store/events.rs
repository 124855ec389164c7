//! Append-only challenge event log.
//!
//! Events land in a per-scope sorted set keyed by unix timestamp and are
//! never mutated; the read side aggregates a trailing window into
//! statistics.

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use bastion_common::constants::{LOG_RETENTION_SECS, redis_keys};
use bastion_common::{ChallengeEvent, ChallengeOutcome, ChallengeReason};

/// Challenge event log
pub struct EventLog;

impl EventLog {
    pub fn new() -> Self {
        Self
    }

    /// Build an event stamped now
    pub fn event(
        &self,
        host_id: Option<i64>,
        client_ip: &str,
        user_agent: &str,
        outcome: ChallengeOutcome,
        reason: ChallengeReason,
    ) -> ChallengeEvent {
        ChallengeEvent {
            event_id: format!("{:016x}", rand::rng().random::<u64>()),
            host_id,
            client_ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            outcome,
            reason,
            score: None,
            solve_time_ms: None,
            at: Utc::now(),
        }
    }

    /// Append an event and trim entries past the retention horizon
    pub async fn record(&self, redis: &mut ConnectionManager, event: &ChallengeEvent) -> Result<()> {
        let key = log_key(event.host_id);
        let timestamp = event.at.timestamp();

        let _: () = redis.zadd(&key, event.to_json()?, timestamp).await?;
        let _: () = redis
            .zrembyscore(&key, "-inf", timestamp - LOG_RETENTION_SECS)
            .await?;

        Ok(())
    }

    /// Events for a scope within the trailing window
    pub async fn window(
        &self,
        redis: &mut ConnectionManager,
        host_id: Option<i64>,
        hours: i64,
    ) -> Result<Vec<ChallengeEvent>> {
        let key = log_key(host_id);
        let now = Utc::now().timestamp();
        let from = now - hours * 3_600;

        let raw: Vec<String> = redis.zrangebyscore(&key, from, now).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| ChallengeEvent::from_json(entry).ok())
            .collect())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn log_key(host_id: Option<i64>) -> String {
    match host_id {
        Some(id) => format!("{}host:{}", redis_keys::LOG_PREFIX, id),
        None => format!("{}global", redis_keys::LOG_PREFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_unique_ids() {
        let log = EventLog::new();
        let a = log.event(
            None,
            "203.0.113.9",
            "ua",
            ChallengeOutcome::Presented,
            ChallengeReason::BotFilter,
        );
        let b = log.event(
            None,
            "203.0.113.9",
            "ua",
            ChallengeOutcome::Presented,
            ChallengeReason::BotFilter,
        );
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn log_keys_separate_scopes() {
        assert_eq!(log_key(None), "challenge:log:global");
        assert_eq!(log_key(Some(4)), "challenge:log:host:4");
    }
}
