//! Bypass token persistence and lookup.
//!
//! Only the SHA-256 digest of the opaque token value is ever stored; the
//! raw value is handed to the caller once at issuance and cannot be
//! recovered afterwards. Records outlive their expiry by a retention
//! grace window before the purge sweep deletes them.

use anyhow::Result;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use bastion_common::constants::redis_keys;
use bastion_common::{ChallengeReason, ChallengeToken};

/// Raw token value plus its stored record, returned exactly once at
/// issuance.
pub struct IssuedToken {
    pub raw: String,
    pub record: ChallengeToken,
}

/// Bypass token store
pub struct TokenStore {
    /// Seconds an expired record is retained before purge
    retention_grace_secs: u64,
}

impl TokenStore {
    pub fn new(retention_grace_secs: u64) -> Self {
        Self {
            retention_grace_secs,
        }
    }

    /// Issue a fresh bypass token for a verified client
    pub async fn issue(
        &self,
        redis: &mut ConnectionManager,
        host_id: Option<i64>,
        client_ip: &str,
        user_agent: &str,
        reason: ChallengeReason,
        validity_secs: u64,
    ) -> Result<IssuedToken> {
        let raw = generate_token_value();
        let record = new_record(
            host_id,
            client_ip,
            user_agent,
            reason,
            validity_secs,
            Utc::now(),
            &raw,
        );

        let ttl = validity_secs + self.retention_grace_secs;
        let key = record_key(&record.token_hash);
        redis
            .set_ex::<_, _, ()>(&key, serde_json::to_string(&record)?, ttl)
            .await?;
        redis
            .set_ex::<_, _, ()>(id_key(&record.id), &record.token_hash, ttl)
            .await?;
        let _: () = redis.sadd(ip_key(client_ip), &record.token_hash).await?;
        let _: () = redis.expire(ip_key(client_ip), ttl as i64).await?;
        let _: () = redis
            .sadd(redis_keys::TOKEN_INDEX, &record.token_hash)
            .await?;

        tracing::debug!(
            token_id = %record.id,
            host = ?host_id,
            client_ip = %client_ip,
            validity_secs,
            "Issued bypass token"
        );

        Ok(IssuedToken { raw, record })
    }

    /// Look up a presented raw token. A match is a side-effecting read:
    /// use count and last-used are updated. Every failure sub-reason
    /// (unknown, expired, revoked, wrong IP, wrong host) collapses to
    /// `None` so callers cannot probe which one applied.
    pub async fn validate(
        &self,
        redis: &mut ConnectionManager,
        raw: &str,
        client_ip: &str,
        host_id: Option<i64>,
    ) -> Result<Option<ChallengeToken>> {
        let key = record_key(&hash_token(raw));
        let data: Option<String> = redis.get(&key).await?;
        let Some(data) = data else {
            return Ok(None);
        };

        let mut record: ChallengeToken = serde_json::from_str(&data)?;
        if !record.usable_by(client_ip, host_id, Utc::now()) {
            return Ok(None);
        }

        record.use_count += 1;
        record.last_used_at = Some(Utc::now());
        rewrite_preserving_ttl(redis, &key, &record).await?;

        Ok(Some(record))
    }

    /// Fetch the record for a raw value without side effects. Used to
    /// distinguish expiry in server-side statistics; the HTTP surface
    /// stays a uniform deny.
    pub(crate) async fn peek(
        &self,
        redis: &mut ConnectionManager,
        raw: &str,
    ) -> Result<Option<ChallengeToken>> {
        let data: Option<String> = redis.get(record_key(&hash_token(raw))).await?;
        Ok(data.and_then(|d| serde_json::from_str(&d).ok()))
    }

    /// Revoke one token by its administrative id. Returns false when the
    /// id is unknown or the token was already revoked.
    pub async fn revoke(
        &self,
        redis: &mut ConnectionManager,
        token_id: &str,
        reason: &str,
    ) -> Result<bool> {
        let hash: Option<String> = redis.get(id_key(token_id)).await?;
        let Some(hash) = hash else {
            return Ok(false);
        };
        self.revoke_by_hash(redis, &hash, reason).await
    }

    /// Revoke every live token issued to an IP. Idempotent; returns the
    /// number of tokens newly revoked.
    pub async fn revoke_all_for_ip(
        &self,
        redis: &mut ConnectionManager,
        client_ip: &str,
        reason: &str,
    ) -> Result<u64> {
        let hashes: Vec<String> = redis.smembers(ip_key(client_ip)).await?;
        let mut revoked = 0u64;
        for hash in hashes {
            if self.revoke_by_hash(redis, &hash, reason).await? {
                revoked += 1;
            }
        }

        if revoked > 0 {
            tracing::info!(client_ip = %client_ip, revoked, reason = %reason, "Revoked all tokens for IP");
        }
        Ok(revoked)
    }

    async fn revoke_by_hash(
        &self,
        redis: &mut ConnectionManager,
        hash: &str,
        reason: &str,
    ) -> Result<bool> {
        let key = record_key(hash);
        let data: Option<String> = redis.get(&key).await?;
        let Some(data) = data else {
            return Ok(false);
        };

        let mut record: ChallengeToken = serde_json::from_str(&data)?;
        if record.revoked {
            return Ok(false);
        }

        record.revoke(reason, Utc::now());
        rewrite_preserving_ttl(redis, &key, &record).await?;

        tracing::info!(token_id = %record.id, reason = %reason, "Bypass token revoked");
        Ok(true)
    }

    /// Count non-revoked, unexpired tokens. With a host, tokens scoped to
    /// that host and global tokens both count; without one, everything
    /// counts.
    pub async fn count_active(
        &self,
        redis: &mut ConnectionManager,
        host_id: Option<i64>,
    ) -> Result<u64> {
        let hashes: Vec<String> = redis.smembers(redis_keys::TOKEN_INDEX).await?;
        let now = Utc::now();
        let mut active = 0u64;

        for hash in hashes {
            let data: Option<String> = redis.get(record_key(&hash)).await?;
            let Some(data) = data else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<ChallengeToken>(&data) else {
                continue;
            };
            let in_scope = match host_id {
                None => true,
                Some(_) => record.host_id.is_none() || record.host_id == host_id,
            };
            if in_scope && record.is_active_at(now) {
                active += 1;
            }
        }

        Ok(active)
    }

    /// Delete token records whose expiry is older than the retention
    /// grace window, and prune index entries whose record already fell to
    /// its Redis TTL. Returns the number of records deleted.
    pub async fn purge_expired(&self, redis: &mut ConnectionManager) -> Result<u64> {
        let hashes: Vec<String> = redis.smembers(redis_keys::TOKEN_INDEX).await?;
        let now = Utc::now();
        let mut purged = 0u64;

        for hash in hashes {
            let key = record_key(&hash);
            let data: Option<String> = redis.get(&key).await?;
            let Some(data) = data else {
                // TTL already removed the record; drop the dangling index entry
                let _: () = redis.srem(redis_keys::TOKEN_INDEX, &hash).await?;
                continue;
            };

            let Ok(record) = serde_json::from_str::<ChallengeToken>(&data) else {
                let _: () = redis.del(&key).await?;
                let _: () = redis.srem(redis_keys::TOKEN_INDEX, &hash).await?;
                purged += 1;
                continue;
            };

            if record.past_retention(self.retention_grace_secs, now) {
                let _: () = redis.del(&key).await?;
                let _: () = redis.del(id_key(&record.id)).await?;
                let _: () = redis.srem(ip_key(&record.client_ip), &hash).await?;
                let _: () = redis.srem(redis_keys::TOKEN_INDEX, &hash).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "Purged expired bypass tokens");
        }
        Ok(purged)
    }
}

/// Background sweep deleting token records past the retention grace
/// window. Idempotent and safe to skip or overlap.
pub async fn purge_worker(
    tokens: Arc<TokenStore>,
    mut redis: ConnectionManager,
    interval_secs: u64,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = tokens.purge_expired(&mut redis).await {
                    tracing::warn!(error = %err, "Token purge sweep failed");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Purge worker shutting down");
                break;
            }
        }
    }
}

/// Rewrite a record in place without extending its remaining lifetime
async fn rewrite_preserving_ttl(
    redis: &mut ConnectionManager,
    key: &str,
    record: &ChallengeToken,
) -> Result<()> {
    let ttl: i64 = redis.ttl(key).await?;
    if ttl > 0 {
        redis
            .set_ex::<_, _, ()>(key, serde_json::to_string(record)?, ttl as u64)
            .await?;
    }
    Ok(())
}

/// Build the stored record for a freshly generated raw value
fn new_record(
    host_id: Option<i64>,
    client_ip: &str,
    user_agent: &str,
    reason: ChallengeReason,
    validity_secs: u64,
    now: DateTime<Utc>,
    raw: &str,
) -> ChallengeToken {
    ChallengeToken {
        id: generate_token_id(),
        host_id,
        token_hash: hash_token(raw),
        client_ip: client_ip.to_string(),
        user_agent: user_agent.to_string(),
        reason,
        issued_at: now,
        expires_at: now + Duration::seconds(validity_secs as i64),
        use_count: 0,
        last_used_at: None,
        revoked: false,
        revoked_at: None,
        revoked_reason: None,
    }
}

/// Opaque token value: 256 bits of CSPRNG material, base64url encoded
fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_token_id() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

/// Hex SHA-256 digest of a raw token value. Used only as the storage key
/// material, nothing else.
fn hash_token(raw: &str) -> String {
    Sha256::digest(raw.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn record_key(hash: &str) -> String {
    format!("{}{}", redis_keys::TOKEN_PREFIX, hash)
}

fn id_key(id: &str) -> String {
    format!("{}{}", redis_keys::TOKEN_ID_PREFIX, id)
}

fn ip_key(ip: &str) -> String {
    format!("{}{}", redis_keys::TOKEN_IP_PREFIX, ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256_and_deterministic() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
        // Known vector for "abc"
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn stored_record_never_contains_the_raw_value() {
        let raw = generate_token_value();
        let record = new_record(
            Some(3),
            "203.0.113.9",
            "Mozilla/5.0",
            ChallengeReason::BotFilter,
            600,
            Utc::now(),
            &raw,
        );

        let stored = serde_json::to_string(&record).unwrap();
        assert!(!stored.contains(&raw));
        assert_eq!(record.token_hash, hash_token(&raw));
        assert_ne!(record.token_hash, raw);
    }

    #[test]
    fn record_expiry_matches_requested_validity() {
        let now = Utc::now();
        let record = new_record(
            None,
            "203.0.113.9",
            "curl/8.0",
            ChallengeReason::GeoRestriction,
            3_600,
            now,
            "raw-value",
        );

        assert_eq!(record.expires_at - record.issued_at, Duration::seconds(3_600));
        assert_eq!(record.use_count, 0);
        assert!(!record.revoked);
    }

    #[test]
    fn token_values_are_unique_and_urlsafe() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes base64url, unpadded
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn key_layout_keeps_namespaces_apart() {
        // Record keys are hex digests, so they can never collide with the
        // id: or ip: sub-namespaces.
        assert_eq!(record_key("aa"), "challenge:token:aa");
        assert_eq!(id_key("1"), "challenge:token:id:1");
        assert_eq!(ip_key("1.2.3.4"), "challenge:token:ip:1.2.3.4");
    }
}
