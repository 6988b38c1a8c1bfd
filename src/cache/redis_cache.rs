use super::{Cache, CacheError};
use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use std::time::Duration;
use tracing::{Instrument, debug, info_span};

// KEYS[1] = key, ARGV[1] = "1" when a current value is expected,
// ARGV[2] = expected value, ARGV[3] = new value, ARGV[4] = ttl in milliseconds.
// New keys get the ttl, existing keys keep theirs.
const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[3], 'KEEPTTL')
    return 1
end
if current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
";

/// Redis-backed cache sharing one auto-reconnecting [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    compare_and_swap: Script,
}

impl RedisCache {
    /// Open a managed connection to `redis_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);
        let client = Client::open(redis_url)?;
        let manager = client.get_connection_manager_with_config(config).await?;

        Ok(Self {
            manager,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn command_span(command: &'static str, key: &str) -> tracing::Span {
    info_span!(
        "cache.command",
        db.system = "redis",
        db.operation = command,
        cache.key = key
    )
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection();
        let value: Option<Vec<u8>> = conn.get(key).instrument(command_span("GET", key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let (): () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .instrument(command_span("SET", key))
            .await?;
        debug!(key, ttl_seconds = ttl.as_secs(), "cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let removed: i64 = conn.del(key).instrument(command_span("DEL", key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let found: bool = conn
            .exists(key)
            .instrument(command_span("EXISTS", key))
            .await?;
        Ok(found)
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .instrument(command_span("GETDEL", key))
            .await?;
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .instrument(command_span("EVALSHA", key))
            .await?;
        Ok(swapped == 1)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(command_span("PING", ""))
            .await?;
        Ok(())
    }
}
