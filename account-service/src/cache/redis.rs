use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use super::{CacheBatch, CacheError, CacheOp, CacheStore, RangeQuery, SortDirection};
use crate::config::RedisConfig;

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            e
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

fn score_bound(after: Option<f64>, open_end: &str) -> String {
    match after {
        Some(score) => format!("({}", score),
        None => open_end.to_string(),
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("EXISTS").arg(key);
        }
        let found: Vec<bool> = pipe.query_async(&mut conn).await?;
        Ok(found)
    }

    async fn apply(&self, batch: CacheBatch) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                CacheOp::Set {
                    key,
                    value,
                    ttl_secs,
                } => {
                    pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs).ignore();
                }
                CacheOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                CacheOp::SortedAdd {
                    key,
                    member,
                    score,
                    ttl_secs,
                } => {
                    pipe.cmd("ZADD").arg(&key).arg(score).arg(member).ignore();
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
                }
                CacheOp::SortedRemove { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn range(&self, key: &str, query: &RangeQuery) -> Result<Vec<(String, f64)>, CacheError> {
        let mut conn = self.manager.clone();
        let mut cmd = match query.direction {
            SortDirection::Ascending => {
                let mut cmd = redis::cmd("ZRANGEBYSCORE");
                cmd.arg(key).arg(score_bound(query.after, "-inf")).arg("+inf");
                cmd
            }
            SortDirection::Descending => {
                let mut cmd = redis::cmd("ZREVRANGEBYSCORE");
                cmd.arg(key).arg(score_bound(query.after, "+inf")).arg("-inf");
                cmd
            }
        };
        cmd.arg("WITHSCORES").arg("LIMIT").arg(0).arg(query.limit);
        let members: Vec<(String, f64)> = cmd.query_async(&mut conn).await?;
        Ok(members)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert_eq!(score_bound(None, "-inf"), "-inf");
        assert_eq!(score_bound(Some(42.0), "+inf"), "(42");
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_batch_round_trip() {
        let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let cache = RedisCache::new(&RedisConfig { url }).await.unwrap();
        cache.health_check().await.unwrap();

        let key = format!("test:{}", uuid::Uuid::new_v4().simple());
        let mut batch = CacheBatch::new();
        batch.push(CacheOp::Set {
            key: key.clone(),
            value: "v".into(),
            ttl_secs: 30,
        });
        batch.push(CacheOp::SortedAdd {
            key: format!("{}:list", key),
            member: "a".into(),
            score: 1.0,
            ttl_secs: 30,
        });
        cache.apply(batch).await.unwrap();

        let values = cache.get_many(&[key.clone()]).await.unwrap();
        assert_eq!(values, vec![Some("v".to_string())]);

        let members = cache
            .range(
                &format!("{}:list", key),
                &RangeQuery {
                    direction: SortDirection::Ascending,
                    after: None,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(members, vec![("a".to_string(), 1.0)]);
    }
}
