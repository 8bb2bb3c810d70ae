//! Redis broker backend

use super::{Broker, BrokerError, BrokerResult, ConsumerInfo, StreamEntry};
use crate::config::Settings;
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::streams::{StreamInfoConsumersReply, StreamReadReply};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Redis broker backend
#[derive(Clone)]
pub struct RedisBroker {
    pool: Arc<Pool>,
}

impl RedisBroker {
    /// Connect to Redis and verify the connection
    pub async fn connect(settings: &Settings) -> BrokerResult<Self> {
        info!("Initializing Redis broker with pool size {}", settings.pool_size);

        let mut pool_config = Config::from_url(settings.broker_url());
        let mut limits = deadpool_redis::PoolConfig::new(settings.pool_size);
        limits.timeouts.wait = Some(Duration::from_secs(10));
        limits.timeouts.create = Some(Duration::from_secs(10));
        limits.timeouts.recycle = Some(Duration::from_secs(10));
        pool_config.pool = Some(limits);

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::connection(format!("Failed to create Redis pool: {}", e)))?;

        let broker = Self {
            pool: Arc::new(pool),
        };

        // Test connection
        let mut conn = broker.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::connection(format!("Failed to connect to Redis: {}", e)))?;

        Ok(broker)
    }

    async fn conn(&self) -> BrokerResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::connection(e.to_string()))
    }
}

fn block_millis(block: Duration) -> Option<u64> {
    if block.is_zero() {
        None
    } else {
        Some(block.as_millis().max(1) as u64)
    }
}

fn decode_reply(reply: Option<StreamReadReply>) -> BrokerResult<Vec<StreamEntry>> {
    let Some(reply) = reply else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            let mut fields = HashMap::with_capacity(id.map.len());
            for (name, value) in id.map {
                let bytes: Vec<u8> = redis::from_redis_value(&value).map_err(BrokerError::decode)?;
                fields.insert(name, bytes);
            }
            entries.push(StreamEntry { id: id.id, fields });
        }
    }
    Ok(entries)
}

#[async_trait]
impl Broker for RedisBroker {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("SET", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("GET", e))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BrokerResult<bool> {
        let mut conn = self.conn().await?;
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("PEXPIRE", e))?;
        Ok(updated)
    }

    async fn xadd(&self, stream: &str, fields: &[(&str, &[u8])]) -> BrokerResult<String> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(*name).arg(*value);
        }
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XADD", e))?;
        Ok(id)
    }

    async fn xlen(&self, stream: &str) -> BrokerResult<usize> {
        let mut conn = self.conn().await?;
        let len: usize = redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XLEN", e))?;
        Ok(len)
    }

    async fn xread(
        &self,
        stream: &str,
        after: &str,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("XREAD");
        if let Some(ms) = block_millis(block) {
            cmd.arg("BLOCK").arg(ms);
        }
        cmd.arg("STREAMS").arg(stream).arg(after);
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XREAD", e))?;
        decode_reply(reply)
    }

    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(ms) = block_millis(block) {
            cmd.arg("BLOCK").arg(ms);
        }
        // Tasks are never acknowledged, so no pending entries accumulate
        cmd.arg("NOACK").arg("STREAMS").arg(stream).arg(">");
        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await.map_err(|e| {
            if e.code() == Some("NOGROUP") {
                BrokerError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                }
            } else {
                BrokerError::command("XREADGROUP", e)
            }
        })?;
        decode_reply(reply)
    }

    async fn xdel(&self, stream: &str, ids: &[String]) -> BrokerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let deleted: usize = redis::cmd("XDEL")
            .arg(stream)
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XDEL", e))?;
        Ok(deleted)
    }

    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool> {
        let mut conn = self.conn().await?;
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Group {} already exists on stream {}", group, stream);
                Ok(false)
            }
            Err(e) => Err(BrokerError::command("XGROUP CREATE", e)),
        }
    }

    async fn consumers(&self, stream: &str, group: &str) -> BrokerResult<Vec<ConsumerInfo>> {
        let mut conn = self.conn().await?;
        let reply: StreamInfoConsumersReply = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XINFO CONSUMERS", e))?;
        Ok(reply
            .consumers
            .into_iter()
            .map(|c| ConsumerInfo {
                name: c.name,
                pending: c.pending,
                idle: Duration::from_millis(c.idle as u64),
            })
            .collect())
    }

    async fn delete_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> BrokerResult<usize> {
        let mut conn = self.conn().await?;
        let pending: usize = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("XGROUP DELCONSUMER", e))?;
        Ok(pending)
    }
}
