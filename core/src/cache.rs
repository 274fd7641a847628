//! Shared cache-aside client. One connection manager is opened at process start and
//! shared by ConfigResolver and RAGRetriever; both key their own namespace.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> redis::RedisResult<Option<String>> {
        self.conn.clone().get(key).await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> redis::RedisResult<()> {
        self.conn
            .clone()
            .set_ex(key, value, ttl.as_secs())
            .await
    }
}
