//! Redis backend.
//!
//! Layout:
//! - `mesh:clusters`          hash  url -> JSON row
//! - `mesh:clusters:order`    zset  url scored by id (storage order)
//! - `mesh:clusters:seq`      id counter
//! - `mesh:clusters:blocked`  set of blocked urls
//! - `mesh:chain`             hash { chain, updated_at }
//! - `mesh:access_errors`     capped list of JSON entries, newest first

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use mesh_common::constants::{ACCESS_ERRORS_CAP, redis_keys};
use mesh_common::{AccessErrorEntry, ChainState, Cluster, MeshError, MeshResult};

use super::{Backend, ClusterUpdate};

/// Redis-backed store (auto-reconnecting)
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

fn storage_err(e: redis::RedisError) -> MeshError {
    MeshError::Storage(e.to_string())
}

fn decode_row(data: &str) -> MeshResult<Cluster> {
    serde_json::from_str(data).map_err(|e| MeshError::Storage(format!("Corrupt cluster row: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> MeshResult<String> {
    serde_json::to_string(value).map_err(|e| MeshError::Internal(e.to_string()))
}

impl RedisBackend {
    /// Connect with a connection manager (handles reconnection)
    pub async fn connect(redis_url: &str) -> MeshResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| MeshError::Config(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MeshError::Storage(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> MeshResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_cluster(&self, url: &str) -> MeshResult<Option<Cluster>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .hget(redis_keys::CLUSTERS, url)
            .await
            .map_err(storage_err)?;

        data.as_deref().map(decode_row).transpose()
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> MeshResult<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn
            .incr(redis_keys::CLUSTERS_SEQ, 1u64)
            .await
            .map_err(storage_err)?;

        let mut row = cluster.clone();
        row.id = Some(id);
        let json = encode(&row)?;

        let _: () = conn
            .hset(redis_keys::CLUSTERS, &row.url, json)
            .await
            .map_err(storage_err)?;
        let _: () = conn
            .zadd(redis_keys::CLUSTERS_ORDER, &row.url, id)
            .await
            .map_err(storage_err)?;

        Ok(id)
    }

    async fn update_cluster(&self, url: &str, update: &ClusterUpdate) -> MeshResult<bool> {
        let Some(mut row) = self.get_cluster(url).await? else {
            return Ok(false);
        };
        update.apply(&mut row);

        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(redis_keys::CLUSTERS, url, encode(&row)?)
            .await
            .map_err(storage_err)?;
        Ok(true)
    }

    async fn delete_cluster(&self, url: &str) -> MeshResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .hdel(redis_keys::CLUSTERS, url)
            .await
            .map_err(storage_err)?;
        let _: () = conn
            .zrem(redis_keys::CLUSTERS_ORDER, url)
            .await
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn list_clusters(&self) -> MeshResult<Vec<Cluster>> {
        let mut conn = self.conn.clone();
        let urls: Vec<String> = conn
            .zrange(redis_keys::CLUSTERS_ORDER, 0, -1)
            .await
            .map_err(storage_err)?;
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        // HMGET always replies with an array, even for a single field
        let rows: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(redis_keys::CLUSTERS)
            .arg(&urls)
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .flatten()
            .map(|data| decode_row(data))
            .collect()
    }

    async fn count_clusters(&self) -> MeshResult<u64> {
        let mut conn = self.conn.clone();
        conn.hlen(redis_keys::CLUSTERS).await.map_err(storage_err)
    }

    async fn block_url(&self, url: &str) -> MeshResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(redis_keys::CLUSTERS_BLOCKED, url)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn is_blocked(&self, url: &str) -> MeshResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(redis_keys::CLUSTERS_BLOCKED, url)
            .await
            .map_err(storage_err)
    }

    async fn list_blocked(&self) -> MeshResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut urls: Vec<String> = conn
            .smembers(redis_keys::CLUSTERS_BLOCKED)
            .await
            .map_err(storage_err)?;
        urls.sort();
        Ok(urls)
    }

    async fn load_chain(&self) -> MeshResult<ChainState> {
        let mut conn = self.conn.clone();
        let (chain, updated_at): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
            .arg(redis_keys::CHAIN)
            .arg("chain")
            .arg("updated_at")
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;

        Ok(ChainState::new(chain.unwrap_or(0), updated_at.unwrap_or(0)))
    }

    async fn save_chain(&self, state: ChainState) -> MeshResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HSET")
            .arg(redis_keys::CHAIN)
            .arg("chain")
            .arg(state.chain)
            .arg("updated_at")
            .arg(state.updated_at)
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn log_access_error(&self, entry: &AccessErrorEntry) -> MeshResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(redis_keys::ACCESS_ERRORS, encode(entry)?)
            .await
            .map_err(storage_err)?;
        let _: () = conn
            .ltrim(redis_keys::ACCESS_ERRORS, 0, ACCESS_ERRORS_CAP - 1)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn access_errors(&self, limit: usize) -> MeshResult<Vec<AccessErrorEntry>> {
        let limit = limit.min(ACCESS_ERRORS_CAP as usize);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(redis_keys::ACCESS_ERRORS, 0, limit as isize - 1)
            .await
            .map_err(storage_err)?;

        // Skip entries written by an incompatible version
        Ok(raw
            .iter()
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect())
    }
}
