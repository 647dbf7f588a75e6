use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{keys, now_millis, ConnectionChange, PresenceRecord, PresenceStatus, SocketRegistry};
use crate::error::RegistryError;

/// Registry shared by every gateway process through Redis.
///
/// Each mutation is a `MULTI` pipeline so the socket-set size read back
/// belongs to the same atomic step as the `SADD`/`SREM`. That is what lets
/// exactly one process observe a 0 -> 1 or 1 -> 0 edge.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: MultiplexedConnection,
}

impl RedisRegistry {
    pub async fn connect(redis_url: &str) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SocketRegistry for RedisRegistry {
    async fn add_connection(
        &self,
        user_id: &str,
        socket_id: &str,
    ) -> Result<ConnectionChange, RegistryError> {
        let mut conn = self.conn.clone();
        let set_key = keys::user_sockets(user_id);

        let (added, count): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&set_key)
            .arg(socket_id)
            .cmd("SCARD")
            .arg(&set_key)
            .cmd("SET")
            .arg(keys::socket_user(socket_id))
            .arg(user_id)
            .ignore()
            .query_async::<_, (i64, i64)>(&mut conn)
            .await?;

        Ok(ConnectionChange {
            user_id: user_id.to_string(),
            changed: added > 0,
            remaining: count.max(0) as usize,
        })
    }

    async fn remove_connection(
        &self,
        socket_id: &str,
    ) -> Result<Option<ConnectionChange>, RegistryError> {
        let mut conn = self.conn.clone();
        let owner_key = keys::socket_user(socket_id);

        let owner: Option<String> = redis::cmd("GET")
            .arg(&owner_key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        let Some(user_id) = owner else {
            return Ok(None);
        };

        let set_key = keys::user_sockets(&user_id);
        let (removed, count, deleted): (i64, i64, i64) = redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(&set_key)
            .arg(socket_id)
            .cmd("SCARD")
            .arg(&set_key)
            .cmd("DEL")
            .arg(&owner_key)
            .query_async::<_, (i64, i64, i64)>(&mut conn)
            .await?;

        // A concurrent duplicate disconnect already did the work.
        if removed == 0 && deleted == 0 {
            return Ok(None);
        }

        Ok(Some(ConnectionChange {
            user_id,
            changed: removed > 0,
            remaining: count.max(0) as usize,
        }))
    }

    async fn get_sockets(&self, user_id: &str) -> Result<HashSet<String>, RegistryError> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = redis::cmd("SMEMBERS")
            .arg(keys::user_sockets(user_id))
            .query_async::<_, HashSet<String>>(&mut conn)
            .await?;
        Ok(members)
    }

    async fn get_owner(&self, socket_id: &str) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn.clone();
        let owner = redis::cmd("GET")
            .arg(keys::socket_user(socket_id))
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(owner)
    }

    async fn set_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(keys::presence(user_id))
            .arg("status")
            .arg(status.as_str())
            .arg("lastUpdated")
            .arg(now_millis())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, RegistryError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(keys::presence(user_id))
            .query_async::<_, HashMap<String, String>>(&mut conn)
            .await?;

        Ok(parse_presence_hash(&fields))
    }
}

/// Decode a `presence:{user}` hash. Missing or malformed fields mean "no record".
fn parse_presence_hash(fields: &HashMap<String, String>) -> Option<PresenceRecord> {
    let status = fields.get("status").and_then(|s| PresenceStatus::parse(s))?;
    let last_updated = fields
        .get("lastUpdated")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    Some(PresenceRecord {
        status,
        last_updated,
    })
}
