//! Challenge catalog.
//!
//! Persists challenge definitions and their tags in Postgres and fronts them
//! with the Redis caches from [`crate::index`]. Definitions change rarely, so
//! stale reads bounded by the cache TTL are acceptable; every mutation
//! invalidates exhaustively.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::{Error, Instancer, index};

/// A persisted challenge definition. Also the cache payload for
/// `chall:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub id: String,
    pub per_team: bool,
    pub cfg: serde_json::Value,
    pub lifetime: i64,
    pub boot_time: i64,
    pub name: String,
    pub description: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub is_category: bool,
}

/// Initialize the database schema, creating tables if they don't exist.
pub async fn init_schema(pg: &deadpool_postgres::Pool) -> Result<(), Error> {
    let client = pg.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY,
                per_team BOOLEAN NOT NULL,
                cfg JSONB NOT NULL,
                lifetime BIGINT NOT NULL,
                boot_time BIGINT NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                author TEXT NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create challenges table")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                challenge_id TEXT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_category BOOLEAN NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create tags table")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tags_challenge_id ON tags (challenge_id)
            "#,
            &[],
        )
        .await
        .context("failed to create tags index")?;

    // Add boot_time to databases predating it
    client
        .execute(
            r#"
            ALTER TABLE challenges ADD COLUMN IF NOT EXISTS boot_time BIGINT NOT NULL DEFAULT 0
            "#,
            &[],
        )
        .await
        .context("failed to add boot_time column")?;

    tracing::info!("database schema initialized");
    Ok(())
}

fn record_from_row(row: &Row) -> ChallengeRecord {
    ChallengeRecord {
        id: row.get("id"),
        per_team: row.get("per_team"),
        cfg: row.get("cfg"),
        lifetime: row.get("lifetime"),
        boot_time: row.get("boot_time"),
        name: row.get("name"),
        description: row.get("description"),
        author: row.get("author"),
    }
}

const RECORD_COLUMNS: &str = "id, per_team, cfg, lifetime, boot_time, name, description, author";

/// Insert a challenge and its tags in one transaction.
/// A colliding id fails with [`Error::DuplicateId`] and writes nothing.
pub async fn create(inst: &Instancer, record: &ChallengeRecord, tags: &[Tag]) -> Result<(), Error> {
    let mut client = inst.pg.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to begin transaction")?;

    let inserted = tx
        .execute(
            r#"
            INSERT INTO challenges (id, per_team, cfg, lifetime, boot_time, name, description, author)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            &[
                &record.id,
                &record.per_team,
                &record.cfg,
                &record.lifetime,
                &record.boot_time,
                &record.name,
                &record.description,
                &record.author,
            ],
        )
        .await;
    match inserted {
        Ok(_) => {}
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            return Err(Error::DuplicateId(record.id.clone()));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context("failed to insert challenge")
                .into());
        }
    }

    for tag in tags {
        tx.execute(
            r#"
            INSERT INTO tags (challenge_id, name, is_category) VALUES ($1, $2, $3)
            "#,
            &[&record.id, &tag.name, &tag.is_category],
        )
        .await
        .context("failed to insert tag")?;
    }

    tx.commit().await.context("failed to commit challenge")?;

    index::invalidate_challenge(&inst.redis, &record.id).await?;
    Ok(())
}

/// Get a challenge definition through the `chall:<id>` cache.
pub async fn fetch_record(
    inst: &Instancer,
    challenge_id: &str,
) -> Result<Option<ChallengeRecord>, Error> {
    let cache_key = format!("chall:{challenge_id}");
    if let Some(cached) = index::cache_get(&inst.redis, &cache_key).await? {
        return Ok(Some(serde_json::from_str(&cached)?));
    }

    let client = inst.pg.get().await.context("failed to get db connection")?;
    let row = client
        .query_opt(
            &format!("SELECT {RECORD_COLUMNS} FROM challenges WHERE id = $1"),
            &[&challenge_id],
        )
        .await
        .context("failed to query challenge")?;

    let Some(row) = row else { return Ok(None) };
    let record = record_from_row(&row);
    index::cache_set(&inst.redis, &cache_key, &serde_json::to_string(&record)?).await?;
    Ok(Some(record))
}

/// List every challenge definition with its tags, pre-warming the per-id
/// caches on the way. Order is unspecified.
pub async fn fetchall(inst: &Instancer) -> Result<Vec<(ChallengeRecord, Vec<Tag>)>, Error> {
    let ids: Vec<String> = match index::cache_get(&inst.redis, "all_challs").await? {
        Some(cached) => serde_json::from_str(&cached)?,
        None => {
            let client = inst.pg.get().await.context("failed to get db connection")?;
            let rows = client
                .query(
                    &format!("SELECT {RECORD_COLUMNS} FROM challenges"),
                    &[],
                )
                .await
                .context("failed to list challenges")?;

            let mut ids = Vec::with_capacity(rows.len());
            for row in &rows {
                let record = record_from_row(row);
                index::cache_set(
                    &inst.redis,
                    &format!("chall:{}", record.id),
                    &serde_json::to_string(&record)?,
                )
                .await?;
                ids.push(record.id);
            }
            index::cache_set(&inst.redis, "all_challs", &serde_json::to_string(&ids)?).await?;
            ids
        }
    };

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = fetch_record(inst, &id).await? {
            let tags = fetch_tags(inst, &id).await?;
            out.push((record, tags));
        }
    }
    Ok(out)
}

/// Get a challenge's tags through the `chall_tags:<id>` cache; category tags
/// sort before the rest, alphabetical within each class.
pub async fn fetch_tags(inst: &Instancer, challenge_id: &str) -> Result<Vec<Tag>, Error> {
    let cache_key = format!("chall_tags:{challenge_id}");
    if let Some(cached) = index::cache_get(&inst.redis, &cache_key).await? {
        return Ok(serde_json::from_str(&cached)?);
    }

    let client = inst.pg.get().await.context("failed to get db connection")?;
    let rows = client
        .query(
            r#"
            SELECT name, is_category FROM tags
            WHERE challenge_id = $1
            ORDER BY is_category DESC, name ASC
            "#,
            &[&challenge_id],
        )
        .await
        .context("failed to query tags")?;

    let tags: Vec<Tag> = rows
        .iter()
        .map(|row| Tag {
            name: row.get("name"),
            is_category: row.get("is_category"),
        })
        .collect();
    index::cache_set(&inst.redis, &cache_key, &serde_json::to_string(&tags)?).await?;
    Ok(tags)
}

/// Update lifetime, boot time, and metadata on an existing row. Changing
/// `cfg` or `per_team` requires delete + recreate. Only provided fields are
/// updated; returns false when the challenge does not exist.
pub async fn update(
    inst: &Instancer,
    challenge_id: &str,
    lifetime: Option<i64>,
    boot_time: Option<i64>,
    name: Option<&str>,
    description: Option<&str>,
    author: Option<&str>,
) -> Result<bool, Error> {
    let mut set_clauses = Vec::new();
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
    let mut param_idx = 1;

    if let Some(ref l) = lifetime {
        set_clauses.push(format!("lifetime = ${}", param_idx));
        params.push(l);
        param_idx += 1;
    }
    if let Some(ref b) = boot_time {
        set_clauses.push(format!("boot_time = ${}", param_idx));
        params.push(b);
        param_idx += 1;
    }
    if let Some(ref n) = name {
        set_clauses.push(format!("name = ${}", param_idx));
        params.push(n);
        param_idx += 1;
    }
    if let Some(ref d) = description {
        set_clauses.push(format!("description = ${}", param_idx));
        params.push(d);
        param_idx += 1;
    }
    if let Some(ref a) = author {
        set_clauses.push(format!("author = ${}", param_idx));
        params.push(a);
        param_idx += 1;
    }

    if set_clauses.is_empty() {
        let client = inst.pg.get().await.context("failed to get db connection")?;
        let row = client
            .query_opt("SELECT id FROM challenges WHERE id = $1", &[&challenge_id])
            .await
            .context("failed to query challenge")?;
        return Ok(row.is_some());
    }

    let query = format!(
        "UPDATE challenges SET {} WHERE id = ${}",
        set_clauses.join(", "),
        param_idx
    );
    params.push(&challenge_id);

    let client = inst.pg.get().await.context("failed to get db connection")?;
    let updated = client
        .execute(&query, &params)
        .await
        .context("failed to update challenge")?;

    index::invalidate_challenge(&inst.redis, challenge_id).await?;
    Ok(updated > 0)
}

/// Delete a challenge and its tags. Returns whether a row was removed.
pub async fn delete(inst: &Instancer, challenge_id: &str) -> Result<bool, Error> {
    let mut client = inst.pg.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to begin transaction")?;

    tx.execute("DELETE FROM tags WHERE challenge_id = $1", &[&challenge_id])
        .await
        .context("failed to delete tags")?;
    let deleted = tx
        .execute("DELETE FROM challenges WHERE id = $1", &[&challenge_id])
        .await
        .context("failed to delete challenge")?;

    tx.commit().await.context("failed to commit delete")?;

    index::invalidate_challenge(&inst.redis, challenge_id).await?;
    Ok(deleted > 0)
}

/// Atomically replace a challenge's tags.
pub async fn replace_tags(inst: &Instancer, challenge_id: &str, tags: &[Tag]) -> Result<(), Error> {
    let mut client = inst.pg.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to begin transaction")?;

    tx.execute("DELETE FROM tags WHERE challenge_id = $1", &[&challenge_id])
        .await
        .context("failed to delete tags")?;
    for tag in tags {
        tx.execute(
            "INSERT INTO tags (challenge_id, name, is_category) VALUES ($1, $2, $3)",
            &[&challenge_id, &tag.name, &tag.is_category],
        )
        .await
        .context("failed to insert tag")?;
    }

    tx.commit().await.context("failed to commit tags")?;

    index::invalidate_challenge(&inst.redis, challenge_id).await?;
    Ok(())
}
