//! Embedded SQLite backend (via rusqlite).
//!
//! A file-backed database in WAL mode with foreign keys enforced, so the
//! referential behaviour matches the CockroachDB schema. Each `connect` opens
//! a fresh connection to the same file, which lets load-driver workers own a
//! connection each.

use super::{ids_in_input_order, BenchBackend, InsertMode, PostRow, Tables};
use crate::populate::{NewPost, UserRecord};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Raw connection, for checks that bypass the adapter.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Configure a connection: WAL for concurrent readers, FK enforcement.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // Set before anything that may need a lock.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow<i64>> {
    Ok(PostRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: row.get(3)?,
    })
}

impl BenchBackend for SqliteBackend {
    type Id = i64;
    type Config = SqliteConfig;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(config: &SqliteConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)
            .with_context(|| format!("open SQLite database {}", config.path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    fn reset_tables(&mut self, t: &Tables) -> Result<()> {
        let email = if t.with_email {
            "email TEXT UNIQUE NOT NULL,"
        } else {
            ""
        };
        self.conn
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {posts};
                 DROP TABLE IF EXISTS {users};
                 CREATE TABLE {users} (
                     id         INTEGER PRIMARY KEY AUTOINCREMENT,
                     username   TEXT UNIQUE NOT NULL,
                     {email}
                     created_at TEXT DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE TABLE {posts} (
                     id         INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id    INTEGER REFERENCES {users}(id),
                     content    TEXT,
                     created_at TEXT DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE INDEX idx_{posts}_user_created ON {posts} (user_id, created_at DESC);",
                users = t.users,
                posts = t.posts,
            ))
            .with_context(|| format!("reset {}/{}", t.users, t.posts))?;
        Ok(())
    }

    fn insert_users(
        &mut self,
        t: &Tables,
        users: &[UserRecord],
        mode: InsertMode,
    ) -> Result<Vec<i64>> {
        let cols = if t.with_email { 2 } else { 1 };
        let mut returned = HashMap::with_capacity(users.len());
        let tx = self.conn.transaction()?;
        for chunk in users.chunks(mode.chunk_size()) {
            let values = (0..chunk.len())
                .map(|i| format!("({})", placeholders(i * cols + 1, cols)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = if t.with_email {
                format!(
                    "INSERT INTO {} (username, email) VALUES {values} RETURNING username, id",
                    t.users
                )
            } else {
                format!(
                    "INSERT INTO {} (username) VALUES {values} RETURNING username, id",
                    t.users
                )
            };
            let mut args: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * cols);
            for u in chunk {
                args.push(&u.username);
                if t.with_email {
                    args.push(&u.email);
                }
            }
            let mut stmt = tx.prepare_cached(&sql)?;
            let rows = stmt.query_map(&*args, |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (name, id) = row?;
                returned.insert(name, id);
            }
        }
        tx.commit()?;
        ids_in_input_order(users, returned)
    }

    fn insert_posts(
        &mut self,
        t: &Tables,
        posts: &[NewPost<i64>],
        mode: InsertMode,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for chunk in posts.chunks(mode.chunk_size()) {
            let values = (0..chunk.len())
                .map(|i| {
                    let b = i * 3;
                    format!(
                        "(?{}, ?{}, COALESCE(?{}, CURRENT_TIMESTAMP))",
                        b + 1,
                        b + 2,
                        b + 3
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} (user_id, content, created_at) VALUES {values}",
                t.posts
            );
            let mut args: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 3);
            for p in chunk {
                args.push(&p.user_id);
                args.push(&p.content);
                args.push(&p.created_at);
            }
            tx.prepare_cached(&sql)?.execute(&*args)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_user(&mut self, t: &Tables, username: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT id, username FROM {} WHERE username = ?1", t.users))?;
        let id = stmt
            .query_row(params![username], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    fn usernames(&mut self, t: &Tables) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT username FROM {}", t.users))?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn post_ids(&mut self, t: &Tables, limit: usize) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {} LIMIT ?1", t.posts))?;
        let ids = stmt
            .query_map(params![limit as i64], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn update_user_emails(&mut self, t: &Tables, updates: &[(i64, String)]) -> Result<()> {
        update_from_values(&mut self.conn, t.users, "email", updates)
    }

    fn update_post_contents(&mut self, t: &Tables, updates: &[(i64, String)]) -> Result<()> {
        update_from_values(&mut self.conn, t.posts, "content", updates)
    }

    fn delete_users(&mut self, t: &Tables, ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (table, column) in [(t.posts, "user_id"), (t.users, "id")] {
            for chunk in ids.chunks(super::DEFAULT_CHUNK) {
                let sql = format!(
                    "DELETE FROM {table} WHERE {column} IN ({})",
                    placeholders(1, chunk.len())
                );
                let args: Vec<&dyn ToSql> = chunk.iter().map(|id| id as &dyn ToSql).collect();
                tx.execute(&sql, &*args)
                    .with_context(|| format!("delete from {table}"))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn latest_posts(&mut self, t: &Tables, user: &i64, limit: usize) -> Result<Vec<PostRow<i64>>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT id, user_id, content, created_at FROM {} \
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            t.posts
        ))?;
        let rows = stmt
            .query_map(params![user, limit as i64], read_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn posts_since(
        &mut self,
        t: &Tables,
        user: &i64,
        since: NaiveDateTime,
    ) -> Result<Vec<PostRow<i64>>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT id, user_id, content, created_at FROM {} \
             WHERE user_id = ?1 AND created_at >= ?2 ORDER BY created_at DESC",
            t.posts
        ))?;
        let rows = stmt
            .query_map(params![user, since], read_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count_posts(&mut self, t: &Tables, user: &i64) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", t.posts),
            params![user],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

/// `UPDATE … FROM (VALUES …)` join, one statement per page.
fn update_from_values(
    conn: &mut Connection,
    table: &str,
    column: &str,
    updates: &[(i64, String)],
) -> Result<()> {
    let tx = conn.transaction()?;
    for chunk in updates.chunks(super::DEFAULT_CHUNK) {
        let values = (0..chunk.len())
            .map(|i| format!("({})", placeholders(i * 2 + 1, 2)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "WITH v(id, val) AS (VALUES {values}) \
             UPDATE {table} SET {column} = v.val FROM v WHERE {table}.id = v.id"
        );
        let mut args: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
        for (id, val) in chunk {
            args.push(id);
            args.push(val);
        }
        tx.execute(&sql, &*args)
            .with_context(|| format!("batched update of {table}.{column}"))?;
    }
    tx.commit()?;
    Ok(())
}
