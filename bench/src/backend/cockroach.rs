//! CockroachDB backend over the PostgreSQL wire protocol (`postgres` crate,
//! blocking client).
//!
//! Batched writes build one multi-row statement per page with numbered
//! parameters; updates join the target table against a `VALUES` list so a
//! whole page is applied server-side in one statement.

use super::{ids_in_input_order, BenchBackend, InsertMode, PostRow, Tables, DEFAULT_CHUNK};
use crate::populate::{NewPost, UserRecord};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{debug, info};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CockroachConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

impl CockroachConfig {
    fn connection_string(&self, database: &str) -> String {
        format!(
            "host={} port={} user={} dbname={}",
            self.host, self.port, self.user, database
        )
    }
}

pub struct CockroachBackend {
    client: Client,
}

impl CockroachBackend {
    /// Create the target database if needed. Runs against `defaultdb`, since
    /// the target may not exist yet.
    pub fn ensure_database(config: &CockroachConfig) -> Result<()> {
        let mut client = Client::connect(&config.connection_string("defaultdb"), NoTls)
            .with_context(|| {
                format!(
                    "connect to CockroachDB at {}:{}/defaultdb",
                    config.host, config.port
                )
            })?;
        // Identifiers cannot be bound as parameters.
        client.batch_execute(&format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            config.database
        ))?;
        info!("CockroachDB database {} ready", config.database);
        Ok(())
    }
}

/// `rows` parenthesised tuples of `cols` placeholders each, numbered from `$1`
/// across the whole list. `tuple` renders one row from its placeholders.
fn values_list(rows: usize, cols: usize, tuple: impl Fn(&[String]) -> String) -> String {
    (0..rows)
        .map(|r| {
            let params: Vec<String> = (r * cols + 1..=(r + 1) * cols)
                .map(|i| format!("${i}"))
                .collect();
            tuple(&params)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_users_sql(t: &Tables, rows: usize) -> String {
    let (columns, cols) = if t.with_email {
        ("username, email", 2)
    } else {
        ("username", 1)
    };
    let values = values_list(rows, cols, |p| format!("({})", p.join(", ")));
    format!(
        "INSERT INTO {} ({columns}) VALUES {values} RETURNING username, id",
        t.users
    )
}

fn insert_posts_sql(table: &str, rows: usize) -> String {
    let values = values_list(rows, 3, |p| {
        format!(
            "({}, {}, COALESCE({}::TIMESTAMP, now()::TIMESTAMP))",
            p[0], p[1], p[2]
        )
    });
    format!("INSERT INTO {table} (user_id, content, created_at) VALUES {values}")
}

fn update_from_values_sql(table: &str, column: &str, rows: usize) -> String {
    let values = values_list(rows, 2, |p| format!("({}::INT8, {}::TEXT)", p[0], p[1]));
    format!(
        "UPDATE {table} AS t SET {column} = v.val \
         FROM (VALUES {values}) AS v(id, val) WHERE t.id = v.id"
    )
}

fn read_post(row: &Row) -> Result<PostRow<i64>> {
    Ok(PostRow {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        content: row.try_get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: row.try_get(3)?,
    })
}

impl BenchBackend for CockroachBackend {
    type Id = i64;
    type Config = CockroachConfig;

    fn name(&self) -> &'static str {
        "cockroachdb"
    }

    fn connect(config: &CockroachConfig) -> Result<Self> {
        let client = Client::connect(&config.connection_string(&config.database), NoTls)
            .with_context(|| {
                format!(
                    "connect to CockroachDB at {}:{}/{}",
                    config.host, config.port, config.database
                )
            })?;
        Ok(Self { client })
    }

    fn reset_tables(&mut self, t: &Tables) -> Result<()> {
        let email = if t.with_email {
            "email VARCHAR(100) UNIQUE NOT NULL,"
        } else {
            ""
        };
        self.client
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS {posts} CASCADE;
                 DROP TABLE IF EXISTS {users} CASCADE;
                 CREATE TABLE {users} (
                     id         BIGSERIAL PRIMARY KEY,
                     username   VARCHAR(50) UNIQUE NOT NULL,
                     {email}
                     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE TABLE {posts} (
                     id         BIGSERIAL PRIMARY KEY,
                     user_id    BIGINT REFERENCES {users}(id),
                     content    TEXT,
                     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE INDEX idx_{posts}_user_created ON {posts} (user_id, created_at DESC);",
                users = t.users,
                posts = t.posts,
            ))
            .with_context(|| format!("reset {}/{} on CockroachDB", t.users, t.posts))?;
        Ok(())
    }

    fn insert_users(
        &mut self,
        t: &Tables,
        users: &[UserRecord],
        mode: InsertMode,
    ) -> Result<Vec<i64>> {
        let mut returned = HashMap::with_capacity(users.len());
        let mut tx = self.client.transaction()?;
        for chunk in users.chunks(mode.chunk_size()) {
            let sql = insert_users_sql(t, chunk.len());
            let mut args: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 2);
            for u in chunk {
                args.push(&u.username);
                if t.with_email {
                    args.push(&u.email);
                }
            }
            let rows = tx
                .query(sql.as_str(), &args)
                .with_context(|| format!("insert into {}", t.users))?;
            for row in rows {
                returned.insert(row.try_get::<_, String>(0)?, row.try_get::<_, i64>(1)?);
            }
        }
        tx.commit()?;
        debug!("inserted {} users into {}", users.len(), t.users);
        ids_in_input_order(users, returned)
    }

    fn insert_posts(
        &mut self,
        t: &Tables,
        posts: &[NewPost<i64>],
        mode: InsertMode,
    ) -> Result<()> {
        let mut tx = self.client.transaction()?;
        for chunk in posts.chunks(mode.chunk_size()) {
            let sql = insert_posts_sql(t.posts, chunk.len());
            let mut args: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 3);
            for p in chunk {
                args.push(&p.user_id);
                args.push(&p.content);
                args.push(&p.created_at);
            }
            tx.execute(sql.as_str(), &args)
                .with_context(|| format!("insert into {}", t.posts))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_user(&mut self, t: &Tables, username: &str) -> Result<Option<i64>> {
        let row = self.client.query_opt(
            &*format!("SELECT id, username FROM {} WHERE username = $1", t.users),
            &[&username],
        )?;
        Ok(row.map(|r| r.try_get(0)).transpose()?)
    }

    fn usernames(&mut self, t: &Tables) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(&*format!("SELECT username FROM {}", t.users), &[])?;
        Ok(rows.iter().map(|r| r.try_get(0)).collect::<Result<_, _>>()?)
    }

    fn post_ids(&mut self, t: &Tables, limit: usize) -> Result<Vec<i64>> {
        let rows = self.client.query(
            &*format!("SELECT id FROM {} LIMIT $1", t.posts),
            &[&(limit as i64)],
        )?;
        Ok(rows.iter().map(|r| r.try_get(0)).collect::<Result<_, _>>()?)
    }

    fn update_user_emails(&mut self, t: &Tables, updates: &[(i64, String)]) -> Result<()> {
        update_from_values(&mut self.client, t.users, "email", updates)
    }

    fn update_post_contents(&mut self, t: &Tables, updates: &[(i64, String)]) -> Result<()> {
        update_from_values(&mut self.client, t.posts, "content", updates)
    }

    fn delete_users(&mut self, t: &Tables, ids: &[i64]) -> Result<()> {
        let mut tx = self.client.transaction()?;
        for (table, column) in [(t.posts, "user_id"), (t.users, "id")] {
            for chunk in ids.chunks(DEFAULT_CHUNK) {
                let chunk = chunk.to_vec();
                tx.execute(
                    &*format!("DELETE FROM {table} WHERE {column} = ANY($1)"),
                    &[&chunk],
                )
                .with_context(|| format!("delete from {table}"))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn latest_posts(&mut self, t: &Tables, user: &i64, limit: usize) -> Result<Vec<PostRow<i64>>> {
        let rows = self.client.query(
            &*format!(
                "SELECT id, user_id, content, created_at FROM {} \
                 WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
                t.posts
            ),
            &[user, &(limit as i64)],
        )?;
        rows.iter().map(read_post).collect()
    }

    fn posts_since(
        &mut self,
        t: &Tables,
        user: &i64,
        since: NaiveDateTime,
    ) -> Result<Vec<PostRow<i64>>> {
        let rows = self.client.query(
            &*format!(
                "SELECT id, user_id, content, created_at FROM {} \
                 WHERE user_id = $1 AND created_at >= $2 ORDER BY created_at DESC",
                t.posts
            ),
            &[user, &since],
        )?;
        rows.iter().map(read_post).collect()
    }

    fn count_posts(&mut self, t: &Tables, user: &i64) -> Result<u64> {
        let row = self.client.query_one(
            &*format!("SELECT COUNT(*) FROM {} WHERE user_id = $1", t.posts),
            &[user],
        )?;
        Ok(row.try_get::<_, i64>(0)? as u64)
    }
}

fn update_from_values(
    client: &mut Client,
    table: &str,
    column: &str,
    updates: &[(i64, String)],
) -> Result<()> {
    let mut tx = client.transaction()?;
    for chunk in updates.chunks(DEFAULT_CHUNK) {
        let sql = update_from_values_sql(table, column, chunk.len());
        let mut args: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 2);
        for (id, val) in chunk {
            args.push(id);
            args.push(val);
        }
        tx.execute(sql.as_str(), &args)
            .with_context(|| format!("batched update of {table}.{column}"))?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(sql: &str) -> Vec<usize> {
        sql.split('$')
            .skip(1)
            .map(|rest| {
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap()
            })
            .collect()
    }

    /// Placeholders must run `$1..=$n` exactly once each, in order.
    fn assert_contiguous(sql: &str, n: usize) {
        assert_eq!(placeholders(sql), (1..=n).collect::<Vec<_>>(), "{sql}");
    }

    #[test]
    fn user_insert_numbers_each_column() {
        assert_eq!(
            insert_users_sql(&Tables::MAIN, 2),
            "INSERT INTO users (username, email) VALUES ($1, $2), ($3, $4) \
             RETURNING username, id"
        );
        assert_eq!(
            insert_users_sql(&Tables::QUERY, 3),
            "INSERT INTO users_q (username) VALUES ($1), ($2), ($3) RETURNING username, id"
        );
    }

    #[test]
    fn post_insert_defaults_missing_timestamps() {
        assert_eq!(
            insert_posts_sql("posts", 2),
            "INSERT INTO posts (user_id, content, created_at) VALUES \
             ($1, $2, COALESCE($3::TIMESTAMP, now()::TIMESTAMP)), \
             ($4, $5, COALESCE($6::TIMESTAMP, now()::TIMESTAMP))"
        );
    }

    #[test]
    fn update_joins_typed_values_list() {
        assert_eq!(
            update_from_values_sql("posts2", "content", 2),
            "UPDATE posts2 AS t SET content = v.val \
             FROM (VALUES ($1::INT8, $2::TEXT), ($3::INT8, $4::TEXT)) AS v(id, val) \
             WHERE t.id = v.id"
        );
    }

    #[test]
    fn numbering_restarts_for_every_page() {
        let users = crate::populate::users("u", "ex.com", 1, 2_500);
        let pages: Vec<_> = users.chunks(DEFAULT_CHUNK).collect();
        assert_eq!(pages.len(), 3);
        for page in pages {
            assert_contiguous(&insert_users_sql(&Tables::MAIN, page.len()), page.len() * 2);
            assert_contiguous(&insert_users_sql(&Tables::QUERY, page.len()), page.len());
            assert_contiguous(&insert_posts_sql("posts", page.len()), page.len() * 3);
            assert_contiguous(
                &update_from_values_sql("users2", "email", page.len()),
                page.len() * 2,
            );
        }
    }

    #[test]
    fn full_page_stays_under_the_parameter_limit() {
        let sql = insert_posts_sql("posts", DEFAULT_CHUNK);
        assert_eq!(placeholders(&sql).last(), Some(&(DEFAULT_CHUNK * 3)));
        assert!(DEFAULT_CHUNK * 3 <= u16::MAX as usize);
    }

    /// Needs a CockroachDB reachable through the `CRDB_*` variables; run with
    /// `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn rows_decode_against_live_server() {
        let config = crate::config::BenchConfig::from_env().unwrap().cockroach;
        CockroachBackend::ensure_database(&config).unwrap();
        let mut db = CockroachBackend::connect(&config).unwrap();
        let t = Tables::QUERY;
        db.reset_tables(&t).unwrap();

        let users = crate::populate::users("live", "ex.com", 1, 3);
        let ids = db.insert_users(&t, &users, InsertMode::batched()).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(db.find_user(&t, &users[1].username).unwrap(), Some(ids[1]));
        assert_eq!(db.find_user(&t, "nobody").unwrap(), None);
        assert_eq!(db.usernames(&t).unwrap().len(), 3);

        let posts: Vec<NewPost<i64>> = ["a", "b"]
            .into_iter()
            .map(|content| NewPost {
                user_id: ids[0],
                content: content.to_string(),
                created_at: None,
            })
            .collect();
        db.insert_posts(&t, &posts, InsertMode::PerRow).unwrap();
        assert_eq!(db.count_posts(&t, &ids[0]).unwrap(), 2);
        assert_eq!(db.post_ids(&t, 10).unwrap().len(), 2);
        let latest = db.latest_posts(&t, &ids[0], 10).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest
            .iter()
            .all(|p| p.user_id == ids[0] && p.created_at.is_some()));
    }
}
