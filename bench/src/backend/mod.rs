//! Backend adapters and the common `BenchBackend` trait.
//!
//! Three implementations are provided:
//! - [`mongo::MongoBackend`]: MongoDB through the synchronous driver
//! - [`cockroach::CockroachBackend`]: CockroachDB over the PostgreSQL protocol
//! - [`sqlite::SqliteBackend`]: embedded SQLite, an in-process reference

pub mod cockroach;
pub mod mongo;
pub mod sqlite;

use crate::populate::{NewPost, UserRecord};
use anyhow::Result;
use chrono::NaiveDateTime;
use std::fmt::Debug;

/// Records per round-trip for batched writes.
pub const DEFAULT_CHUNK: usize = 1000;

/// The users/posts pair a workload operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tables {
    pub users: &'static str,
    pub posts: &'static str,
    /// Whether `users.email` exists and is unique.
    pub with_email: bool,
}

impl Tables {
    /// Main schema: insert benchmarks write here, the concurrency benchmark
    /// reads from here.
    pub const MAIN: Tables = Tables {
        users: "users",
        posts: "posts",
        with_email: true,
    };
    /// Private fixture of the CRUD benchmark.
    pub const CRUD: Tables = Tables {
        users: "users2",
        posts: "posts2",
        with_email: true,
    };
    /// Private fixture of the query benchmark.
    pub const QUERY: Tables = Tables {
        users: "users_q",
        posts: "posts_q",
        with_email: false,
    };
}

/// How inserts are shipped to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// One statement / command per record.
    PerRow,
    /// Fixed-size pages, one round-trip each.
    Batched { chunk: usize },
}

impl InsertMode {
    pub fn batched() -> Self {
        InsertMode::Batched {
            chunk: DEFAULT_CHUNK,
        }
    }

    /// Page size; per-row mode pages one record at a time.
    pub fn chunk_size(&self) -> usize {
        match *self {
            InsertMode::PerRow => 1,
            InsertMode::Batched { chunk } => chunk.max(1),
        }
    }
}

/// A post as read back by the query operations.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow<Id> {
    pub id: Id,
    pub user_id: Id,
    pub content: String,
    pub created_at: Option<NaiveDateTime>,
}

/// Trait implemented by each backend.
///
/// Every method maps one logical operation of the benchmarks onto the
/// backend's native calls. Errors are never retried by callers.
pub trait BenchBackend: Sized {
    /// Backend-assigned record identifier.
    type Id: Clone + Debug + PartialEq + Send + Sync;
    /// Connection parameters; shared read-only by load-driver workers.
    type Config: Clone + Debug + Send + Sync;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Open a new, exclusively owned connection.
    fn connect(config: &Self::Config) -> Result<Self>;

    /// Drop and recreate `tables` with the indexes the workloads rely on.
    fn reset_tables(&mut self, tables: &Tables) -> Result<()>;

    /// Insert users and return their ids in the order supplied, across all
    /// pages.
    fn insert_users(
        &mut self,
        tables: &Tables,
        users: &[UserRecord],
        mode: InsertMode,
    ) -> Result<Vec<Self::Id>>;

    /// Insert posts that already reference backend user ids.
    fn insert_posts(
        &mut self,
        tables: &Tables,
        posts: &[NewPost<Self::Id>],
        mode: InsertMode,
    ) -> Result<()>;

    /// Point lookup by username.
    fn find_user(&mut self, tables: &Tables, username: &str) -> Result<Option<Self::Id>>;

    /// Every username in `tables.users`.
    fn usernames(&mut self, tables: &Tables) -> Result<Vec<String>>;

    /// Ids of the first `limit` posts in natural order.
    fn post_ids(&mut self, tables: &Tables, limit: usize) -> Result<Vec<Self::Id>>;

    /// Set `email` for each `(id, email)` pair in one batched operation per
    /// page.
    fn update_user_emails(&mut self, tables: &Tables, updates: &[(Self::Id, String)])
        -> Result<()>;

    /// Set `content` for each `(id, content)` pair in one batched operation
    /// per page.
    fn update_post_contents(
        &mut self,
        tables: &Tables,
        updates: &[(Self::Id, String)],
    ) -> Result<()>;

    /// Delete the given users. Their posts are removed first, for every
    /// backend, so the measured work is comparable.
    fn delete_users(&mut self, tables: &Tables, ids: &[Self::Id]) -> Result<()>;

    /// Newest `limit` posts of `user`, `created_at` descending.
    fn latest_posts(
        &mut self,
        tables: &Tables,
        user: &Self::Id,
        limit: usize,
    ) -> Result<Vec<PostRow<Self::Id>>>;

    /// Posts of `user` created at or after `since`, newest first.
    fn posts_since(
        &mut self,
        tables: &Tables,
        user: &Self::Id,
        since: NaiveDateTime,
    ) -> Result<Vec<PostRow<Self::Id>>>;

    /// Number of posts owned by `user`.
    fn count_posts(&mut self, tables: &Tables, user: &Self::Id) -> Result<u64>;
}

/// Reorder ids returned keyed by username into the order of `users`.
///
/// SQL `RETURNING` makes no ordering promise, so the adapters return
/// `(username, id)` pairs and restore input order here.
pub(crate) fn ids_in_input_order<Id>(
    users: &[UserRecord],
    mut returned: std::collections::HashMap<String, Id>,
) -> Result<Vec<Id>> {
    users
        .iter()
        .map(|u| {
            returned.remove(&u.username).ok_or_else(|| {
                anyhow::anyhow!("insert did not return an id for user {}", u.username)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn chunk_size_per_mode() {
        assert_eq!(InsertMode::PerRow.chunk_size(), 1);
        assert_eq!(InsertMode::batched().chunk_size(), DEFAULT_CHUNK);
        assert_eq!(InsertMode::Batched { chunk: 0 }.chunk_size(), 1);
    }

    #[test]
    fn ids_are_restored_to_input_order() {
        let users = crate::populate::users("u", "ex.com", 1, 3);
        let returned: HashMap<String, i64> = [
            ("u_1_2".to_string(), 30),
            ("u_1_0".to_string(), 10),
            ("u_1_1".to_string(), 20),
        ]
        .into_iter()
        .collect();
        assert_eq!(ids_in_input_order(&users, returned).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn missing_returned_id_is_an_error() {
        let users = crate::populate::users("u", "ex.com", 1, 2);
        let returned: HashMap<String, i64> = [("u_1_0".to_string(), 10)].into_iter().collect();
        assert!(ids_in_input_order(&users, returned).is_err());
    }
}
