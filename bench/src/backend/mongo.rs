//! MongoDB backend (synchronous driver).
//!
//! Ids are the server-side `ObjectId`s. Inserts go through `insert_many`
//! per page, whose result maps each document's position to its id, so the
//! returned list follows input order. Bulk updates are sent as a single
//! unordered `update` command per page.

use super::{BenchBackend, InsertMode, PostRow, Tables, DEFAULT_CHUNK};
use crate::populate::{NewPost, UserRecord};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use log::debug;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::IndexOptions;
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

pub struct MongoBackend {
    db: Database,
}

fn to_bson_time(ts: NaiveDateTime) -> BsonDateTime {
    BsonDateTime::from_millis(ts.and_utc().timestamp_millis())
}

fn from_bson_time(ts: BsonDateTime) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).map(|d| d.naive_utc())
}

fn read_post(doc: &Document) -> Result<PostRow<ObjectId>> {
    Ok(PostRow {
        id: doc.get_object_id("_id")?,
        user_id: doc.get_object_id("user_id")?,
        content: doc.get_str("content").unwrap_or_default().to_string(),
        created_at: doc.get_datetime("created_at").ok().copied().and_then(from_bson_time),
    })
}

fn user_document(t: &Tables, u: &UserRecord) -> Document {
    if t.with_email {
        doc! { "username": u.username.as_str(), "email": u.email.as_str() }
    } else {
        doc! { "username": u.username.as_str() }
    }
}

/// Posts without a timestamp leave `created_at` unset.
fn post_document(p: &NewPost<ObjectId>) -> Document {
    let mut d = doc! { "user_id": p.user_id, "content": p.content.as_str() };
    if let Some(ts) = p.created_at {
        d.insert("created_at", to_bson_time(ts));
    }
    d
}

/// Ids of one `insert_many` page in input order. The driver keys them by
/// position within the page.
fn ids_by_position(inserted: &HashMap<usize, Bson>, count: usize) -> Result<Vec<ObjectId>> {
    (0..count)
        .map(|i| match inserted.get(&i) {
            Some(Bson::ObjectId(oid)) => Ok(*oid),
            other => bail!("unexpected inserted id at position {i}: {other:?}"),
        })
        .collect()
}

/// Statements of an `update` command setting `field` by `_id`.
fn set_statements(field: &str, updates: &[(ObjectId, String)]) -> Vec<Document> {
    updates
        .iter()
        .map(|(id, value)| {
            let mut set = Document::new();
            set.insert(field, value.as_str());
            doc! { "q": { "_id": *id }, "u": { "$set": set } }
        })
        .collect()
}

impl MongoBackend {
    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    /// One unordered `update` command per page; `$set` of `field` by `_id`.
    fn bulk_set(&self, coll: &str, field: &str, updates: &[(ObjectId, String)]) -> Result<()> {
        for chunk in updates.chunks(DEFAULT_CHUNK) {
            let statements = set_statements(field, chunk);
            let reply = self
                .db
                .run_command(doc! {
                    "update": coll,
                    "updates": statements,
                    "ordered": false,
                })
                .run()
                .with_context(|| format!("bulk update of {coll}.{field}"))?;
            if let Ok(errors) = reply.get_array("writeErrors") {
                bail!(
                    "bulk update of {coll}.{field} reported {} write errors: {:?}",
                    errors.len(),
                    errors.first()
                );
            }
        }
        Ok(())
    }
}

impl BenchBackend for MongoBackend {
    type Id = ObjectId;
    type Config = MongoConfig;

    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).context("connect to MongoDB")?;
        let db = client.database(&config.database);
        // The driver connects lazily; ping so connectivity errors surface here.
        db.run_command(doc! { "ping": 1 })
            .run()
            .context("ping MongoDB")?;
        Ok(Self { db })
    }

    fn reset_tables(&mut self, t: &Tables) -> Result<()> {
        let users = self.collection(t.users);
        let posts = self.collection(t.posts);
        users.drop().run()?;
        posts.drop().run()?;

        let unique = || IndexOptions::builder().unique(true).build();
        users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(unique())
                    .build(),
            )
            .run()?;
        if t.with_email {
            users
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { "email": 1 })
                        .options(unique())
                        .build(),
                )
                .run()?;
        }
        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .build(),
            )
            .run()
            .with_context(|| format!("reset {}/{} on MongoDB", t.users, t.posts))?;
        Ok(())
    }

    fn insert_users(
        &mut self,
        t: &Tables,
        users: &[UserRecord],
        mode: InsertMode,
    ) -> Result<Vec<ObjectId>> {
        let coll = self.collection(t.users);
        let mut ids = Vec::with_capacity(users.len());
        for chunk in users.chunks(mode.chunk_size()) {
            let docs: Vec<Document> = chunk.iter().map(|u| user_document(t, u)).collect();
            let result = coll
                .insert_many(docs)
                .run()
                .with_context(|| format!("insert into {}", t.users))?;
            ids.extend(ids_by_position(&result.inserted_ids, chunk.len())?);
        }
        debug!("inserted {} users into {}", ids.len(), t.users);
        Ok(ids)
    }

    fn insert_posts(
        &mut self,
        t: &Tables,
        posts: &[NewPost<ObjectId>],
        mode: InsertMode,
    ) -> Result<()> {
        let coll = self.collection(t.posts);
        for chunk in posts.chunks(mode.chunk_size()) {
            let docs: Vec<Document> = chunk.iter().map(post_document).collect();
            coll.insert_many(docs)
                .run()
                .with_context(|| format!("insert into {}", t.posts))?;
        }
        Ok(())
    }

    fn find_user(&mut self, t: &Tables, username: &str) -> Result<Option<ObjectId>> {
        let found = self
            .collection(t.users)
            .find_one(doc! { "username": username })
            .run()?;
        found.map(|d| d.get_object_id("_id").map_err(Into::into)).transpose()
    }

    fn usernames(&mut self, t: &Tables) -> Result<Vec<String>> {
        let cursor = self
            .collection(t.users)
            .find(doc! {})
            .projection(doc! { "username": 1, "_id": 0 })
            .run()?;
        let mut names = Vec::new();
        for d in cursor {
            names.push(d?.get_str("username")?.to_string());
        }
        Ok(names)
    }

    fn post_ids(&mut self, t: &Tables, limit: usize) -> Result<Vec<ObjectId>> {
        let cursor = self
            .collection(t.posts)
            .find(doc! {})
            .projection(doc! { "_id": 1 })
            .limit(limit as i64)
            .run()?;
        let mut ids = Vec::with_capacity(limit);
        for d in cursor {
            ids.push(d?.get_object_id("_id")?);
        }
        Ok(ids)
    }

    fn update_user_emails(&mut self, t: &Tables, updates: &[(ObjectId, String)]) -> Result<()> {
        self.bulk_set(t.users, "email", updates)
    }

    fn update_post_contents(
        &mut self,
        t: &Tables,
        updates: &[(ObjectId, String)],
    ) -> Result<()> {
        self.bulk_set(t.posts, "content", updates)
    }

    fn delete_users(&mut self, t: &Tables, ids: &[ObjectId]) -> Result<()> {
        let posts = self.collection(t.posts);
        let users = self.collection(t.users);
        for chunk in ids.chunks(DEFAULT_CHUNK) {
            posts
                .delete_many(doc! { "user_id": { "$in": chunk.to_vec() } })
                .run()
                .with_context(|| format!("delete from {}", t.posts))?;
        }
        for chunk in ids.chunks(DEFAULT_CHUNK) {
            users
                .delete_many(doc! { "_id": { "$in": chunk.to_vec() } })
                .run()
                .with_context(|| format!("delete from {}", t.users))?;
        }
        Ok(())
    }

    fn latest_posts(
        &mut self,
        t: &Tables,
        user: &ObjectId,
        limit: usize,
    ) -> Result<Vec<PostRow<ObjectId>>> {
        let cursor = self
            .collection(t.posts)
            .find(doc! { "user_id": *user })
            .sort(doc! { "created_at": -1 })
            .limit(limit as i64)
            .run()?;
        cursor.map(|d| read_post(&d?)).collect()
    }

    fn posts_since(
        &mut self,
        t: &Tables,
        user: &ObjectId,
        since: NaiveDateTime,
    ) -> Result<Vec<PostRow<ObjectId>>> {
        let cursor = self
            .collection(t.posts)
            .find(doc! { "user_id": *user, "created_at": { "$gte": to_bson_time(since) } })
            .sort(doc! { "created_at": -1 })
            .run()?;
        cursor.map(|d| read_post(&d?)).collect()
    }

    fn count_posts(&mut self, t: &Tables, user: &ObjectId) -> Result<u64> {
        self.collection(t.posts)
            .count_documents(doc! { "user_id": *user })
            .run()
            .map_err(|e| anyhow!(e).context(format!("count {}", t.posts)))
    }
}
