//! Benchmark workloads.
//!
//! Each workload has a *plan* (sizes and content shape), a *dataset* generated
//! once from the seed and shared by every backend, and a generic runner that
//! executes the timed steps against one backend and returns its metrics.
//! Metric names are derived from the plan sizes, so the default plans produce
//! the names the report step reads.

use crate::backend::{BenchBackend, InsertMode, Tables};
use crate::concurrency::{self, ConcurrencyStats};
use crate::populate::{self, bind_posts, ContentStyle, DataGen, PostSpec, UserRecord};
use crate::results::{Metrics, MetricsBuilder};
use crate::timing::{per_op_ms, time_avg_ms, time_once};
use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use log::info;

/// Current UTC time truncated to whole seconds.
///
/// Used as the anchor for generated timestamps, so every backend stores the
/// same values at the same precision.
pub fn anchor_now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Schema setup
// ---------------------------------------------------------------------------

/// Drop and recreate the main tables on one backend.
pub fn setup<B: BenchBackend>(backend: &mut B) -> Result<()> {
    backend
        .reset_tables(&Tables::MAIN)
        .with_context(|| format!("{}: schema setup", backend.name()))?;
    info!("{}: main tables recreated", backend.name());
    Ok(())
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct InsertPlan {
    pub users: usize,
    pub posts: usize,
    pub lookup_reps: usize,
    pub content: ContentStyle,
    pub days: u32,
}

impl InsertPlan {
    /// Per-row run: short single-sentence posts.
    pub fn naive() -> Self {
        Self {
            users: 1000,
            posts: 5000,
            lookup_reps: 100,
            content: ContentStyle::Sentence(10),
            days: 14,
        }
    }

    /// Batched run: longer free text.
    pub fn batched() -> Self {
        Self {
            content: ContentStyle::Text(200),
            ..Self::naive()
        }
    }

    pub fn dataset(&self, seed: i64, anchor: NaiveDateTime) -> InsertDataset {
        let users = populate::users("user", "example.com", seed, self.users);
        let mut gen = DataGen::new(seed);
        let posts = gen.posts(
            self.posts,
            self.users,
            self.content,
            Some((anchor, self.days)),
        );
        InsertDataset { users, posts }
    }
}

#[derive(Debug, Clone)]
pub struct InsertDataset {
    pub users: Vec<UserRecord>,
    pub posts: Vec<PostSpec>,
}

/// Insert users, time a repeated lookup of the first one, insert posts.
///
/// Writes to the main tables, which must not already hold this seed's users.
pub fn run_insert<B: BenchBackend>(
    backend: &mut B,
    plan: &InsertPlan,
    data: &InsertDataset,
    mode: InsertMode,
) -> Result<Metrics> {
    let t = Tables::MAIN;
    let name = backend.name();
    info!("{name}: inserting {} users ({mode:?})", data.users.len());

    let (user_ids, users_elapsed) = time_once(|| backend.insert_users(&t, &data.users, mode))
        .with_context(|| format!("{name}: insert users"))?;
    if user_ids.len() != data.users.len() {
        bail!(
            "{name}: {} users inserted but {} ids returned",
            data.users.len(),
            user_ids.len()
        );
    }

    let Some(target) = data.users.first() else {
        bail!("insert plan has no users");
    };
    let lookup_ms = time_avg_ms(plan.lookup_reps, || {
        backend.find_user(&t, &target.username)?;
        Ok(())
    })
    .with_context(|| format!("{name}: single user lookup"))?;

    let posts = bind_posts(&data.posts, &user_ids)?;
    let ((), posts_elapsed) = time_once(|| backend.insert_posts(&t, &posts, mode))
        .with_context(|| format!("{name}: insert posts"))?;

    info!(
        "{name}: users {:.3}s, lookup {:.3}ms/op, posts {:.3}s",
        users_elapsed.as_secs_f64(),
        lookup_ms,
        posts_elapsed.as_secs_f64()
    );
    Ok(MetricsBuilder::new()
        .number(
            format!("insert_{}_users", data.users.len()),
            users_elapsed.as_secs_f64(),
        )
        .number("single_query", lookup_ms)
        .number(
            format!("insert_{}_posts", posts.len()),
            posts_elapsed.as_secs_f64(),
        )
        .build())
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CrudPlan {
    pub users: usize,
    pub posts: usize,
    pub update_users: usize,
    pub update_posts: usize,
    pub delete_users: usize,
    pub content: ContentStyle,
}

impl Default for CrudPlan {
    fn default() -> Self {
        Self {
            users: 2000,
            posts: 3000,
            update_users: 1000,
            update_posts: 1000,
            delete_users: 500,
            content: ContentStyle::Text(160),
        }
    }
}

impl CrudPlan {
    pub fn dataset(&self, seed: i64) -> CrudDataset {
        let users = populate::users("u2", "ex.com", seed, self.users);
        let mut gen = DataGen::new(seed);
        // Server-default timestamps.
        let posts = gen.posts(self.posts, self.users, self.content, None);
        let new_emails = (0..self.update_users.min(self.users))
            .map(|i| format!("u2upd_{seed}_{i}@ex.com"))
            .collect();
        let new_contents = (0..self.update_posts)
            .map(|_| format!("{} upd_{seed}", gen.word()))
            .collect();
        let delete_idx = gen.sample_indices(self.users, self.delete_users);
        CrudDataset {
            users,
            posts,
            new_emails,
            new_contents,
            delete_idx,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrudDataset {
    pub users: Vec<UserRecord>,
    pub posts: Vec<PostSpec>,
    /// New email for user `i`, applied to the first users.
    pub new_emails: Vec<String>,
    /// New content for the first posts the backend lists.
    pub new_contents: Vec<String>,
    /// Generator indices of the users to delete.
    pub delete_idx: Vec<usize>,
}

/// Seed a private fixture, then time batched updates and a cascading delete.
pub fn run_crud<B: BenchBackend>(
    backend: &mut B,
    plan: &CrudPlan,
    data: &CrudDataset,
) -> Result<Metrics> {
    let t = Tables::CRUD;
    let name = backend.name();
    let mode = InsertMode::batched();
    backend
        .reset_tables(&t)
        .with_context(|| format!("{name}: reset CRUD fixture"))?;

    let (user_ids, seed_users) = time_once(|| backend.insert_users(&t, &data.users, mode))
        .with_context(|| format!("{name}: seed users"))?;
    let posts = bind_posts(&data.posts, &user_ids)?;
    let ((), seed_posts) = time_once(|| backend.insert_posts(&t, &posts, mode))
        .with_context(|| format!("{name}: seed posts"))?;

    let user_updates: Vec<(B::Id, String)> = user_ids
        .iter()
        .cloned()
        .zip(data.new_emails.iter().cloned())
        .collect();
    let ((), users_total) = time_once(|| backend.update_user_emails(&t, &user_updates))
        .with_context(|| format!("{name}: update users"))?;

    // Target selection is not part of the timed region.
    let post_ids = backend.post_ids(&t, plan.update_posts)?;
    let post_updates: Vec<(B::Id, String)> = post_ids
        .into_iter()
        .zip(data.new_contents.iter().cloned())
        .collect();
    let ((), posts_total) = time_once(|| backend.update_post_contents(&t, &post_updates))
        .with_context(|| format!("{name}: update posts"))?;

    let doomed: Vec<B::Id> = data
        .delete_idx
        .iter()
        .filter_map(|&i| user_ids.get(i).cloned())
        .collect();
    let ((), delete_total) = time_once(|| backend.delete_users(&t, &doomed))
        .with_context(|| format!("{name}: delete users"))?;

    info!(
        "{name}: CRUD done (update users {:.3}s, update posts {:.3}s, delete {:.3}s)",
        users_total.as_secs_f64(),
        posts_total.as_secs_f64(),
        delete_total.as_secs_f64()
    );

    let uu = user_updates.len();
    let up = post_updates.len();
    Ok(MetricsBuilder::new()
        .number("seed_users", seed_users.as_secs_f64())
        .number("seed_posts", seed_posts.as_secs_f64())
        .number(format!("update_{uu}_users_total_s"), users_total.as_secs_f64())
        .number(format!("update_{uu}_users_avg_ms"), per_op_ms(users_total, uu))
        .number(format!("update_{up}_posts_total_s"), posts_total.as_secs_f64())
        .number(format!("update_{up}_posts_avg_ms"), per_op_ms(posts_total, up))
        .number(
            format!("delete_{}_users_total_s", doomed.len()),
            delete_total.as_secs_f64(),
        )
        .build())
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct QueryPlan {
    pub users: usize,
    /// Total posts, hot-user extras included.
    pub posts: usize,
    pub hot_user: usize,
    pub hot_user_extra: usize,
    pub reps: usize,
    pub latest_limit: usize,
    pub range_days: u32,
    pub content: ContentStyle,
    pub days: u32,
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self {
            users: 1000,
            posts: 10_000,
            hot_user: 0,
            hot_user_extra: 400,
            reps: 200,
            latest_limit: 20,
            range_days: 7,
            content: ContentStyle::Sentence(10),
            days: 14,
        }
    }
}

impl QueryPlan {
    pub fn dataset(&self, seed: i64, anchor: NaiveDateTime) -> QueryDataset {
        let users = populate::users("uq", "ex.com", seed, self.users);
        let mut gen = DataGen::new(seed);
        let window = Some((anchor, self.days));
        let mut posts: Vec<PostSpec> = (0..self.hot_user_extra)
            .map(|_| gen.post_for(self.hot_user, self.content, window))
            .collect();
        posts.extend(gen.posts(
            self.posts.saturating_sub(self.hot_user_extra),
            self.users,
            self.content,
            window,
        ));
        QueryDataset {
            users,
            posts,
            since: anchor - Duration::days(i64::from(self.range_days)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryDataset {
    pub users: Vec<UserRecord>,
    pub posts: Vec<PostSpec>,
    /// Lower bound of the range query.
    pub since: NaiveDateTime,
}

/// Seed a private fixture and time the two read shapes for the hot user.
pub fn run_query<B: BenchBackend>(
    backend: &mut B,
    plan: &QueryPlan,
    data: &QueryDataset,
) -> Result<Metrics> {
    let t = Tables::QUERY;
    let name = backend.name();
    let mode = InsertMode::batched();
    backend
        .reset_tables(&t)
        .with_context(|| format!("{name}: reset query fixture"))?;

    let user_ids = backend
        .insert_users(&t, &data.users, mode)
        .with_context(|| format!("{name}: seed users"))?;
    let posts = bind_posts(&data.posts, &user_ids)?;
    let ((), seed_posts) = time_once(|| backend.insert_posts(&t, &posts, mode))
        .with_context(|| format!("{name}: seed posts"))?;

    let Some(hot) = user_ids.get(plan.hot_user).cloned() else {
        bail!("{name}: hot user #{} was not inserted", plan.hot_user);
    };
    let latest_ms = time_avg_ms(plan.reps, || {
        backend.latest_posts(&t, &hot, plan.latest_limit)?;
        Ok(())
    })
    .with_context(|| format!("{name}: latest posts"))?;
    let range_ms = time_avg_ms(plan.reps, || {
        backend.posts_since(&t, &hot, data.since)?;
        Ok(())
    })
    .with_context(|| format!("{name}: range query"))?;

    info!("{name}: latest-{} {latest_ms:.3}ms, range {range_ms:.3}ms", plan.latest_limit);
    Ok(MetricsBuilder::new()
        .number("seed_posts", seed_posts.as_secs_f64())
        .number(format!("latest{}_avg_ms", plan.latest_limit), latest_ms)
        .number(format!("range{}d_avg_ms", plan.range_days), range_ms)
        .build())
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConcurrencyPlan {
    pub thread_counts: Vec<usize>,
    pub reps: usize,
    pub keyspace_cap: usize,
}

impl Default for ConcurrencyPlan {
    fn default() -> Self {
        Self {
            thread_counts: concurrency::THREAD_COUNTS.to_vec(),
            reps: concurrency::DEFAULT_REPS,
            keyspace_cap: concurrency::KEYSPACE_CAP,
        }
    }
}

/// Usernames in a backend's main users table, for the keyspace intersection.
pub fn main_usernames<B: BenchBackend>(backend: &mut B) -> Result<Vec<String>> {
    backend
        .usernames(&Tables::MAIN)
        .with_context(|| format!("{}: list usernames", backend.name()))
}

/// Run every thread count of `plan` against one backend.
pub fn run_concurrency<B: BenchBackend>(
    config: &B::Config,
    plan: &ConcurrencyPlan,
    keys: &[String],
    seed: i64,
    stream_offset: u64,
) -> Result<Metrics> {
    let mut metrics = MetricsBuilder::new();
    for &workers in &plan.thread_counts {
        let stats: ConcurrencyStats = concurrency::run_point_lookups::<B>(
            config,
            &Tables::MAIN,
            keys,
            workers,
            plan.reps,
            seed,
            stream_offset,
        )?;
        metrics.object(format!("read_threads_{workers}"), &stats)?;
    }
    Ok(metrics.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    #[test]
    fn insert_dataset_is_seed_stable() {
        let plan = InsertPlan::naive();
        let a = plan.dataset(42, anchor());
        let b = plan.dataset(42, anchor());
        assert_eq!(a.users, b.users);
        assert_eq!(a.posts, b.posts);
        assert_eq!(a.users.len(), 1000);
        assert_eq!(a.posts.len(), 5000);
        assert_eq!(a.users[0].username, "user_42_0");
        assert!(a.posts.iter().all(|p| p.user_idx < 1000));
    }

    #[test]
    fn batched_posts_are_bounded_text() {
        let data = InsertPlan::batched().dataset(42, anchor());
        assert!(data.posts.iter().all(|p| p.content.len() <= 200));
        assert!(data
            .posts
            .iter()
            .all(|p| p.created_at.is_some_and(|ts| ts <= anchor())));
    }

    #[test]
    fn crud_dataset_shapes() {
        let data = CrudPlan::default().dataset(42);
        assert_eq!(data.users.len(), 2000);
        assert_eq!(data.posts.len(), 3000);
        assert!(data.posts.iter().all(|p| p.created_at.is_none()));
        assert_eq!(data.new_emails[999], "u2upd_42_999@ex.com");
        assert_eq!(data.new_contents.len(), 1000);
        assert!(data.new_contents[0].ends_with(" upd_42"));
        assert_eq!(data.delete_idx.len(), 500);
    }

    #[test]
    fn query_dataset_gives_hot_user_extra_posts() {
        let plan = QueryPlan::default();
        let data = plan.dataset(42, anchor());
        assert_eq!(data.posts.len(), 10_000);
        let hot = data.posts.iter().filter(|p| p.user_idx == 0).count();
        assert!(hot >= 400);
        assert_eq!(data.since, anchor() - Duration::days(7));
        assert!(data.users.iter().all(|u| u.username.starts_with("uq_42_")));
    }
}
