//! Data population: deterministic synthetic users and posts.
//!
//! Everything here is derived from a single integer seed. Workers that need
//! their own random stream call [`DataGen::stream`] with a distinct offset, so
//! a run is reproducible without any generator being shared across threads.
//!
//! Posts are generated against *user indices*; they are bound to
//! backend-assigned ids only once the user insert has returned them (see
//! [`PostSpec::bind`]).

use chrono::{Duration, NaiveDateTime};
use rand::seq::index;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const SYL1: [&str; 48] = [
    "thi", "ar", "an", "un", "iss", "ish", "urs", "ent", "esh", "ash", "jay", "dur", "lon", "lan",
    "len", "so", "lur", "gar", "au", "dei", "zir", "sol", "luc", "ni", "bus", "mid", "doo", "al",
    "jac", "ta", "bi", "rif", "tol", "nim", "ru", "fro", "sam", "bil", "ga", "ara", "rho", "dan",
    "va", "cec", "ix", "bo", "sar", "ho",
];
const SYL2: [&str; 9] = [
    "tar", "tur", "kar", "kur", "kan", "tan", "gar", "gur", "run",
];
const SYL3: [&str; 5] = ["a", "e", "i", "o", "u"];

/// A user row as produced by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
}

/// A post that still refers to its owner by generator index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSpec {
    pub user_idx: usize,
    pub content: String,
    /// `None` leaves the timestamp to the server default.
    pub created_at: Option<NaiveDateTime>,
}

/// A post ready to be written: the owner is a backend id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost<Id> {
    pub user_id: Id,
    pub content: String,
    pub created_at: Option<NaiveDateTime>,
}

impl PostSpec {
    /// Resolve the owner index against the ids a backend returned for the
    /// users, in generator order.
    pub fn bind<Id: Clone>(&self, user_ids: &[Id]) -> anyhow::Result<NewPost<Id>> {
        let user_id = user_ids.get(self.user_idx).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "post references user #{} but only {} user ids were returned",
                self.user_idx,
                user_ids.len()
            )
        })?;
        Ok(NewPost {
            user_id,
            content: self.content.clone(),
            created_at: self.created_at,
        })
    }
}

/// Bind a whole batch of post specs.
pub fn bind_posts<Id: Clone>(
    posts: &[PostSpec],
    user_ids: &[Id],
) -> anyhow::Result<Vec<NewPost<Id>>> {
    posts.iter().map(|p| p.bind(user_ids)).collect()
}

/// How post bodies are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStyle {
    /// A single sentence with exactly this many words.
    Sentence(usize),
    /// One or more sentences, cut to at most this many characters.
    Text(usize),
}

/// Seed-stable users: `<prefix>_<seed>_<i>` / `<prefix>_<seed>_<i>@<domain>`.
pub fn users(prefix: &str, domain: &str, seed: i64, count: usize) -> Vec<UserRecord> {
    (0..count)
        .map(|i| UserRecord {
            username: format!("{prefix}_{seed}_{i}"),
            email: format!("{prefix}_{seed}_{i}@{domain}"),
        })
        .collect()
}

/// Deterministic generator backed by ChaCha8 so streams are identical across
/// platforms and releases.
pub struct DataGen {
    rng: ChaCha8Rng,
}

impl DataGen {
    pub fn new(seed: i64) -> Self {
        Self::stream(seed, 0)
    }

    /// Independent sub-stream `seed + offset`, one per worker.
    pub fn stream(seed: i64, offset: u64) -> Self {
        let s = (seed as u64).wrapping_add(offset);
        Self {
            rng: ChaCha8Rng::seed_from_u64(s),
        }
    }

    /// Uniform index in `0..len`.
    ///
    /// # Panics
    ///
    /// If `len` is zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// `amount` distinct indices out of `0..len`, in sampling order.
    pub fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize> {
        index::sample(&mut self.rng, len, amount.min(len)).into_vec()
    }

    /// A pronounceable lowercase pseudo-word.
    pub fn word(&mut self) -> String {
        let mut word = String::new();
        word.push_str(SYL1[self.rng.gen_range(0..SYL1.len())]);
        word.push_str(SYL2[self.rng.gen_range(0..SYL2.len())]);
        if self.rng.gen_bool(0.5) {
            word.push_str(SYL3[self.rng.gen_range(0..SYL3.len())]);
        }
        word
    }

    /// Capitalised sentence of `words` words ending in a full stop.
    pub fn sentence(&mut self, words: usize) -> String {
        let mut parts: Vec<String> = (0..words.max(1)).map(|_| self.word()).collect();
        if let Some(first) = parts.first_mut() {
            let mut chars = first.chars();
            let capitalised: Option<String> = chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect());
            if let Some(capitalised) = capitalised {
                *first = capitalised;
            }
        }
        let mut s = parts.join(" ");
        s.push('.');
        s
    }

    /// Sentences of 4..=12 words joined until the next one would exceed
    /// `max_chars`. Always at least one (truncated) sentence.
    pub fn text(&mut self, max_chars: usize) -> String {
        let mut out = String::new();
        loop {
            let n = self.rng.gen_range(4..=12);
            let next = self.sentence(n);
            let needed = if out.is_empty() {
                next.len()
            } else {
                out.len() + 1 + next.len()
            };
            if needed > max_chars {
                if out.is_empty() {
                    // Generated text is ASCII, byte truncation is safe.
                    out = next[..max_chars.min(next.len())].to_string();
                }
                return out;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&next);
        }
    }

    pub fn content(&mut self, style: ContentStyle) -> String {
        match style {
            ContentStyle::Sentence(words) => self.sentence(words),
            ContentStyle::Text(max_chars) => self.text(max_chars),
        }
    }

    /// A timestamp between `anchor - days` and `anchor`, second resolution.
    pub fn timestamp_within_days(&mut self, anchor: NaiveDateTime, days: u32) -> NaiveDateTime {
        let span = i64::from(days) * 24 * 3600;
        anchor - Duration::seconds(self.rng.gen_range(0..=span))
    }

    /// `count` posts owned by uniformly chosen users out of `user_count`.
    /// Without users there is no owner to pick, so the result is empty.
    pub fn posts(
        &mut self,
        count: usize,
        user_count: usize,
        style: ContentStyle,
        timestamps: Option<(NaiveDateTime, u32)>,
    ) -> Vec<PostSpec> {
        if user_count == 0 {
            return Vec::new();
        }
        (0..count)
            .map(|_| {
                let user_idx = self.index(user_count);
                self.post_for(user_idx, style, timestamps)
            })
            .collect()
    }

    /// One post owned by `user_idx`.
    pub fn post_for(
        &mut self,
        user_idx: usize,
        style: ContentStyle,
        timestamps: Option<(NaiveDateTime, u32)>,
    ) -> PostSpec {
        let content = self.content(style);
        let created_at = timestamps.map(|(anchor, days)| self.timestamp_within_days(anchor, days));
        PostSpec {
            user_idx,
            content,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn anchor() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn users_follow_prefix_seed_index_pattern() {
        let u = users("user", "example.com", 42, 3);
        assert_eq!(u[0].username, "user_42_0");
        assert_eq!(u[2].email, "user_42_2@example.com");
    }

    #[test]
    fn same_seed_produces_identical_sequences() {
        let mut a = DataGen::new(42);
        let mut b = DataGen::new(42);
        for _ in 0..50 {
            assert_eq!(a.sentence(10), b.sentence(10));
            assert_eq!(a.text(200), b.text(200));
            assert_eq!(
                a.timestamp_within_days(anchor(), 14),
                b.timestamp_within_days(anchor(), 14)
            );
        }
    }

    #[test]
    fn sub_streams_diverge() {
        let mut a = DataGen::stream(42, 0);
        let mut b = DataGen::stream(42, 1);
        let sa: Vec<usize> = (0..32).map(|_| a.index(1_000_000)).collect();
        let sb: Vec<usize> = (0..32).map(|_| b.index(1_000_000)).collect();
        assert_ne!(sa, sb);
    }

    #[test]
    fn sentence_has_requested_word_count() {
        let mut g = DataGen::new(7);
        let s = g.sentence(10);
        assert_eq!(s.split(' ').count(), 10);
        assert!(s.ends_with('.'));
        assert!(s.chars().next().unwrap().is_ascii_uppercase());
    }

    #[test]
    fn text_respects_max_chars() {
        let mut g = DataGen::new(7);
        for max in [10, 40, 160, 200] {
            for _ in 0..100 {
                let t = g.text(max);
                assert!(!t.is_empty());
                assert!(t.len() <= max, "{} > {max}: {t}", t.len());
            }
        }
    }

    #[test]
    fn timestamps_stay_inside_window() {
        let mut g = DataGen::new(1);
        for _ in 0..500 {
            let ts = g.timestamp_within_days(anchor(), 14);
            assert!(ts <= anchor());
            assert!(ts >= anchor() - Duration::days(14));
        }
    }

    #[test]
    fn sampled_indices_are_distinct() {
        let mut g = DataGen::new(3);
        let mut s = g.sample_indices(2000, 500);
        assert_eq!(s.len(), 500);
        s.sort_unstable();
        s.dedup();
        assert_eq!(s.len(), 500);
    }

    #[test]
    fn bind_rejects_out_of_range_owner() {
        let spec = PostSpec {
            user_idx: 5,
            content: "x".into(),
            created_at: None,
        };
        assert!(spec.bind(&[1i64, 2, 3]).is_err());
        assert_eq!(spec.bind(&[0i64, 1, 2, 3, 4, 50]).unwrap().user_id, 50);
    }

    #[test]
    fn posts_without_users_are_empty() {
        let mut g = DataGen::new(42);
        assert!(g.posts(100, 0, ContentStyle::Sentence(5), None).is_empty());
        let owned = g.posts(100, 3, ContentStyle::Sentence(5), None);
        assert_eq!(owned.len(), 100);
        assert!(owned.iter().all(|p| p.user_idx < 3));
    }
}
