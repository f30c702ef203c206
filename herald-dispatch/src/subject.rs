//! Subject line generation
//!
//! Subjects are composed from a category phrase and a time qualifier. A
//! rendered subject may be used at most `max_repetition` times inside the
//! reset window, and a category never returns the same subject twice in a
//! row. When every candidate is exhausted a numeric suffix makes the subject
//! unique, so generation always terminates.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::tracing;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::SubjectPolicy;

/// Candidates tried before falling back to a suffixed subject
pub const MAX_GENERATION_ATTEMPTS: usize = 5;

const ADMINISTRATIVE: &[&str] = &[
    "Notice regarding your application",
    "Administrative note: pending step",
    "Update on your request status",
];

const PERSONAL_INDIRECT: &[&str] = &[
    "Your application has been reviewed",
    "About your submitted details",
    "Regarding your recent request",
];

const NEUTRAL_SAFE: &[&str] = &[
    "Follow-up on a pending step",
    "Request status update",
    "Notice about your details",
];

const QUALIFIERS: &[&str] = &["today", "this week", "current stage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Administrative,
    PersonalIndirect,
    NeutralSafe,
}

impl Category {
    /// Unknown names fall back to [`Category::NeutralSafe`]
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "administrative" => Self::Administrative,
            "personal_indirect" => Self::PersonalIndirect,
            _ => Self::NeutralSafe,
        }
    }

    const fn phrases(self) -> &'static [&'static str] {
        match self {
            Self::Administrative => ADMINISTRATIVE,
            Self::PersonalIndirect => PERSONAL_INDIRECT,
            Self::NeutralSafe => NEUTRAL_SAFE,
        }
    }
}

/// Usage record for one rendered subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectRecord {
    pub uses: u32,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug)]
struct State {
    rng: StdRng,
    last_returned: HashMap<Category, String>,
}

#[derive(Debug)]
pub struct SubjectGenerator {
    records: DashMap<String, SubjectRecord>,
    /// Held for a whole generation so the no-consecutive-repeat check and the
    /// record update happen together.
    state: Mutex<State>,
    fallback_counter: AtomicU64,
}

impl Default for SubjectGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// A generator with a fixed seed, for reproducible sequences
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            records: DashMap::new(),
            state: Mutex::new(State {
                rng,
                last_returned: HashMap::new(),
            }),
            fallback_counter: AtomicU64::new(0),
        }
    }

    /// Generate a subject for `category`
    pub fn generate(&self, category: &str, policy: &SubjectPolicy) -> String {
        self.generate_at(category, policy, Utc::now())
    }

    pub(crate) fn generate_at(
        &self,
        category: &str,
        policy: &SubjectPolicy,
        now: DateTime<Utc>,
    ) -> String {
        let requested = Category::parse(category);
        let mut state = self.state.lock();

        for attempt in 0..MAX_GENERATION_ATTEMPTS {
            let pool = if attempt == 0 {
                requested
            } else {
                Category::NeutralSafe
            };
            let candidate = compose(&mut state.rng, pool);

            if state.last_returned.get(&requested) == Some(&candidate) {
                continue;
            }
            if self.claim(&candidate, policy, now) {
                state.last_returned.insert(requested, candidate.clone());
                return candidate;
            }
        }

        let window = policy.reset_window();
        self.records
            .retain(|_, record| now.signed_duration_since(record.last_used) <= window);

        let base = compose(&mut state.rng, Category::NeutralSafe);
        let mut subject = format!("{base} [{:04}]", self.suffix(now));
        if state.last_returned.get(&requested) == Some(&subject) {
            subject = format!("{base} [{:04}]", self.suffix(now));
        }

        tracing::debug!(category, %subject, "Subject candidates exhausted, using suffixed subject");

        self.records.insert(
            subject.clone(),
            SubjectRecord {
                uses: 1,
                last_used: now,
            },
        );
        state.last_returned.insert(requested, subject.clone());
        subject
    }

    /// Current usage record for `subject`
    #[must_use]
    pub fn record(&self, subject: &str) -> Option<SubjectRecord> {
        self.records.get(subject).map(|record| *record)
    }

    /// Count one use of `candidate` if it is still within its repetition
    /// budget, clearing records older than the reset window.
    fn claim(&self, candidate: &str, policy: &SubjectPolicy, now: DateTime<Utc>) -> bool {
        match self.records.entry(candidate.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now.signed_duration_since(record.last_used) > policy.reset_window() {
                    record.uses = 0;
                }
                if record.uses >= policy.max_repetition {
                    return false;
                }
                record.uses += 1;
                record.last_used = now;
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(SubjectRecord {
                    uses: 1,
                    last_used: now,
                });
                true
            }
        }
    }

    /// Four digits from the millisecond clock plus a monotonic counter
    fn suffix(&self, now: DateTime<Utc>) -> u64 {
        let counter = self.fallback_counter.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        (millis % 10_000 + counter) % 10_000
    }
}

fn compose(rng: &mut StdRng, category: Category) -> String {
    let phrases = category.phrases();
    let phrase = phrases[rng.random_range(0..phrases.len())];
    let qualifier = QUALIFIERS[rng.random_range(0..QUALIFIERS.len())];
    format!("{phrase} ({qualifier})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use chrono::Duration;

    use super::*;

    fn policy(max_repetition: u32) -> SubjectPolicy {
        SubjectPolicy {
            max_repetition,
            reset_hours: 24,
        }
    }

    #[test]
    fn test_unknown_category_uses_neutral_safe() {
        assert_eq!(Category::parse("administrative"), Category::Administrative);
        assert_eq!(Category::parse("personal_indirect"), Category::PersonalIndirect);
        assert_eq!(Category::parse("initial_outreach"), Category::NeutralSafe);
    }

    #[test]
    fn test_subject_is_phrase_and_qualifier() {
        let generator = SubjectGenerator::with_seed(7);
        let subject = generator.generate("administrative", &policy(5));

        assert!(ADMINISTRATIVE.iter().chain(NEUTRAL_SAFE).any(|p| subject.starts_with(p)));
        assert!(QUALIFIERS.iter().any(|q| subject.ends_with(&format!("({q})"))));
    }

    #[test]
    fn test_never_repeats_consecutively() {
        let generator = SubjectGenerator::with_seed(42);
        let policy = policy(5);
        let now = Utc::now();

        let mut previous = generator.generate_at("administrative", &policy, now);
        for _ in 0..200 {
            let subject = generator.generate_at("administrative", &policy, now);
            assert_ne!(subject, previous);
            previous = subject;
        }
    }

    #[test]
    fn test_repetition_ceiling() {
        let generator = SubjectGenerator::with_seed(3);
        let policy = policy(2);
        let now = Utc::now();

        for _ in 0..100 {
            let subject = generator.generate_at("personal_indirect", &policy, now);
            assert!(generator.record(&subject).unwrap().uses <= 2);
        }
    }

    #[test]
    fn test_exhaustion_falls_back_to_suffix() {
        let generator = SubjectGenerator::with_seed(11);
        let policy = policy(1);
        let now = Utc::now();

        let subjects: Vec<String> = (0..60)
            .map(|_| generator.generate_at("neutral_safe", &policy, now))
            .collect();

        let unique: HashSet<&String> = subjects.iter().collect();
        assert_eq!(unique.len(), subjects.len(), "every subject is used once");
        assert!(subjects.iter().any(|s| s.ends_with(']')));
    }

    #[test]
    fn test_records_reset_after_window() {
        let generator = SubjectGenerator::with_seed(5);
        let policy = policy(1);
        let start = Utc::now();

        let first = generator.generate_at("administrative", &policy, start);
        assert_eq!(generator.record(&first).unwrap().uses, 1);

        let later = start + Duration::hours(25);
        assert!(generator.claim(&first, &policy, later));
        assert_eq!(generator.record(&first).unwrap().uses, 1);
        assert_eq!(generator.record(&first).unwrap().last_used, later);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let policy = policy(5);
        let now = Utc::now();
        let a = SubjectGenerator::with_seed(99);
        let b = SubjectGenerator::with_seed(99);

        for _ in 0..10 {
            assert_eq!(
                a.generate_at("administrative", &policy, now),
                b.generate_at("administrative", &policy, now)
            );
        }
    }
}
