//! Reply-first lead policy
//!
//! Tracks what the engine has sent to each lead and whether the lead has
//! replied. A lead that replies leaves the automated flow for good.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::{Lead, LeadId};

/// Where a lead sits in the automated flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing sent yet, or the follow-up wait has not elapsed
    Initial,
    /// Sent before, no reply, and the follow-up wait has elapsed
    FollowUp,
    /// The lead replied; automated sends stop
    HumanMode,
}

/// Per-lead bookkeeping kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadState {
    pub replied: bool,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub sends: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_subject: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReplyPolicy {
    leads: DashMap<LeadId, LeadState>,
}

impl ReplyPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stage_of(&self, lead: &LeadId, follow_up_wait: chrono::Duration, now: DateTime<Utc>) -> Stage {
        let Some(state) = self.leads.get(lead) else {
            return Stage::Initial;
        };

        if state.replied {
            return Stage::HumanMode;
        }

        match state.last_sent_at {
            Some(sent) if state.sends > 0 && now.signed_duration_since(sent) >= follow_up_wait => {
                Stage::FollowUp
            }
            _ => Stage::Initial,
        }
    }

    #[must_use]
    pub fn is_human_mode(&self, lead: &LeadId) -> bool {
        self.leads.get(lead).is_some_and(|state| state.replied)
    }

    /// Whether the next send should carry fresh content.
    ///
    /// Leads that never replied always get fresh content; otherwise content is
    /// refreshed once the lead has been silent for longer than `threshold`.
    #[must_use]
    pub fn should_refresh_content(
        last_reply_at: Option<DateTime<Utc>>,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last_reply_at) = last_reply_at else {
            return true;
        };
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last_reply_at) > threshold
    }

    /// Merge what the lead source knows about `lead`
    pub fn observe(&self, lead: &Lead) {
        let mut state = self.leads.entry(lead.id.clone()).or_default();
        if lead.last_reply_at > state.last_reply_at {
            state.last_reply_at = lead.last_reply_at;
        }
    }

    /// Move `lead` into human mode. Returns `false` if it already was.
    pub fn on_reply(&self, lead: &LeadId, at: DateTime<Utc>) -> bool {
        let mut state = self.leads.entry(lead.clone()).or_default();
        state.last_reply_at = Some(at);
        !std::mem::replace(&mut state.replied, true)
    }

    pub fn record_send(&self, lead: &LeadId, subject: &str, at: DateTime<Utc>) {
        let mut state = self.leads.entry(lead.clone()).or_default();
        state.sends += 1;
        state.last_sent_at = Some(at);
        state.last_subject = Some(subject.to_string());
    }

    #[must_use]
    pub fn state(&self, lead: &LeadId) -> Option<LeadState> {
        self.leads.get(lead).map(|state| state.clone())
    }
}
