//! Report throttling.
//!
//! [`ThrottleGate`] turns verdicts into reports at most once per cooldown
//! window. [`SustainFilter`] is an optional debounce in front of it.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{IncidentKind, IncidentReport, IncidentVerdict, SubjectId, Timestamp};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One window shared by every kind; a burst of distinct kinds collapses to the first.
    #[default]
    Global,
    /// Each kind has its own window.
    PerKind,
}

impl CooldownScope {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(CooldownScope::Global),
            "per_kind" => Ok(CooldownScope::PerKind),
            other => Err(anyhow!(
                "unknown cooldown scope '{}' (expected global or per_kind)",
                other
            )),
        }
    }
}

/// Last-accepted timestamps. Owned by exactly one [`ThrottleGate`].
#[derive(Clone, Debug)]
pub struct ThrottleState {
    cooldown: Duration,
    scope: CooldownScope,
    last_global: Option<Timestamp>,
    last_by_kind: HashMap<IncidentKind, Timestamp>,
}

impl ThrottleState {
    pub fn new(cooldown: std::time::Duration, scope: CooldownScope) -> Result<Self> {
        if cooldown.is_zero() {
            return Err(anyhow!("cooldown must be positive"));
        }
        let cooldown = Duration::from_std(cooldown)
            .map_err(|_| anyhow!("cooldown {:?} out of range", cooldown))?;
        Ok(Self {
            cooldown,
            scope,
            last_global: None,
            last_by_kind: HashMap::new(),
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn scope(&self) -> CooldownScope {
        self.scope
    }

    pub fn last_accepted_at(&self, kind: IncidentKind) -> Option<Timestamp> {
        match self.scope {
            CooldownScope::Global => self.last_global,
            CooldownScope::PerKind => self.last_by_kind.get(&kind).copied(),
        }
    }

    /// A clock that stepped backwards counts as still cooling down.
    fn cooling_down(&self, kind: IncidentKind, now: Timestamp) -> bool {
        self.last_accepted_at(kind)
            .is_some_and(|last| now - last < self.cooldown)
    }

    fn record(&mut self, kind: IncidentKind, now: Timestamp) {
        match self.scope {
            CooldownScope::Global => self.last_global = Some(now),
            CooldownScope::PerKind => {
                self.last_by_kind.insert(kind, now);
            }
        }
    }
}

/// Cooldown controller for one subject.
///
/// `admit` checks and updates under `&mut self`; a host that classifies
/// frames in parallel wraps the gate in a `Mutex`.
#[derive(Debug)]
pub struct ThrottleGate {
    subject_id: SubjectId,
    state: ThrottleState,
}

impl ThrottleGate {
    pub fn new(subject_id: SubjectId, state: ThrottleState) -> Self {
        Self { subject_id, state }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    /// Report for `verdict` if it is not SAFE and its cooldown has elapsed.
    pub fn admit(&mut self, verdict: IncidentVerdict, now: Timestamp) -> Option<IncidentReport> {
        if verdict.is_safe() || self.state.cooling_down(verdict.kind, now) {
            return None;
        }
        self.state.record(verdict.kind, now);
        Some(IncidentReport::from_verdict(self.subject_id, verdict, now))
    }
}

/// Debounce: a non-SAFE verdict passes only once non-SAFE frames have
/// outnumbered SAFE ones by `min_frames`.
///
/// SAFE frames decrement the streak instead of clearing it, so a single
/// clean frame does not hide a sustained incident. `min_frames <= 1`
/// disables filtering.
#[derive(Clone, Debug)]
pub struct SustainFilter {
    min_frames: u32,
    streak: u32,
}

impl SustainFilter {
    pub fn new(min_frames: u32) -> Self {
        Self {
            min_frames: min_frames.max(1),
            streak: 0,
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Pass the verdict through, or substitute SAFE while it is not yet sustained.
    pub fn filter(&mut self, verdict: IncidentVerdict) -> IncidentVerdict {
        if verdict.is_safe() {
            self.streak = self.streak.saturating_sub(1);
            return verdict;
        }
        self.streak = self.streak.saturating_add(1).min(self.min_frames);
        if self.streak >= self.min_frames {
            verdict
        } else {
            IncidentVerdict::safe()
        }
    }
}

impl Default for SustainFilter {
    fn default() -> Self {
        Self::new(1)
    }
}
