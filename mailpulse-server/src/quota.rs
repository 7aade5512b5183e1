/*
 * MailPulse SMTP relay
 * Copyright (C) 2024 MailPulse
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mailpulse_config::log_channel::QUOTA;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A typed quota refusal, with the counter that tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaRejection {
    /// the trailing 60-second window is full
    MinuteExceeded {
        /// sends (committed + reserved) in the window
        count: i64,
    },
    /// the trailing 24-hour window is full
    DailyExceeded {
        /// sends (committed + reserved) in the window
        count: i64,
    },
}

impl std::fmt::Display for QuotaRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinuteExceeded { count } => {
                write!(f, "per-minute quota exceeded ({count} in the last minute)")
            }
            Self::DailyExceeded { count } => {
                write!(f, "daily quota exceeded ({count} in the last 24 hours)")
            }
        }
    }
}

/// Committed sends of one project, plus in-flight reservations.
///
/// One deque serves both windows: entries older than 24 hours are pruned,
/// the minute count walks the recent tail.
#[derive(Default)]
#[derive(Debug)]
struct ProjectWindow {
    sent: VecDeque<Instant>,
    pending: u32,
}

impl ProjectWindow {
    fn prune(&mut self, now: Instant) {
        while self
            .sent
            .front()
            .map_or(false, |oldest| now.duration_since(*oldest) >= DAY)
        {
            self.sent.pop_front();
        }
    }

    fn counts(&self, now: Instant) -> (i64, i64) {
        let minute = self
            .sent
            .iter()
            .rev()
            .take_while(|instant| now.duration_since(**instant) < MINUTE)
            .count();

        (minute as i64, self.sent.len() as i64)
    }

    fn admit(&mut self, now: Instant, per_minute: i64, daily: i64) -> Result<(), QuotaRejection> {
        self.prune(now);

        let (minute, day) = self.counts(now);
        let pending = i64::from(self.pending);

        if minute + pending >= per_minute {
            return Err(QuotaRejection::MinuteExceeded {
                count: minute + pending,
            });
        }
        if day + pending >= daily {
            return Err(QuotaRejection::DailyExceeded {
                count: day + pending,
            });
        }

        self.pending += 1;
        Ok(())
    }
}

/// Admission permit handed out by [`QuotaTracker::admit`].
///
/// The permit counts against both windows while it is held, so two sessions
/// racing on the same project cannot both pass the gate on the last slot.
/// [`QuotaPermit::commit`] records the send; dropping the permit uncommitted
/// (store failure, client abort mid-DATA) releases the reservation.
#[must_use]
#[derive(Debug)]
pub struct QuotaPermit {
    window: Option<Arc<Mutex<ProjectWindow>>>,
}

impl QuotaPermit {
    /// Record that the reserved message has been durably stored.
    pub fn commit(mut self) {
        if let Some(window) = self.window.take() {
            let mut window = window.lock().unwrap();
            window.pending -= 1;
            window.sent.push_back(Instant::now());
        }
    }
}

impl Drop for QuotaPermit {
    fn drop(&mut self) {
        if let Some(window) = self.window.take() {
            window.lock().unwrap().pending -= 1;
        }
    }
}

/// Sliding-window send counters, one pair per project.
///
/// Per-project mutexes: a slow DATA transfer under one project never stalls
/// the gate of another.
#[derive(Default)]
pub struct QuotaTracker {
    projects: Mutex<HashMap<String, Arc<Mutex<ProjectWindow>>>>,
}

impl QuotaTracker {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, project_id: &str) -> Arc<Mutex<ProjectWindow>> {
        self.projects
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Reserve the right to send one message. Both limits are strict: a
    /// window already holding `limit` entries refuses the next send.
    ///
    /// # Errors
    ///
    /// * [`QuotaRejection`] naming the exhausted window
    pub fn admit(
        &self,
        project_id: &str,
        per_minute: i64,
        daily: i64,
    ) -> Result<QuotaPermit, QuotaRejection> {
        let window = self.window(project_id);

        window
            .lock()
            .unwrap()
            .admit(Instant::now(), per_minute, daily)
            .map_err(|rejection| {
                log::warn!(target: QUOTA, "project '{project_id}': {rejection}");
                rejection
            })?;

        Ok(QuotaPermit {
            window: Some(window),
        })
    }

    /// Committed sends of a project in the trailing (60 s, 24 h) windows.
    #[must_use]
    pub fn counts(&self, project_id: &str) -> (i64, i64) {
        let window = self.window(project_id);
        let mut window = window.lock().unwrap();
        let now = Instant::now();
        window.prune(now);
        window.counts(now)
    }
}

/// Sliding window of AUTH attempts per client address.
///
/// Exceeding the limit answers `421` before any credential is examined.
pub struct AuthAttemptLimiter {
    max_per_minute: usize,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl AuthAttemptLimiter {
    ///
    #[must_use]
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one attempt from `ip`; false when the address is over budget.
    #[must_use]
    pub fn check_and_record(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        let window = attempts.entry(ip.to_string()).or_default();

        while window
            .front()
            .map_or(false, |oldest| now.duration_since(*oldest) >= MINUTE)
        {
            window.pop_front();
        }

        if window.len() >= self.max_per_minute {
            return false;
        }

        window.push_back(now);
        true
    }
}
