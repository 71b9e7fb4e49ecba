use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_NOTICES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Warning,
    Info,
}

/// A transient message about something that degraded without failing,
/// e.g. a search served from a stale cache.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notice {
    pub message: String,
    pub kind: NoticeKind,
    #[serde(skip)]
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct Notifier {
    notices: VecDeque<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>, ttl: Duration, now: Instant) {
        self.add(message.into(), NoticeKind::Info, now + ttl);
    }

    pub fn warn(&mut self, message: impl Into<String>, now: Instant) {
        self.add(message.into(), NoticeKind::Warning, now + Duration::from_secs(5));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn prune_expired(&mut self, now: Instant) {
        self.notices.retain(|n| n.expires_at > now);
    }

    fn add(&mut self, message: String, kind: NoticeKind, expires_at: Instant) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            message,
            kind,
            expires_at,
        });
    }
}
