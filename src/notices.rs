use std::time::{Duration, Instant};

use anyhow::Error;
use serde::Serialize;

use crate::error_codes::{describe_chain, find_studio_error};

pub const NOTICE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub message: String,
    #[serde(skip)]
    posted_at: Instant,
}

/// Transient messages; each one disappears after its time-to-live.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    ttl: Duration,
    notices: Vec<Notice>,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(NOTICE_TTL)
    }
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            notices: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>, now: Instant) -> &Notice {
        self.push(Notice {
            level: NoticeLevel::Info,
            code: None,
            message: message.into(),
            posted_at: now,
        })
    }

    /// Posts `summary` followed by the full error chain.
    pub fn error(&mut self, summary: &str, error: &Error, now: Instant) -> &Notice {
        self.push(Notice {
            level: NoticeLevel::Error,
            code: find_studio_error(error).map(|error| error.code()),
            message: format!("{summary}: {}", describe_chain(error)),
            posted_at: now,
        })
    }

    pub fn active(&mut self, now: Instant) -> &[Notice] {
        self.prune(now);
        &self.notices
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.notices.last()
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.notices
            .retain(|notice| now.saturating_duration_since(notice.posted_at) < ttl);
    }

    fn push(&mut self, notice: Notice) -> &Notice {
        self.prune(notice.posted_at);
        self.notices.push(notice);
        let last = self.notices.len() - 1;
        &self.notices[last]
    }
}
