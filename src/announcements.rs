use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::format_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: u64,
    pub title: String,
    pub details: String,
    pub target: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewAnnouncement {
    pub title: String,
    pub details: String,
    pub target: String,
}

#[derive(Debug, Error)]
pub enum AnnouncementError {
    #[error("missing required fields: title, details, target")]
    MissingFields,
    #[error("invalid tracking base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Announcements keyed by a monotonically allocated id.
#[derive(Debug)]
pub struct AnnouncementRepository {
    next_id: AtomicU64,
    items: RwLock<Vec<Announcement>>,
}

impl Default for AnnouncementRepository {
    fn default() -> Self {
        Self::from_items(Vec::new())
    }
}

impl AnnouncementRepository {
    pub fn from_items(items: Vec<Announcement>) -> Self {
        let next_id = items.iter().map(|item| item.id).max().unwrap_or(0) + 1;
        Self {
            next_id: AtomicU64::new(next_id),
            items: RwLock::new(items),
        }
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read announcements {}", path.display()))
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let items: Vec<Announcement> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse announcements {}", path.display()))?;
        Ok(Self::from_items(items))
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(&*self.items.read())?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write announcements {}", path.display()))?;
        Ok(())
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create(&self, request: NewAnnouncement) -> Result<Announcement, AnnouncementError> {
        let title = request.title.trim();
        let details = request.details.trim();
        let target = request.target.trim();
        if title.is_empty() || details.is_empty() || target.is_empty() {
            return Err(AnnouncementError::MissingFields);
        }

        let announcement = Announcement {
            id: self.allocate_id(),
            title: title.to_string(),
            details: details.to_string(),
            target: target.to_string(),
            created_at: format_timestamp(chrono::Utc::now()),
        };
        self.items.write().push(announcement.clone());

        tracing::info!(id = announcement.id, title = %announcement.title, "Created announcement");
        Ok(announcement)
    }

    pub fn find(&self, id: u64) -> Option<Announcement> {
        self.items.read().iter().find(|item| item.id == id).cloned()
    }

    pub fn count(&self) -> usize {
        self.items.read().len()
    }
}

pub fn tracking_link(base: &str, announcement: &Announcement) -> Result<String, AnnouncementError> {
    let mut url = Url::parse(&format!("{}/track", base.trim_end_matches('/')))?;
    url.query_pairs_mut()
        .append_pair("id", &announcement.id.to_string())
        .append_pair("target", &announcement.target);
    Ok(url.into())
}
