//! Fan-out-on-write: one timeline row for the author, one feed row per recipient.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::Tweet;
use crate::storage::TweetStore;

/// Feed writes in flight at once for a single publish.
const FANOUT_CONCURRENCY: usize = 32;

/// The deduplicated set of users whose feeds receive a post. Always contains the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients(BTreeSet<String>);

impl Recipients {
    /// Followers of the author plus the author.
    pub fn for_post(author: &str, followers: impl IntoIterator<Item = String>) -> Self {
        let mut set: BTreeSet<String> = followers.into_iter().collect();
        set.insert(author.to_string());
        Recipients(set)
    }

    /// Target-group members plus followers plus the author, each exactly once.
    pub fn for_ad(
        author: &str,
        target_members: impl IntoIterator<Item = String>,
        followers: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut recipients = Self::for_post(author, followers);
        recipients.0.extend(target_members);
        recipients
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// Outcome of the per-recipient feed writes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct FeedWriter {
    store: Arc<dyn TweetStore>,
}

impl FeedWriter {
    pub fn new(store: Arc<dyn TweetStore>) -> Self {
        Self { store }
    }

    /// Writes the author's timeline row, then one feed row per recipient.
    ///
    /// Only the timeline write can fail the publish. Feed writes are independent of each other;
    /// a failed one is logged and counted in the report. They run on a detached task, so they
    /// complete even if the caller stops waiting after the timeline write.
    pub async fn publish(
        &self,
        tweet: &Tweet,
        recipients: &Recipients,
    ) -> Result<PublishReport, AppError> {
        self.store.insert_timeline_entry(tweet).await?;

        let fan_out = tokio::spawn(fan_out(
            self.store.clone(),
            Arc::new(tweet.clone()),
            recipients.iter().cloned().collect(),
        ));
        match fan_out.await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(tweet_id = %tweet.id, "Fan-out task aborted: {e}");
                Ok(PublishReport {
                    delivered: 0,
                    failed: recipients.len(),
                })
            }
        }
    }
}

async fn fan_out(
    store: Arc<dyn TweetStore>,
    tweet: Arc<Tweet>,
    recipients: Vec<String>,
) -> PublishReport {
    let permits = Arc::new(Semaphore::new(FANOUT_CONCURRENCY));
    let mut writes = JoinSet::new();
    for recipient in recipients {
        let store = store.clone();
        let tweet = tweet.clone();
        let permits = permits.clone();
        writes.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = store.insert_feed_entry(&recipient, &tweet).await;
            (recipient, result)
        });
    }

    let mut report = PublishReport::default();
    while let Some(joined) = writes.join_next().await {
        match joined {
            Ok((_, Ok(()))) => report.delivered += 1,
            Ok((recipient, Err(e))) => {
                warn!(tweet_id = %tweet.id, %recipient, "Feed write failed: {e}");
                report.failed += 1;
            }
            Err(e) => {
                warn!(tweet_id = %tweet.id, "Feed write task aborted: {e}");
                report.failed += 1;
            }
        }
    }

    info!(
        tweet_id = %tweet.id,
        author = %tweet.posted_by,
        delivered = report.delivered,
        failed = report.failed,
        "Published tweet"
    );
    report
}
