//! Turns a page of stored timeline or feed rows into views for one viewer.
//!
//! Retweets are re-checked against the social graph on every read, because the original
//! author may have gone private since the retweet was fanned out:
//! - visible: shown as stored
//! - not visible: shown with text and image stripped
//! - social graph unavailable: left out of the page entirely
//!
//! Skipped entries are not backfilled, so a page can be shorter than `PAGE_SIZE`.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::best_effort::best_effort;
use crate::errors::AppError;
use crate::images::ImageResolver;
use crate::models::{Tweet, TweetView};
use crate::social_graph::SocialGraph;
use crate::storage::{TweetStore, PAGE_SIZE};

enum Visibility {
    Visible,
    Redacted,
    Skipped,
}

pub struct FeedAssembler {
    store: Arc<dyn TweetStore>,
    graph: Arc<dyn SocialGraph>,
    images: Arc<ImageResolver>,
}

impl FeedAssembler {
    pub fn new(
        store: Arc<dyn TweetStore>,
        graph: Arc<dyn SocialGraph>,
        images: Arc<ImageResolver>,
    ) -> Self {
        Self {
            store,
            graph,
            images,
        }
    }

    /// A page of `author`'s own posts as seen by `viewer`.
    pub async fn timeline_page(
        &self,
        viewer: &AuthUser,
        author: &str,
        before: Option<Uuid>,
    ) -> Result<Vec<TweetView>, AppError> {
        let entries = self
            .store
            .query_timeline_entries(author, before, PAGE_SIZE)
            .await?;
        Ok(self.assemble(viewer, entries).await)
    }

    /// A page of `viewer`'s home feed.
    pub async fn feed_page(
        &self,
        viewer: &AuthUser,
        before: Option<Uuid>,
    ) -> Result<Vec<TweetView>, AppError> {
        let entries = self
            .store
            .query_feed_entries(&viewer.username, before, PAGE_SIZE)
            .await?;
        Ok(self.assemble(viewer, entries).await)
    }

    async fn assemble(&self, viewer: &AuthUser, entries: Vec<Tweet>) -> Vec<TweetView> {
        let mut page = Vec::with_capacity(entries.len());
        for tweet in entries {
            if let Some(view) = self.project(viewer, tweet).await {
                page.push(view);
            }
        }
        page
    }

    async fn project(&self, viewer: &AuthUser, mut tweet: Tweet) -> Option<TweetView> {
        let visibility = if tweet.retweet {
            self.retweet_visibility(viewer, &tweet).await
        } else {
            Visibility::Visible
        };

        match visibility {
            Visibility::Skipped => return None,
            Visibility::Redacted => {
                tweet.text = None;
                tweet.image_id = None;
            }
            Visibility::Visible => {}
        }

        let mut view = TweetView::bare(tweet);
        let tweet_id = view.tweet.id;
        view.likes_count = best_effort("count likes", self.store.count_likes(tweet_id))
            .await
            .unwrap_or(0);
        view.liked_by_me = best_effort(
            "liked by viewer",
            self.store.liked_by_user(tweet_id, &viewer.username),
        )
        .await
        .unwrap_or(false);

        if let Some(image_id) = view.tweet.image_id.as_deref() {
            view.image = best_effort("resolve image", self.images.resolve(image_id))
                .await
                .flatten();
        }
        Some(view)
    }

    async fn retweet_visibility(&self, viewer: &AuthUser, tweet: &Tweet) -> Visibility {
        let Some(original) = tweet.original_posted_by.as_deref() else {
            warn!(tweet_id = %tweet.id, "Retweet without an original author, redacting");
            return Visibility::Redacted;
        };

        match self.graph.check_visibility(viewer, original).await {
            Ok(true) => Visibility::Visible,
            Ok(false) => Visibility::Redacted,
            Err(e) if e.is_retryable() => {
                debug!(tweet_id = %tweet.id, "Skipping retweet, visibility unknown: {e}");
                Visibility::Skipped
            }
            Err(e) => {
                warn!(tweet_id = %tweet.id, "Visibility check rejected, redacting: {e}");
                Visibility::Redacted
            }
        }
    }
}
