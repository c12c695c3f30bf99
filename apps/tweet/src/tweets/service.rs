use std::sync::Arc;

use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use super::assembler::FeedAssembler;
use super::fanout::{FeedWriter, Recipients};
use crate::ads::{AdCreated, AdsLedger};
use crate::auth::AuthUser;
use crate::best_effort::best_effort;
use crate::errors::AppError;
use crate::images::ImageResolver;
use crate::models::{Like, NewAd, NewTweet, Tweet, TweetContent, TweetView};
use crate::social_graph::SocialGraph;
use crate::storage::TweetStore;

/// Entry point for every tweet operation. The caller's identity is passed into each call.
pub struct TweetService {
    store: Arc<dyn TweetStore>,
    graph: Arc<dyn SocialGraph>,
    images: Arc<ImageResolver>,
    ads: Arc<dyn AdsLedger>,
    writer: FeedWriter,
    assembler: FeedAssembler,
}

impl TweetService {
    /// `graph` is expected to be the breaker-guarded client.
    pub fn new(
        store: Arc<dyn TweetStore>,
        graph: Arc<dyn SocialGraph>,
        images: Arc<ImageResolver>,
        ads: Arc<dyn AdsLedger>,
    ) -> Self {
        TweetService {
            writer: FeedWriter::new(store.clone()),
            assembler: FeedAssembler::new(store.clone(), graph.clone(), images.clone()),
            store,
            graph,
            images,
            ads,
        }
    }

    pub async fn create_tweet(
        &self,
        auth: &AuthUser,
        req: &NewTweet,
    ) -> Result<TweetView, AppError> {
        let content = self.validated_content(req).await?;
        let tweet = Tweet::new_post(&auth.username, content, false);

        let followers = self.followers_of(auth).await;
        let recipients = Recipients::for_post(&auth.username, followers);
        self.writer.publish(&tweet, &recipients).await?;

        Ok(TweetView::bare(tweet))
    }

    pub async fn create_ad(&self, auth: &AuthUser, req: &NewAd) -> Result<TweetView, AppError> {
        if !auth.is_business() {
            return Err(AppError::Forbidden(
                "only business accounts can create ads".to_string(),
            ));
        }
        req.target_group.validate()?;
        let content = self.validated_content(&req.tweet).await?;
        let tweet = Tweet::new_post(&auth.username, content, true);

        let members = best_effort(
            "fetch target group",
            self.graph.target_group_members(auth, &req.target_group),
        )
        .await
        .unwrap_or_default();
        let followers = self.followers_of(auth).await;
        let recipients = Recipients::for_ad(&auth.username, members, followers);
        self.writer.publish(&tweet, &recipients).await?;

        let created = AdCreated {
            tweet_id: tweet.id,
            posted_by: tweet.posted_by.clone(),
            target_group: req.target_group.clone(),
            recipients: recipients.len(),
        };
        best_effort("ads ledger: ad created", self.ads.ad_created(auth, &created)).await;

        Ok(TweetView::bare(tweet))
    }

    /// Likes a tweet. Liking twice is a no-op; only the first like of an ad reaches the ledger.
    pub async fn create_like(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<Like, AppError> {
        let tweet = self
            .store
            .find_tweet_by_id(tweet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tweet {tweet_id}")))?;

        let like = Like {
            username: auth.username.clone(),
            tweet_id,
        };
        let inserted = self.store.insert_like(&like).await?;
        if inserted && tweet.ad {
            best_effort("ads ledger: ad liked", self.ads.ad_liked(auth, tweet_id)).await;
        }
        Ok(like)
    }

    /// Removes a like. Removing a like that does not exist is a no-op.
    pub async fn delete_like(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AppError> {
        let like = Like {
            username: auth.username.clone(),
            tweet_id,
        };
        if !self.store.delete_like(&like).await? {
            return Ok(());
        }
        // The like is already gone; the ad lookup only feeds the ledger.
        let is_ad = best_effort("ads ledger: ad lookup", self.store.is_ad(tweet_id))
            .await
            .unwrap_or(false);
        if is_ad {
            best_effort("ads ledger: ad unliked", self.ads.ad_unliked(auth, tweet_id)).await;
        }
        Ok(())
    }

    pub async fn likes_by_tweet(&self, tweet_id: Uuid) -> Result<Vec<Like>, AppError> {
        self.store.likes_by_tweet(tweet_id).await
    }

    /// Retweets an original post. Fails closed: if visibility cannot be established the
    /// caller gets a retryable error and nothing is written.
    pub async fn retweet(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<TweetView, AppError> {
        let original = self
            .store
            .find_tweet_by_id(tweet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tweet {tweet_id}")))?;
        if original.retweet {
            return Err(AppError::RetweetOfRetweet);
        }

        self.require_visible(auth, &original.posted_by).await?;

        let retweet = original.retweet_by(&auth.username);
        let followers = self.followers_of(auth).await;
        let recipients = Recipients::for_post(&auth.username, followers);
        self.writer.publish(&retweet, &recipients).await?;

        Ok(TweetView::bare(retweet))
    }

    pub async fn timeline(
        &self,
        auth: &AuthUser,
        username: &str,
        before: Option<Uuid>,
    ) -> Result<Vec<TweetView>, AppError> {
        self.require_visible(auth, username).await?;
        self.assembler.timeline_page(auth, username, before).await
    }

    pub async fn home_feed(
        &self,
        auth: &AuthUser,
        before: Option<Uuid>,
    ) -> Result<Vec<TweetView>, AppError> {
        self.assembler.feed_page(auth, before).await
    }

    pub async fn save_image(&self, image: Bytes) -> Result<String, AppError> {
        if image.is_empty() {
            return Err(AppError::Validation("image upload is empty".to_string()));
        }
        Ok(self.images.save(image).await?)
    }

    /// Copies `followed`'s timeline into the caller's feed, typically right after a follow.
    pub async fn backfill_feed(&self, auth: &AuthUser, followed: &str) -> Result<u64, AppError> {
        self.require_visible(auth, followed).await?;
        let copied = self
            .store
            .copy_timeline_into_feed(followed, &auth.username)
            .await?;
        info!(user = %auth.username, %followed, copied, "Backfilled feed");
        Ok(copied)
    }

    async fn validated_content(&self, req: &NewTweet) -> Result<TweetContent, AppError> {
        let content = req.validate()?;
        if let TweetContent::Image(image_id) = &content {
            if !self.images.exists(image_id).await? {
                return Err(AppError::Validation(format!("unknown image '{image_id}'")));
            }
        }
        Ok(content)
    }

    async fn followers_of(&self, auth: &AuthUser) -> Vec<String> {
        best_effort("fetch followers", self.graph.followers(auth))
            .await
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    async fn require_visible(&self, auth: &AuthUser, target: &str) -> Result<(), AppError> {
        if self.graph.check_visibility(auth, target).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "not allowed to see posts by {target}"
            )))
        }
    }
}
