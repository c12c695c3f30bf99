//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::ads::{AdCreated, AdsLedger, AdsLedgerError};
use crate::auth::{AuthUser, ROLE_BUSINESS};
use crate::config::Config;
use crate::errors::AppError;
use crate::images::{ImageCache, ImageError, ImageResolver, ImageStore};
use crate::models::{Like, TargetGroup, Tweet};
use crate::social_graph::{
    CircuitBreaker, CircuitBreakerConfig, GuardedSocialGraph, SocialGraph, SocialGraphError,
};
use crate::state::AppState;
use crate::storage::TweetStore;
use crate::tweets::assembler::FeedAssembler;
use crate::tweets::TweetService;

pub const TEST_SECRET: &str = "test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/test".to_string(),
        redis_url: "redis://localhost".to_string(),
        s3_bucket: "test".to_string(),
        s3_endpoint: "http://localhost:9000".to_string(),
        aws_access_key_id: "test".to_string(),
        aws_secret_access_key: "test".to_string(),
        social_graph_url: "http://localhost:8001".to_string(),
        ads_ledger_url: "http://localhost:8002".to_string(),
        secret_key: TEST_SECRET.to_string(),
        port: 0,
        rust_log: "debug".to_string(),
        remote_timeout: Duration::from_secs(1),
        breaker_open_for: Duration::from_secs(5),
        image_cache_ttl: Duration::from_secs(30),
    }
}

/// A stored post with a fixed id; a larger `n` sorts as newer.
pub fn tweet_fixture(n: u128, author: &str, text: &str) -> Tweet {
    Tweet {
        id: Uuid::from_u128(n),
        posted_by: author.to_string(),
        text: Some(text.to_string()),
        image_id: None,
        retweet: false,
        original_posted_by: None,
        ad: false,
    }
}

pub fn retweet_fixture(n: u128, retweeter: &str, original: &str, text: &str) -> Tweet {
    Tweet {
        retweet: true,
        original_posted_by: Some(original.to_string()),
        ..tweet_fixture(n, retweeter, text)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    timelines: BTreeMap<(String, Uuid), Tweet>,
    feeds: BTreeMap<(String, Uuid), Tweet>,
    likes: BTreeSet<(Uuid, String)>,
    failing_feeds: BTreeSet<String>,
    fail_timeline: bool,
    fail_ad_lookups: bool,
    page_reads: usize,
    feed_gate: Option<Arc<Semaphore>>,
}

#[derive(Default)]
pub struct MemoryTweetStore {
    inner: Mutex<StoreInner>,
}

fn page(
    rows: &BTreeMap<(String, Uuid), Tweet>,
    owner: &str,
    before: Option<Uuid>,
    limit: i64,
) -> Vec<Tweet> {
    rows.iter()
        .rev()
        .filter(|((user, id), _)| user == owner && before.map_or(true, |b| *id < b))
        .take(limit.max(0) as usize)
        .map(|(_, tweet)| tweet.clone())
        .collect()
}

impl MemoryTweetStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap()
    }

    pub fn put_timeline(&self, tweet: Tweet) {
        self.lock()
            .timelines
            .insert((tweet.posted_by.clone(), tweet.id), tweet);
    }

    pub fn put_feed(&self, recipient: &str, tweet: Tweet) {
        self.lock()
            .feeds
            .insert((recipient.to_string(), tweet.id), tweet);
    }

    pub fn put_like(&self, username: &str, tweet_id: Uuid) {
        self.lock().likes.insert((tweet_id, username.to_string()));
    }

    pub fn timeline_rows(&self, author: &str, tweet_id: Uuid) -> usize {
        let key = (author.to_string(), tweet_id);
        usize::from(self.lock().timelines.contains_key(&key))
    }

    pub fn timeline_len(&self, author: &str) -> usize {
        self.lock()
            .timelines
            .keys()
            .filter(|(user, _)| user == author)
            .count()
    }

    pub fn feed_rows(&self, recipient: &str, tweet_id: Uuid) -> usize {
        let key = (recipient.to_string(), tweet_id);
        usize::from(self.lock().feeds.contains_key(&key))
    }

    pub fn fail_feed_writes_for(&self, recipient: &str) {
        self.lock().failing_feeds.insert(recipient.to_string());
    }

    pub fn fail_timeline_writes(&self) {
        self.lock().fail_timeline = true;
    }

    pub fn fail_ad_lookups(&self) {
        self.lock().fail_ad_lookups = true;
    }

    /// Timeline and feed page queries served so far.
    pub fn page_reads(&self) -> usize {
        self.lock().page_reads
    }

    /// Parks every feed write until the returned semaphore is given permits.
    pub fn hold_feed_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().feed_gate = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl TweetStore for MemoryTweetStore {
    async fn insert_timeline_entry(&self, tweet: &Tweet) -> Result<(), AppError> {
        let mut inner = self.lock();
        if inner.fail_timeline {
            return Err(AppError::Storage("timeline write refused".to_string()));
        }
        inner
            .timelines
            .insert((tweet.posted_by.clone(), tweet.id), tweet.clone());
        Ok(())
    }

    async fn insert_feed_entry(&self, recipient: &str, tweet: &Tweet) -> Result<(), AppError> {
        let gate = self.lock().feed_gate.clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let mut inner = self.lock();
        if inner.failing_feeds.contains(recipient) {
            return Err(AppError::Storage(format!("feed write refused for {recipient}")));
        }
        inner
            .feeds
            .insert((recipient.to_string(), tweet.id), tweet.clone());
        Ok(())
    }

    async fn query_timeline_entries(
        &self,
        author: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError> {
        let mut inner = self.lock();
        inner.page_reads += 1;
        Ok(page(&inner.timelines, author, before, limit))
    }

    async fn query_feed_entries(
        &self,
        recipient: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError> {
        let mut inner = self.lock();
        inner.page_reads += 1;
        Ok(page(&inner.feeds, recipient, before, limit))
    }

    async fn insert_like(&self, like: &Like) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .likes
            .insert((like.tweet_id, like.username.clone())))
    }

    async fn delete_like(&self, like: &Like) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .likes
            .remove(&(like.tweet_id, like.username.clone())))
    }

    async fn count_likes(&self, tweet_id: Uuid) -> Result<i64, AppError> {
        let count = self
            .lock()
            .likes
            .iter()
            .filter(|(id, _)| *id == tweet_id)
            .count();
        Ok(count as i64)
    }

    async fn liked_by_user(&self, tweet_id: Uuid, username: &str) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .likes
            .contains(&(tweet_id, username.to_string())))
    }

    async fn likes_by_tweet(&self, tweet_id: Uuid) -> Result<Vec<Like>, AppError> {
        Ok(self
            .lock()
            .likes
            .iter()
            .filter(|(id, _)| *id == tweet_id)
            .map(|(id, username)| Like {
                username: username.clone(),
                tweet_id: *id,
            })
            .collect())
    }

    async fn find_tweet_by_id(&self, tweet_id: Uuid) -> Result<Option<Tweet>, AppError> {
        Ok(self
            .lock()
            .timelines
            .values()
            .find(|t| t.id == tweet_id)
            .cloned())
    }

    async fn is_ad(&self, tweet_id: Uuid) -> Result<bool, AppError> {
        if self.lock().fail_ad_lookups {
            return Err(AppError::Storage("ad lookup refused".to_string()));
        }
        Ok(self.find_tweet_by_id(tweet_id).await?.is_some_and(|t| t.ad))
    }

    async fn copy_timeline_into_feed(
        &self,
        author: &str,
        recipient: &str,
    ) -> Result<u64, AppError> {
        let mut inner = self.lock();
        let entries: Vec<Tweet> = inner
            .timelines
            .iter()
            .filter(|((user, _), _)| user == author)
            .map(|(_, t)| t.clone())
            .collect();
        let mut copied = 0;
        for tweet in entries {
            let key = (recipient.to_string(), tweet.id);
            if !inner.feeds.contains_key(&key) {
                inner.feeds.insert(key, tweet);
                copied += 1;
            }
        }
        Ok(copied)
    }
}

// ---------------------------------------------------------------------------
// Social graph
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GraphInner {
    down: bool,
    rejecting: bool,
    hidden: BTreeSet<(String, String)>,
    followers: HashMap<String, BTreeSet<String>>,
    target_members: BTreeSet<String>,
}

/// Scripted social graph. Everyone sees everyone unless hidden; counts every call it receives.
#[derive(Default)]
pub struct FakeSocialGraph {
    inner: Mutex<GraphInner>,
    calls: AtomicUsize,
}

impl FakeSocialGraph {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.inner.lock().unwrap().down = down;
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.inner.lock().unwrap().rejecting = rejecting;
    }

    /// Makes `target`'s posts invisible to `viewer`.
    pub fn hide(&self, viewer: &str, target: &str) {
        self.inner
            .lock()
            .unwrap()
            .hidden
            .insert((viewer.to_string(), target.to_string()));
    }

    pub fn set_followers(&self, user: &str, followers: &[&str]) {
        self.inner.lock().unwrap().followers.insert(
            user.to_string(),
            followers.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn set_target_members(&self, members: &[&str]) {
        self.inner.lock().unwrap().target_members =
            members.iter().map(|m| m.to_string()).collect();
    }

    fn answer<T>(&self, f: impl FnOnce(&GraphInner) -> T) -> Result<T, SocialGraphError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if inner.down {
            return Err(SocialGraphError::Unavailable("connection refused".to_string()));
        }
        if inner.rejecting {
            return Err(SocialGraphError::Rejected {
                status: 400,
                message: "bad request".to_string(),
            });
        }
        Ok(f(&inner))
    }
}

#[async_trait]
impl SocialGraph for FakeSocialGraph {
    async fn check_visibility(
        &self,
        auth: &AuthUser,
        target: &str,
    ) -> Result<bool, SocialGraphError> {
        self.answer(|g| {
            !g.hidden
                .contains(&(auth.username.clone(), target.to_string()))
        })
    }

    async fn followers(&self, auth: &AuthUser) -> Result<BTreeSet<String>, SocialGraphError> {
        self.answer(|g| g.followers.get(&auth.username).cloned().unwrap_or_default())
    }

    async fn target_group_members(
        &self,
        _auth: &AuthUser,
        _group: &TargetGroup,
    ) -> Result<BTreeSet<String>, SocialGraphError> {
        self.answer(|g| g.target_members.clone())
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryImageCache {
    entries: Mutex<HashMap<String, (Bytes, Duration)>>,
    broken: AtomicBool,
}

impl MemoryImageCache {
    pub fn insert(&self, image_id: &str, image: Bytes) {
        self.entries
            .lock()
            .unwrap()
            .insert(image_id.to_string(), (image, Duration::MAX));
    }

    pub fn ttl_of(&self, image_id: &str) -> Option<Duration> {
        self.entries
            .lock()
            .unwrap()
            .get(image_id)
            .map(|(_, ttl)| *ttl)
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(image_id)
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ImageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ImageError::Cache("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageCache for MemoryImageCache {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(image_id)
            .map(|(image, _)| image.clone()))
    }

    async fn put(&self, image_id: &str, image: Bytes, ttl: Duration) -> Result<(), ImageError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(image_id.to_string(), (image, ttl));
        Ok(())
    }

    async fn exists(&self, image_id: &str) -> Result<bool, ImageError> {
        self.check()?;
        Ok(self.contains(image_id))
    }
}

#[derive(Default)]
pub struct MemoryImageStore {
    objects: Mutex<HashMap<String, Bytes>>,
    reads: AtomicUsize,
}

impl MemoryImageStore {
    pub fn insert(&self, image_id: &str, image: Bytes) {
        self.objects
            .lock()
            .unwrap()
            .insert(image_id.to_string(), image);
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(image_id)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().unwrap().get(image_id).cloned())
    }

    async fn put(&self, image_id: &str, image: Bytes) -> Result<(), ImageError> {
        self.insert(image_id, image);
        Ok(())
    }

    async fn exists(&self, image_id: &str) -> Result<bool, ImageError> {
        Ok(self.contains(image_id))
    }
}

// ---------------------------------------------------------------------------
// Ads ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    Created { tweet_id: Uuid, recipients: usize },
    Liked { tweet_id: Uuid, username: String },
    Unliked { tweet_id: Uuid, username: String },
}

#[derive(Default)]
pub struct RecordingAdsLedger {
    events: Mutex<Vec<AdEvent>>,
    failing: AtomicBool,
}

impl RecordingAdsLedger {
    pub fn events(&self) -> Vec<AdEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, event: AdEvent) -> Result<(), AdsLedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdsLedgerError::Api {
                status: 503,
                message: "ledger down".to_string(),
            });
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl AdsLedger for RecordingAdsLedger {
    async fn ad_created(&self, _auth: &AuthUser, ad: &AdCreated) -> Result<(), AdsLedgerError> {
        self.record(AdEvent::Created {
            tweet_id: ad.tweet_id,
            recipients: ad.recipients,
        })
    }

    async fn ad_liked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError> {
        self.record(AdEvent::Liked {
            tweet_id,
            username: auth.username.clone(),
        })
    }

    async fn ad_unliked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError> {
        self.record(AdEvent::Unliked {
            tweet_id,
            username: auth.username.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Every fake wired together behind one shared breaker, the way `main` wires the real ones.
pub struct Fixture {
    pub store: Arc<MemoryTweetStore>,
    pub graph: Arc<FakeSocialGraph>,
    pub image_cache: Arc<MemoryImageCache>,
    pub images_store: Arc<MemoryImageStore>,
    pub ads: Arc<RecordingAdsLedger>,
    pub breaker: Arc<CircuitBreaker>,
    guarded: Arc<GuardedSocialGraph>,
    resolver: Arc<ImageResolver>,
}

impl Fixture {
    pub fn new() -> Self {
        let graph = Arc::new(FakeSocialGraph::default());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::fail_fast(
            "SocialGraph",
            Duration::from_secs(5),
        )));
        let image_cache = Arc::new(MemoryImageCache::default());
        let images_store = Arc::new(MemoryImageStore::default());
        Fixture {
            store: Arc::new(MemoryTweetStore::default()),
            guarded: Arc::new(GuardedSocialGraph::new(graph.clone(), breaker.clone())),
            resolver: Arc::new(ImageResolver::new(
                image_cache.clone(),
                images_store.clone(),
                Duration::from_secs(30),
            )),
            graph,
            image_cache,
            images_store,
            ads: Arc::new(RecordingAdsLedger::default()),
            breaker,
        }
    }

    pub fn user(&self, username: &str) -> AuthUser {
        AuthUser::new(username, "ROLE_USER")
    }

    pub fn business(&self, username: &str) -> AuthUser {
        AuthUser::new(username, ROLE_BUSINESS)
    }

    pub fn assembler(&self) -> FeedAssembler {
        FeedAssembler::new(self.store.clone(), self.guarded.clone(), self.resolver.clone())
    }

    pub fn service(&self) -> TweetService {
        TweetService::new(
            self.store.clone(),
            self.guarded.clone(),
            self.resolver.clone(),
            self.ads.clone(),
        )
    }

    pub fn state(&self) -> AppState {
        AppState {
            service: Arc::new(self.service()),
            breaker: self.breaker.clone(),
            config: test_config(),
        }
    }
}
