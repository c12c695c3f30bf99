pub mod tweet;

pub use tweet::{Like, NewAd, NewTweet, TargetGroup, Tweet, TweetContent, TweetView};
