pub mod assembler;
pub mod fanout;
pub mod handlers;
pub mod service;

pub use service::TweetService;
