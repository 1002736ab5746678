// Cache and messaging layer

pub mod client;
pub mod pubsub;

pub use client::CacheClient;
pub use pubsub::MessageHandler;
