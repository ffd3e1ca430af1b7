//! YouTube Data API v3 client library, limited to what uploading a video needs.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use youtube_uploader::upload::Uploader;
//! use youtube_uploader::youtube_api::YouTubeClient;
//!
//! # fn example() -> eyre::Result<()> {
//! let uploader = Uploader::new(YouTubeClient::new()?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod videos;

pub use client::YouTubeClient;
pub use videos::{PrivacyStatus, Video, VideoSnippet, VideoStatus};
