//! The fixed description attached to the uploaded video.

use crate::youtube_api::videos::{PrivacyStatus, Video, VideoSnippet, VideoStatus};

const TITLE: &str = "Erstes Video vom Buup!";
const DESCRIPTION: &str =
    "Den Quellcode dazu findest du unter: https://github.com/LernMoment/YouTubeBulkUploader";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub privacy_status: PrivacyStatus,
}

/// Builds the metadata every upload of this tool carries.
pub fn build_metadata() -> VideoMetadata {
    VideoMetadata {
        title: TITLE.to_string(),
        description: DESCRIPTION.to_string(),
        privacy_status: PrivacyStatus::Unlisted,
    }
}

impl From<&VideoMetadata> for Video {
    fn from(metadata: &VideoMetadata) -> Self {
        Video {
            id: None,
            snippet: Some(VideoSnippet {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
            }),
            status: Some(VideoStatus {
                privacy_status: metadata.privacy_status,
            }),
        }
    }
}
