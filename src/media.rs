//! Turns listing entries into displayable media items.
//!
//! Classification is permissive: anything that is not a recognized still image
//! is treated as an MP4 video, and nothing here can fail.

use std::fmt;

use crate::device::DeviceTier;
use crate::remote::ListedFile;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const LOW_END_SUFFIX: &str = ".low.mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Still image; holds the lowercased file extension.
    Image(String),
    Video,
}

impl ContentType {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ext) => write!(f, "image/{ext}"),
            Self::Video => f.write_str("video/mp4"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    url: String,
    content_type: ContentType,
}

impl MediaItem {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn is_image(&self) -> bool {
        self.content_type.is_image()
    }

    pub fn is_video(&self) -> bool {
        self.content_type.is_video()
    }
}

/// Classify a single listing entry by its key and pick the URL to play.
pub fn classify(key: &str, url: &str, tier: DeviceTier) -> MediaItem {
    let content_type = match image_extension(key) {
        Some(ext) => ContentType::Image(ext),
        None => ContentType::Video,
    };
    let url = if content_type.is_video() && tier.is_low_end() {
        low_end_variant(url)
    } else {
        url.to_owned()
    };
    MediaItem { url, content_type }
}

/// Classify a whole listing, keeping the server's order.
pub fn classify_listing<I>(files: I, tier: DeviceTier) -> Vec<MediaItem>
where
    I: IntoIterator<Item = ListedFile>,
{
    files
        .into_iter()
        .map(|file| classify(&file.key, &file.public_url, tier))
        .collect()
}

fn image_extension(key: &str) -> Option<String> {
    let (_, ext) = key.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Point a video URL at its pre-transcoded low-bitrate sibling.
///
/// Replaces the trailing `.ext` of the path with `.low.mp4`, leaving any query
/// or fragment intact. URLs whose path has no trailing extension come back
/// unchanged.
pub fn low_end_variant(url: &str) -> String {
    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, tail) = url.split_at(split);
    let Some(dot) = path.rfind('.') else {
        return url.to_owned();
    };
    let ext = &path[dot + 1..];
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return url.to_owned();
    }
    format!("{}{}{}", &path[..dot], LOW_END_SUFFIX, tail)
}
