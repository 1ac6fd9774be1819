use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 3] = [Self::Image, Self::Video, Self::Audio];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Name of the user setting that governs unattended downloads for this category.
    pub fn preference_key(self) -> &'static str {
        match self {
            Self::Image => "imagesPreferenceDownload",
            Self::Video => "videoPreferenceDownload",
            Self::Audio => "audioPreferenceDownload",
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCategory {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "images" | "imagespreferencedownload" => Ok(Self::Image),
            "video" | "videos" | "videopreferencedownload" => Ok(Self::Video),
            "audio" | "audiopreferencedownload" => Ok(Self::Audio),
            _ => Err(ParseEnumError::new("media category", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoDownloadPolicy {
    Never,
    Wifi,
    WifiMobileData,
}

impl AutoDownloadPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Wifi => "wifi",
            Self::WifiMobileData => "wifi_mobile_data",
        }
    }

    pub fn allows(self, network: NetworkKind) -> bool {
        match (self, network) {
            (_, NetworkKind::Offline) | (Self::Never, _) => false,
            (Self::Wifi, NetworkKind::Wifi) => true,
            (Self::Wifi, NetworkKind::Cellular) => false,
            (Self::WifiMobileData, _) => true,
        }
    }
}

impl fmt::Display for AutoDownloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoDownloadPolicy {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "never" => Ok(Self::Never),
            "wifi" => Ok(Self::Wifi),
            "wifi_mobile_data" => Ok(Self::WifiMobileData),
            _ => Err(ParseEnumError::new("auto-download policy", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Wifi,
    Cellular,
    #[serde(rename = "none")]
    Offline,
}

impl NetworkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Offline => "none",
        }
    }
}

impl FromStr for NetworkKind {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(Self::Wifi),
            "cellular" | "mobile" => Ok(Self::Cellular),
            "none" | "offline" => Ok(Self::Offline),
            _ => Err(ParseEnumError::new("network kind", value)),
        }
    }
}

/// Media reference carried by a chat message.
///
/// `title_link` points at the best-quality rendition when the server provides one;
/// `image_url` is the rendition used for inline display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attachment {
    pub fn image(image_url: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            ..Self::default()
        }
    }

    pub fn with_title_link(mut self, title_link: impl Into<String>) -> Self {
        self.title_link = Some(title_link.into());
        self
    }

    pub fn with_image_type(mut self, image_type: impl Into<String>) -> Self {
        self.image_type = Some(image_type.into());
        self
    }

    /// Link used for caching and fetching: `title_link` when present, else `image_url`.
    pub fn preferred_link(&self) -> Option<&str> {
        non_blank(self.title_link.as_deref()).or_else(|| non_blank(self.image_url.as_deref()))
    }

    /// Copy of this attachment whose `title_link` points at local content.
    pub fn with_local_reference(&self, local_reference: impl Into<String>) -> Self {
        Self {
            title_link: Some(local_reference.into()),
            ..self.clone()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Session-wide identity and endpoint shared by every presenter of a chat view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerContext {
    pub base_url: String,
    pub user_id: UserId,
    pub auth_token: String,
}

impl ViewerContext {
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: UserId::new(user_id),
            auth_token: auth_token.into(),
        }
    }
}
