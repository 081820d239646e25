//! Output specifications of common social-media scenes.

use serde::Serialize;

/// Grouping used by the scene picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformCategory {
    /// International social networks
    Social,
    /// Chinese platforms
    Chinese,
    /// Profiles, resumes and ID photos
    Professional,
    /// Plain ratios
    Generic,
}

/// Size requirements of one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSpec {
    /// Scene id, e.g. `instagram-post`
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Target aspect ratio
    pub ratio: &'static str,
    /// Recommended `[width, height]`
    pub recommended_size: [u32; 2],
    /// Smallest accepted `[width, height]`
    pub min_size: [u32; 2],
    /// Largest useful `[width, height]`
    pub max_size: [u32; 2],
    /// Short description
    pub description: &'static str,
    /// Grouping
    pub category: PlatformCategory,
}

macro_rules! spec {
    ($id:literal, $name:literal, $ratio:literal, $rec:expr, $min:expr, $max:expr, $desc:literal, $cat:ident) => {
        PlatformSpec {
            id: $id,
            name: $name,
            ratio: $ratio,
            recommended_size: $rec,
            min_size: $min,
            max_size: $max,
            description: $desc,
            category: PlatformCategory::$cat,
        }
    };
}

/// Scene used when the client does not name one.
pub const DEFAULT_SCENE: &str = "instagram-post";

/// Every known scene.
pub static PLATFORM_SPECS: &[PlatformSpec] = &[
    spec!("instagram-post", "Instagram post", "1:1", [1080, 1080], [320, 320], [1080, 1080],
          "Square post that shows the whole picture", Social),
    spec!("instagram-story", "Instagram story", "9:16", [1080, 1920], [750, 1334], [1080, 1920],
          "Full-screen vertical story; keep 250px clear at top and bottom", Social),
    spec!("instagram-reel", "Instagram reel", "9:16", [1080, 1920], [720, 1280], [1080, 1920],
          "Short vertical video cover", Social),
    spec!("tiktok", "TikTok video", "9:16", [1080, 1920], [720, 1280], [1080, 1920],
          "Vertical full-screen video cover", Social),
    spec!("facebook-post", "Facebook post", "1.91:1", [1200, 630], [600, 314], [1200, 630],
          "Best ratio for shared links", Social),
    spec!("facebook-cover", "Facebook cover", "2.7:1", [820, 312], [820, 312], [820, 312],
          "Page header image", Social),
    spec!("twitter-post", "X/Twitter post", "16:9", [1200, 675], [600, 335], [1200, 675],
          "Landscape card image", Social),
    spec!("twitter-header", "X/Twitter header", "3:1", [1500, 500], [1500, 500], [1500, 500],
          "Profile header background", Social),
    spec!("youtube-thumbnail", "YouTube thumbnail", "16:9", [1280, 720], [640, 360], [1280, 720],
          "Video cover that invites clicks", Social),
    spec!("wechat-avatar", "WeChat avatar", "1:1", [200, 200], [64, 64], [640, 640],
          "Shown as a circle; keep the face centered", Chinese),
    spec!("wechat-cover", "WeChat moments cover", "2.35:1", [1200, 510], [720, 306], [1200, 510],
          "Wide personal cover", Chinese),
    spec!("xiaohongshu", "Xiaohongshu note", "3:4", [1080, 1440], [600, 800], [1080, 1440],
          "Vertical note cover", Chinese),
    spec!("linkedin-post", "LinkedIn post", "1.91:1", [1200, 627], [552, 289], [1200, 627],
          "Feed image for shared posts", Professional),
    spec!("linkedin-avatar", "LinkedIn avatar", "1:1", [400, 400], [200, 200], [7680, 4320],
          "Professional head shot", Professional),
    spec!("linkedin-cover", "LinkedIn background", "4:1", [1584, 396], [1192, 220], [1584, 396],
          "Personal brand banner", Professional),
    spec!("resume-photo", "Resume photo", "3:4", [300, 400], [150, 200], [600, 800],
          "Formal portrait", Professional),
    spec!("id-photo", "ID photo", "3:4", [300, 400], [150, 200], [600, 800],
          "Standard ID photo size", Professional),
    spec!("square", "Square", "1:1", [1080, 1080], [200, 200], [2048, 2048],
          "General square format", Generic),
    spec!("landscape", "Landscape 16:9", "16:9", [1920, 1080], [640, 360], [3840, 2160],
          "Standard widescreen", Generic),
    spec!("portrait", "Portrait 9:16", "9:16", [1080, 1920], [360, 640], [2160, 3840],
          "Standard phone portrait", Generic),
];

/// Look up a scene by id.
pub fn find_spec(scene: &str) -> Option<&'static PlatformSpec> {
    PLATFORM_SPECS.iter().find(|s| s.id == scene)
}

/// Scenes in one category, in table order.
pub fn specs_in(category: PlatformCategory) -> impl Iterator<Item = &'static PlatformSpec> {
    PLATFORM_SPECS.iter().filter(move |s| s.category == category)
}
