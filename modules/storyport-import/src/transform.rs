//! Story body → HTML payload.
//!
//! Pure: the same blocks always render the same string. Block kinds we can't
//! render (related reading, unknown types, unrecognized embeds) are dropped.

use std::sync::LazyLock;

use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use storyport_common::ContentBlock;
use tracing::debug;

/// What an empty or fully-dropped body renders to.
pub const EMPTY_PAYLOAD: &str = "<p></p>";

// =============================================================================
// Embed patterns
// =============================================================================

static RE_YOUTUBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .unwrap()
});
static RE_VIMEO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|player\.)?vimeo\.com/(?:video/)?(\d+)").unwrap()
});
static RE_SOCIAL_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|m\.|mobile\.)?(twitter\.com|x\.com|instagram\.com|facebook\.com|fb\.watch|tiktok\.com)/")
        .unwrap()
});

const SOCIAL_PROVIDERS: &[&str] = &["twitter", "instagram", "facebook", "tiktok"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEmbed {
    pub provider: &'static str,
    pub id: String,
}

impl VideoEmbed {
    pub fn player_url(&self) -> String {
        match self.provider {
            "vimeo" => format!("https://player.vimeo.com/video/{}", self.id),
            _ => format!("https://www.youtube.com/embed/{}", self.id),
        }
    }
}

/// Recognize a YouTube or Vimeo URL and pull out its video id.
pub fn video_embed(url: &str) -> Option<VideoEmbed> {
    let url = url.trim();
    if let Some(caps) = RE_YOUTUBE.captures(url) {
        return Some(VideoEmbed {
            provider: "youtube",
            id: caps[1].to_string(),
        });
    }
    RE_VIMEO.captures(url).map(|caps| VideoEmbed {
        provider: "vimeo",
        id: caps[1].to_string(),
    })
}

/// Provider for a social embed, from its URL or, failing that, the block's
/// declared provider (only for http(s) URLs).
pub fn social_provider(url: &str, declared: Option<&str>) -> Option<&'static str> {
    let url = url.trim();
    if let Some(caps) = RE_SOCIAL_HOST.captures(url) {
        return Some(match &caps[1] {
            "twitter.com" | "x.com" => "twitter",
            "instagram.com" => "instagram",
            "facebook.com" | "fb.watch" => "facebook",
            _ => "tiktok",
        });
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return None;
    }
    let declared = declared?.trim().to_ascii_lowercase();
    SOCIAL_PROVIDERS.iter().copied().find(|p| *p == declared)
}

// =============================================================================
// Transformer
// =============================================================================

#[derive(Debug, Clone)]
pub struct ContentTransformer {
    image_base_url: String,
}

impl ContentTransformer {
    pub fn new(image_base_url: impl Into<String>) -> Self {
        Self {
            image_base_url: image_base_url.into(),
        }
    }

    /// Public URL for an image storage key. Absolute keys pass through.
    pub fn image_url(&self, key: &str) -> String {
        let key = key.trim();
        if key.starts_with("https://") || key.starts_with("http://") || self.image_base_url.is_empty() {
            return key.to_string();
        }
        format!(
            "{}/{}",
            self.image_base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }

    /// Render the body in order. Never returns an empty string.
    pub fn render(&self, blocks: &[ContentBlock]) -> String {
        let html: String = blocks
            .iter()
            .filter_map(|block| self.render_block(block))
            .collect::<Vec<_>>()
            .join("\n");

        if html.is_empty() {
            EMPTY_PAYLOAD.to_string()
        } else {
            html
        }
    }

    fn render_block(&self, block: &ContentBlock) -> Option<String> {
        match block {
            ContentBlock::Text { content } => {
                if content.trim().is_empty() {
                    return None;
                }
                // CMS text is already markup; kept verbatim.
                Some(format!("<p>{content}</p>"))
            }
            ContentBlock::Image {
                key,
                alt_text,
                title,
                caption,
            } => {
                let key = key.as_deref().map(str::trim).filter(|k| !k.is_empty());
                let Some(key) = key else {
                    debug!("Dropping image block without a storage key");
                    return None;
                };
                let alt = non_blank(alt_text.as_deref())
                    .or_else(|| non_blank(title.as_deref()))
                    .unwrap_or("");

                let mut html = format!(
                    r#"<figure><img src="{}" alt="{}">"#,
                    encode_double_quoted_attribute(&self.image_url(key)),
                    encode_double_quoted_attribute(alt),
                );
                if let Some(caption) = non_blank(caption.as_deref()) {
                    html.push_str(&format!("<figcaption>{}</figcaption>", encode_text(caption)));
                }
                html.push_str("</figure>");
                Some(html)
            }
            ContentBlock::Video { url } => match video_embed(url) {
                Some(embed) => Some(format!(
                    r#"<div data-video-provider="{}"><iframe src="{}" allowfullscreen></iframe></div>"#,
                    embed.provider,
                    encode_double_quoted_attribute(&embed.player_url()),
                )),
                None => {
                    debug!(url = url.as_str(), "Dropping unrecognized video embed");
                    None
                }
            },
            ContentBlock::Social { url, provider } => {
                match social_provider(url, provider.as_deref()) {
                    Some(provider) => {
                        let url = url.trim();
                        Some(format!(
                            r#"<blockquote data-embed="{provider}"><a href="{}">{}</a></blockquote>"#,
                            encode_double_quoted_attribute(url),
                            encode_text(url),
                        ))
                    }
                    None => {
                        debug!(url = url.as_str(), "Dropping unrecognized social embed");
                        None
                    }
                }
            }
            ContentBlock::SectionTitle { text, level } => {
                let text = non_blank(Some(text.as_str()))?;
                let level = level.unwrap_or(2).clamp(2, 4);
                Some(format!("<h{level}>{}</h{level}>", encode_text(text)))
            }
            ContentBlock::RelatedReading | ContentBlock::Unsupported => None,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
