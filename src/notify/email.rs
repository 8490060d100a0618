//! Email rendering: announcement fan-out and standing-query alerts.
//!
//! Forum HTML is not mail-client friendly: entities arrive double-escaped,
//! image sources point at authenticated redirect URLs, and iframes will not
//! load outside the forum. The renderer repairs what it can and degrades the
//! rest to a "view on forum" pointer.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::Html;

use crate::config::EMAIL_SOURCE;
use crate::email::OutboundEmail;
use crate::types::{AnnouncementPost, NotificationConfig};

const PLAIN_TEXT_MAX_CHARS: usize = 500;

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img[^>]*>").expect("img regex"));
static IMG_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"prefix=([^&"'>\s]+)"#).expect("prefix regex"));
static IMG_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src=["'][^"']*["']"#).expect("src regex"));
static IFRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<iframe[^>]*>.*?</iframe>").expect("iframe regex"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x?[0-9a-fA-F]+);").expect("numeric entity regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Renders the operator email for a fresh announcement post.
pub fn render_announcement(
    config: &NotificationConfig,
    announcement: &AnnouncementPost,
) -> OutboundEmail {
    let post_label = announcement
        .post_number
        .map(|n| format!("@{n}"))
        .unwrap_or_else(|| "post".to_string());

    OutboundEmail {
        source: format!("{} on {}", announcement.course_name, EMAIL_SOURCE),
        to: config.recipient_email.clone(),
        subject: format!(
            "Piazza announcement {post_label} for {}",
            announcement.course_name
        ),
        text_body: announcement_text_body(announcement),
        html_body: Some(announcement_html_body(announcement)),
    }
}

/// Renders the alert sent when a standing query matches a new chunk.
pub fn render_standing_query_alert(
    recipient: &str,
    query: &str,
    course_display_name: &str,
    course_id: &str,
    post_title: &str,
    root_id: &str,
) -> OutboundEmail {
    let url = post_url(course_id, root_id);
    let text_body = format!(
        "A new relevant Piazza post was just created for your question \"{query}\" for {course_display_name}\n\n\
         GP-TA found this relevant post for you, titled \"{post_title}\". Check it out here: {url}"
    );
    let html_body = format!(
        "<p>A new relevant Piazza post was just created for your question \
         <strong>\"{query}\"</strong> for <strong>{course}</strong>.</p>\
         <p>GP-TA found this relevant post for you, titled \"{title}\".</p>\
         <p><a href=\"{url}\">View the post on Piazza</a></p>",
        query = html_escape(query),
        course = html_escape(course_display_name),
        title = html_escape(post_title),
    );

    OutboundEmail {
        source: EMAIL_SOURCE.to_string(),
        to: recipient.to_string(),
        subject: format!("GP-TA found a relevant post for {course_display_name}"),
        text_body,
        html_body: Some(html_body),
    }
}

pub fn post_url(course_id: &str, post_id: &str) -> String {
    format!("https://piazza.com/class/{course_id}/post/{post_id}")
}

fn announcement_text_body(announcement: &AnnouncementPost) -> String {
    let url = post_url(&announcement.course_id, &announcement.post_id);
    let preview = plain_text_preview(&announcement.post_content, PLAIN_TEXT_MAX_CHARS);

    format!(
        "Hello,\n\n\
         A new course announcement has been posted in {course}.\n\n\
         Subject: {subject}\n\n\
         {preview}\n\
         View the full announcement here: {url}\n\n\
         Happy learning!\n\
         - The GP-TA Team",
        course = announcement.course_name,
        subject = unescape_entities(&announcement.post_subject),
    )
}

fn announcement_html_body(announcement: &AnnouncementPost) -> String {
    let url = post_url(&announcement.course_id, &announcement.post_id);
    let subject = html_escape(&unescape_entities(&announcement.post_subject));
    let content = sanitize_announcement_html(&announcement.post_content);
    let course = html_escape(&announcement.course_name);

    format!(
        r#"<html>
<head>
<style>
  body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333333; max-width: 800px; margin: 0 auto; padding: 20px; }}
  .announcement-content {{ background-color: #ffffff; padding: 20px; border-left: 4px solid #1a73e8; margin: 20px 0; }}
  .cta-button {{ display: inline-block; background-color: #1a73e8; color: white !important; padding: 12px 24px; text-decoration: none; border-radius: 5px; margin-top: 20px; }}
  a {{ color: #1a73e8; text-decoration: none; }}
</style>
</head>
<body>
  <p>Hello,</p>
  <p>A new announcement has been posted in <strong>{course}</strong>:</p>
  <div class="announcement-content">
    <h3 style="margin-top: 0;">{subject}</h3>
    {content}
  </div>
  <a href="{url}" class="cta-button">View Full Announcement on Piazza</a>
  <p style="margin-top: 30px;">Happy learning!<br>- The GP-TA Team</p>
</body>
</html>"#
    )
}

/// Prepares forum HTML for embedding in an email body: entity unescape,
/// redirect-image rewrite, iframe replacement.
pub fn sanitize_announcement_html(content: &str) -> String {
    let content = unescape_entities(content);
    let content = rewrite_forum_images(&content);
    IFRAME_RE
        .replace_all(
            &content,
            r#"<span style="color: #666; font-style: italic;">[Embedded content - view on Piazza]</span>"#,
        )
        .into_owned()
}

/// Rewrites forum redirect image URLs to direct CDN URLs where the redirect
/// carries a `prefix=` parameter.
pub fn rewrite_forum_images(content: &str) -> String {
    IMG_TAG_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            match IMG_PREFIX_RE.captures(tag) {
                Some(prefix_caps) => {
                    let prefix = percent_decode_str(&prefix_caps[1]).decode_utf8_lossy();
                    let cdn_url = format!("https://cdn-uploads.piazza.com/{prefix}");
                    IMG_SRC_RE
                        .replace(tag, format!(r#"src="{cdn_url}""#).as_str())
                        .into_owned()
                }
                None => tag.to_string(),
            }
        })
        .into_owned()
}

/// Minimal HTML entity unescaping: the handful of named entities the forum
/// emits plus numeric references.
pub fn unescape_entities(content: &str) -> String {
    let content = NUMERIC_ENTITY_RE.replace_all(content, |caps: &regex::Captures<'_>| {
        let body = &caps[1];
        let parsed = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            body.parse::<u32>().ok()
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    content
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plain-text alternative: strips markup, collapses whitespace, and
/// truncates on a word boundary.
pub fn plain_text_preview(html: &str, max_chars: usize) -> String {
    let decoded = unescape_entities(html);
    let fragment = Html::parse_fragment(&decoded);
    let text = fragment.root_element().text().collect::<Vec<_>>().join("");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = text.trim();

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let clipped: String = text.chars().take(max_chars).collect();
    let truncated = match clipped.rfind(' ') {
        Some(space) => &clipped[..space],
        None => clipped.as_str(),
    };
    format!("{truncated}...")
}
