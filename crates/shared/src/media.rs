//! Pure helpers shared by the resolver, the media store and the presenter.

use crate::domain::MediaCategory;

const INLINE_IMAGE_PREFIX: &str = "data:image/";
const MAX_FILE_STEM_LEN: usize = 48;

/// True when `reference` embeds the image itself (`data:image/<subtype>;base64,...`)
/// instead of pointing at remote content.
pub fn is_inline_image(reference: &str) -> bool {
    let Some(rest) = reference.strip_prefix(INLINE_IMAGE_PREFIX) else {
        return false;
    };
    let Some((subtype, _payload)) = rest.split_once(";base64,") else {
        return false;
    };
    !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// File extension for a MIME type, ignoring parameters such as `; charset=`.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/heic" => "heic",
        "image/heif" => "heif",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/3gpp" => "3gp",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "weba",
        _ => return None,
    };
    Some(ext)
}

/// Strips query string and fragment; cache identity must not depend on auth tokens.
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Last path segment of `url` without query, split into (stem, extension).
pub fn file_name_parts(url: &str) -> (&str, Option<&str>) {
    let path = strip_query(url);
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 => {
            (stem, Some(ext))
        }
        _ => (last, None),
    }
}

/// Extension picked for a cached file: MIME first, then the URL's own, then the category default.
pub fn cache_extension(category: MediaCategory, mime_type: Option<&str>, url: &str) -> String {
    if let Some(ext) = mime_type.and_then(extension_for_mime) {
        return ext.to_string();
    }
    if let (_, Some(ext)) = file_name_parts(url) {
        let ext = sanitize_component(ext).to_ascii_lowercase();
        if !ext.is_empty() {
            return ext;
        }
    }
    category.default_extension().to_string()
}

/// Makes `raw` safe as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_FILE_STEM_LEN));
    let mut last_was_sep = false;
    for c in raw.chars() {
        if out.len() >= MAX_FILE_STEM_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
