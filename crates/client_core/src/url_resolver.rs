use shared::{domain::ViewerContext, media::is_inline_image};
use url::Url;

use crate::UrlResolver;

const AUTH_TOKEN_PARAM: &str = "rc_token";
const AUTH_USER_PARAM: &str = "rc_uid";

/// Resolves attachment links against the chat server and appends the viewer's credentials.
///
/// Relative links are appended to `base_url` verbatim, so servers hosted under a sub-path keep it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentUrlResolver;

impl UrlResolver for AttachmentUrlResolver {
    fn resolve(&self, raw_link: Option<&str>, viewer: &ViewerContext) -> Option<String> {
        let link = raw_link.map(str::trim).filter(|link| !link.is_empty())?;
        if is_inline_image(link) {
            return Some(link.to_string());
        }

        let absolute = match Url::parse(link) {
            Ok(_) => link.to_string(),
            Err(_) => {
                let base = viewer.base_url.trim().trim_end_matches('/');
                let separator = if link.starts_with('/') { "" } else { "/" };
                format!("{base}{separator}{link}")
            }
        };

        let mut url = Url::parse(&encode_uri(&absolute)).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if !url.query_pairs().any(|(key, _)| key == AUTH_TOKEN_PARAM) {
            url.query_pairs_mut()
                .append_pair(AUTH_USER_PARAM, viewer.user_id.as_str())
                .append_pair(AUTH_TOKEN_PARAM, &viewer.auth_token);
        }
        Some(url.into())
    }
}

/// Percent-encodes what `encodeURI` would, leaving existing `%XX` escapes intact.
fn encode_uri(input: &str) -> String {
    const KEPT: &[u8] = b";,/?:@&=+$-_.!~*'()#";
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let is_escape = b == b'%'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
        if b.is_ascii_alphanumeric() || KEPT.contains(&b) || is_escape {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
        i += 1;
    }
    out
}

#[cfg(test)]
#[path = "tests/url_resolver_tests.rs"]
mod tests;
