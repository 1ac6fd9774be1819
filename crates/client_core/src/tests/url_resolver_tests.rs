use super::*;

fn viewer() -> ViewerContext {
    ViewerContext::new("https://chat.example.com/", "viewer-1", "tok-9")
}

fn resolve(link: Option<&str>) -> Option<String> {
    AttachmentUrlResolver.resolve(link, &viewer())
}

#[test]
fn missing_or_blank_link_resolves_to_nothing() {
    assert_eq!(resolve(None), None);
    assert_eq!(resolve(Some("   ")), None);
}

#[test]
fn relative_link_is_joined_and_authenticated() {
    assert_eq!(
        resolve(Some("/file-upload/abc/photo.jpg")).as_deref(),
        Some("https://chat.example.com/file-upload/abc/photo.jpg?rc_uid=viewer-1&rc_token=tok-9")
    );
    assert_eq!(
        resolve(Some("img/full.jpg")).as_deref(),
        Some("https://chat.example.com/img/full.jpg?rc_uid=viewer-1&rc_token=tok-9")
    );
}

#[test]
fn sub_path_of_base_url_is_kept() {
    let viewer = ViewerContext::new("https://example.com/chat", "u", "t");
    assert_eq!(
        AttachmentUrlResolver
            .resolve(Some("/file-upload/a.png"), &viewer)
            .as_deref(),
        Some("https://example.com/chat/file-upload/a.png?rc_uid=u&rc_token=t")
    );
}

#[test]
fn absolute_link_gets_auth_params_after_existing_query() {
    assert_eq!(
        resolve(Some("https://cdn.example.com/a.png?size=large")).as_deref(),
        Some("https://cdn.example.com/a.png?size=large&rc_uid=viewer-1&rc_token=tok-9")
    );
}

#[test]
fn already_authenticated_link_is_left_alone() {
    let link = "https://chat.example.com/a.png?rc_uid=other&rc_token=existing";
    assert_eq!(resolve(Some(link)).as_deref(), Some(link));
}

#[test]
fn inline_image_passes_through() {
    let inline = "data:image/png;base64,iVBORw0KGgo=";
    assert_eq!(resolve(Some(inline)).as_deref(), Some(inline));
}

#[test]
fn spaces_are_encoded_and_escapes_preserved() {
    assert_eq!(
        resolve(Some("/file-upload/my photo%201.jpg")).as_deref(),
        Some("https://chat.example.com/file-upload/my%20photo%201.jpg?rc_uid=viewer-1&rc_token=tok-9")
    );
}

#[test]
fn relative_link_without_base_url_is_unresolvable() {
    let viewer = ViewerContext::new("", "u", "t");
    assert_eq!(AttachmentUrlResolver.resolve(Some("img/a.png"), &viewer), None);
}

#[test]
fn non_http_schemes_are_rejected() {
    assert_eq!(resolve(Some("file:///etc/passwd")), None);
}

#[test]
fn auth_params_go_into_query_not_fragment() {
    let resolved = resolve(Some("https://chat.example.com/a.jpg#frag")).expect("resolved");
    assert_eq!(
        resolved,
        "https://chat.example.com/a.jpg?rc_uid=viewer-1&rc_token=tok-9#frag"
    );

    let parsed = Url::parse(&resolved).expect("valid url");
    assert_eq!(parsed.fragment(), Some("frag"));
    assert!(parsed
        .query_pairs()
        .any(|(key, value)| key == "rc_token" && value == "tok-9"));
}

#[test]
fn reserved_characters_in_credentials_are_encoded() {
    let viewer = ViewerContext::new("https://chat.example.com", "user+1", "a&b=c#d");
    let resolved = AttachmentUrlResolver
        .resolve(Some("/img/full.jpg"), &viewer)
        .expect("resolved");

    let parsed = Url::parse(&resolved).expect("valid url");
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    assert_eq!(
        pairs,
        vec![
            ("rc_uid".to_string(), "user+1".to_string()),
            ("rc_token".to_string(), "a&b=c#d".to_string()),
        ]
    );
    assert_eq!(parsed.fragment(), None);
}
