use rama::http::Uri;

use super::{OriginMatcher, rewrite_origin_urls};

const PROXY: &str = "https://127.0.0.1:4443";

fn matcher(origin: &'static str) -> OriginMatcher {
    OriginMatcher::try_from_uri(&Uri::from_static(origin)).unwrap()
}

#[test]
fn test_origin_requires_scheme_and_host() {
    assert!(OriginMatcher::try_from_uri(&Uri::from_static("/relative/path")).is_err());
    assert!(OriginMatcher::try_from_uri(&Uri::from_static("https://backend.test:9443")).is_ok());
}

#[test]
fn test_single_occurrence_preserves_path_and_query() {
    let backend = matcher("https://backend.test:9443");
    let body = br#"{"nextLink":"https://backend.test:9443/dbs/life/colls?page=2"}"#;
    assert_eq!(
        Some(r#"{"nextLink":"https://127.0.0.1:4443/dbs/life/colls?page=2"}"#.to_owned()),
        rewrite_origin_urls(body, &backend, PROXY),
    );
}

#[test]
fn test_many_occurrences_all_rewritten() {
    let backend = matcher("https://backend.test:9443");
    let body = concat!(
        r#"{"_self":"https://backend.test:9443/dbs/life","#,
        r#""colls":["https://backend.test:9443/dbs/life/colls/a/","#,
        r#""https://backend.test:9443/dbs/life/colls/b/"]}"#,
    );
    let rewritten = rewrite_origin_urls(body.as_bytes(), &backend, PROXY).unwrap();
    assert_eq!(3, rewritten.matches(PROXY).count());
    assert!(!rewritten.contains("backend.test"));
}

#[test]
fn test_rewrite_is_idempotent() {
    let backend = matcher("https://backend.test:9443");
    let body = br#"{"link":"https://backend.test:9443/dbs/x"}"#;
    let once = rewrite_origin_urls(body, &backend, PROXY).unwrap();
    // a body holding only proxy-origin URLs is left alone
    assert_eq!(None, rewrite_origin_urls(once.as_bytes(), &backend, PROXY));
}

#[test]
fn test_binary_body_passes_through() {
    let backend = matcher("https://backend.test:9443");
    let body = [0x68, 0x74, 0x74, 0x70, 0xff, 0xfe, 0x00];
    assert_eq!(None, rewrite_origin_urls(&body, &backend, PROXY));
}

#[test]
fn test_unrelated_text_untouched() {
    let backend = matcher("https://backend.test:9443");
    for body in [
        "no urls at all",
        "https://other.test:9443/path",
        "https://backend.test:9443", // no trailing slash, not an occurrence
        "https://backend.test:1234/other-port",
        "http://backend.test:9443/wrong-scheme",
    ] {
        assert_eq!(
            None,
            rewrite_origin_urls(body.as_bytes(), &backend, PROXY),
            "body = {body}",
        );
    }
}

#[test]
fn test_scheme_and_host_match_case_insensitively() {
    let backend = matcher("https://backend.test:9443");
    let body = "HTTPS://Backend.TEST:9443/dbs";
    assert_eq!(
        Some("https://127.0.0.1:4443/dbs".to_owned()),
        rewrite_origin_urls(body.as_bytes(), &backend, PROXY),
    );
}

#[test]
fn test_default_port_equivalence() {
    let backend = matcher("https://backend.test");
    for body in [
        "https://backend.test/dbs",
        "https://backend.test:443/dbs",
    ] {
        assert_eq!(
            Some("https://127.0.0.1:4443/dbs".to_owned()),
            rewrite_origin_urls(body.as_bytes(), &backend, PROXY),
            "body = {body}",
        );
    }
}

#[test]
fn test_explicit_non_default_port_required() {
    let backend = matcher("http://backend.test:8080");
    assert_eq!(
        None,
        rewrite_origin_urls(b"http://backend.test/dbs", &backend, PROXY),
    );
    assert_eq!(
        Some("https://127.0.0.1:4443/dbs".to_owned()),
        rewrite_origin_urls(b"http://backend.test:8080/dbs", &backend, PROXY),
    );
}

#[test]
fn test_proxy_base_trailing_slash_is_normalized() {
    let backend = matcher("https://backend.test:9443");
    assert_eq!(
        Some("https://127.0.0.1:4443/dbs".to_owned()),
        rewrite_origin_urls(
            b"https://backend.test:9443/dbs",
            &backend,
            "https://127.0.0.1:4443/",
        ),
    );
}

#[test]
fn test_adjacent_and_surrounding_text_kept() {
    let backend = matcher("https://backend.test:9443");
    let body = "pre https://backend.test:9443/a post https://backend.test:9443/b end";
    assert_eq!(
        Some(format!("pre {PROXY}/a post {PROXY}/b end")),
        rewrite_origin_urls(body.as_bytes(), &backend, PROXY),
    );
}
