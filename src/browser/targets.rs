//! Page-target discovery and selection.
//!
//! Targets come from the browser's HTTP inspection endpoint (`/json/list`,
//! `/json/version`), never from a cached WebSocket URL — the browser may have
//! been restarted between calls.

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// One navigable tab as reported by `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct PageTarget {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser", default)]
    browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Browser identity plus the ws endpoint, from `/json/version`.
#[derive(Debug, Clone)]
pub struct BrowserEndpoint {
    pub browser: String,
    pub ws_url: String,
}

pub async fn fetch_endpoint(client: &reqwest::Client, base: &str) -> Result<BrowserEndpoint> {
    let info: VersionInfo = client
        .get(format!("{base}/json/version"))
        .send()
        .await
        .map_err(|e| BridgeError::BrowserUnreachable(format!("{base}/json/version: {e}")))?
        .json()
        .await
        .map_err(|e| BridgeError::BrowserUnreachable(format!("bad version payload: {e}")))?;
    Ok(BrowserEndpoint {
        browser: info.browser,
        ws_url: info.web_socket_debugger_url,
    })
}

pub async fn fetch_targets(client: &reqwest::Client, base: &str) -> Result<Vec<PageTarget>> {
    let targets: Vec<PageTarget> = client
        .get(format!("{base}/json/list"))
        .send()
        .await
        .map_err(|e| BridgeError::BrowserUnreachable(format!("{base}/json/list: {e}")))?
        .json()
        .await
        .map_err(|e| BridgeError::BrowserUnreachable(format!("bad target payload: {e}")))?;
    Ok(targets.into_iter().filter(|t| t.kind == "page").collect())
}

const INTERNAL_PREFIXES: &[&str] = &["devtools://", "chrome://", "chrome-extension://", "about:"];

/// Browser-internal pages are never what the agent wants to attach to.
pub fn is_internal_url(url: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|p| url.starts_with(p))
}

pub fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

/// Host portion of a URL or origin, brackets kept for IPv6.
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = match authority.rsplit_once(':') {
        // `[::1]:3000` keeps its brackets; a bare `::1` has no port split.
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) && !h.is_empty() => h,
        _ => authority,
    };
    Some(host)
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_loopback_http(url: &str) -> bool {
    is_http(url) && url_host(url).is_some_and(is_loopback_host)
}

/// Preference cascade over an already-filtered list of page targets:
/// loopback HTTP(S) first, then any HTTP(S), then any non-internal,
/// then whatever is there.
pub fn choose_default_target(targets: &[PageTarget]) -> Option<&PageTarget> {
    let external: Vec<&PageTarget> =
        targets.iter().filter(|t| !is_internal_url(&t.url)).collect();
    external
        .iter()
        .find(|t| is_loopback_http(&t.url))
        .or_else(|| external.iter().find(|t| is_http(&t.url)))
        .copied()
        .or_else(|| external.first().copied())
        .or_else(|| targets.first())
}

/// Match targets against a case-insensitive URL substring, applying the
/// same preference cascade among the matches.
pub fn choose_by_pattern<'t>(targets: &'t [PageTarget], pattern: &str) -> Option<&'t PageTarget> {
    let needle = pattern.to_lowercase();
    let matches: Vec<PageTarget> = targets
        .iter()
        .filter(|t| t.url.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    let chosen = choose_default_target(&matches)?;
    targets.iter().find(|t| t.id == chosen.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, url: &str) -> PageTarget {
        PageTarget {
            id: id.to_string(),
            title: String::new(),
            kind: "page".to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn internal_urls_are_recognized() {
        assert!(is_internal_url("devtools://devtools/bundled/inspector.html"));
        assert!(is_internal_url("chrome://newtab/"));
        assert!(is_internal_url("chrome-extension://abcdef/popup.html"));
        assert!(is_internal_url("about:blank"));
        assert!(!is_internal_url("http://localhost:3000/"));
        assert!(!is_internal_url("file:///tmp/index.html"));
    }

    #[test]
    fn prefers_loopback_http_over_external_http() {
        let targets = vec![
            target("a", "devtools://devtools/inspector.html"),
            target("b", "https://example.com/"),
            target("c", "http://localhost:5173/app"),
        ];
        assert_eq!(choose_default_target(&targets).unwrap().id, "c");
    }

    #[test]
    fn falls_back_to_non_internal_non_http() {
        let targets = vec![
            target("a", "chrome://newtab/"),
            target("b", "file:///srv/site/index.html"),
        ];
        assert_eq!(choose_default_target(&targets).unwrap().id, "b");
    }

    #[test]
    fn falls_back_to_first_when_all_internal() {
        let targets = vec![
            target("a", "about:blank"),
            target("b", "chrome://version/"),
        ];
        assert_eq!(choose_default_target(&targets).unwrap().id, "a");
    }

    #[test]
    fn loopback_hosts() {
        for url in [
            "http://localhost:3000/",
            "http://127.0.0.1/",
            "https://[::1]:8443/x",
        ] {
            assert!(is_loopback_http(url), "{url}");
        }
        assert!(!is_loopback_http("http://192.168.1.4:3000/"));
        assert!(!is_loopback_http("ftp://localhost/"));
    }

    #[test]
    fn pattern_match_is_case_insensitive_substring() {
        let targets = vec![
            target("a", "http://localhost:3000/Admin"),
            target("b", "https://example.com/admin"),
        ];
        assert_eq!(choose_by_pattern(&targets, "ADMIN").unwrap().id, "a");
        assert_eq!(choose_by_pattern(&targets, "example").unwrap().id, "b");
        assert!(choose_by_pattern(&targets, "missing").is_none());
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert!(choose_default_target(&[]).is_none());
    }
}
