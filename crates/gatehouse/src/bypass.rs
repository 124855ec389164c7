//! Pre-challenge bypass policy.
//!
//! Consulted before the decision engine: search-engine crawlers and
//! traffic the edge layer already cleared by country are allowed through
//! without a token, so the site stays indexable and the geo feature does
//! not challenge the traffic it just approved.

/// Known search-engine bot user-agent signatures (lowercase substrings)
const SEARCH_BOT_SIGNATURES: &[&str] = &[
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "applebot",
    "msnbot",
    "petalbot",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
];

/// Value of X-Geo-Blocked the edge sets when the request is already
/// allowed by country policy
const GEO_ALLOWED_VALUE: &str = "0";

/// Why a request skipped the challenge entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Edge geo layer already allowed this request
    GeoAllowed,
    /// User agent matches a search-engine bot signature
    SearchBot,
}

pub fn is_search_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    SEARCH_BOT_SIGNATURES.iter().any(|sig| ua.contains(sig))
}

/// The geo header is trusted because it arrives on the internal hop from
/// the edge proxy, never from the public internet.
pub fn is_geo_cleared(geo_header: Option<&str>) -> bool {
    geo_header == Some(GEO_ALLOWED_VALUE)
}

/// First-match bypass check; `None` means the challenge machinery runs
pub fn should_bypass(user_agent: &str, geo_header: Option<&str>) -> Option<BypassReason> {
    if is_geo_cleared(geo_header) {
        return Some(BypassReason::GeoAllowed);
    }
    if is_search_bot(user_agent) {
        return Some(BypassReason::SearchBot);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_bots_bypass_regardless_of_case() {
        assert!(is_search_bot(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
        ));
        assert!(is_search_bot("mozilla/5.0 (compatible; BingBot/2.0)"));
        assert_eq!(
            should_bypass("DuckDuckBot/1.1", None),
            Some(BypassReason::SearchBot)
        );
    }

    #[test]
    fn ordinary_browsers_do_not_match() {
        assert!(!is_search_bot(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0"
        ));
        assert_eq!(should_bypass("curl/8.5.0", None), None);
    }

    #[test]
    fn geo_cleared_header_bypasses_before_anything_else() {
        assert_eq!(
            should_bypass("Mozilla/5.0", Some("0")),
            Some(BypassReason::GeoAllowed)
        );
    }

    #[test]
    fn geo_blocked_or_absent_header_does_not_bypass() {
        assert!(!is_geo_cleared(Some("1")));
        assert!(!is_geo_cleared(None));
        assert_eq!(should_bypass("Mozilla/5.0", Some("1")), None);
    }
}
