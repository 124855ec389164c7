//! Challenge page rendering.
//!
//! Produces the themed, localized HTML page embedding the configured
//! provider's widget. Site key, page title, and page message are
//! operator-controlled but rendered into a public, unauthenticated page:
//! every such value is HTML-entity-escaped where it lands in markup or
//! attributes, and JS-string-escaped where it lands inside the inline
//! script. The return URL is restricted to same-origin relative paths.

use bastion_common::constants::CHALLENGE_COOKIE;
use bastion_common::{ChallengeConfig, ChallengeReason, ChallengeType, PageLanguage};

/// Everything the renderer needs for one page
pub struct PageContext<'a> {
    pub config: &'a ChallengeConfig,
    pub host_id: Option<i64>,
    pub reason: ChallengeReason,
    pub return_url: Option<&'a str>,
    pub accept_language: Option<&'a str>,
    pub fallback_language: PageLanguage,
}

/// Escape a value for HTML text and attribute context
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a value for a double-quoted JS string literal. `<`, `>` and
/// `&` are hex-escaped so the literal can never terminate the
/// surrounding script block.
pub fn escape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3c"),
            '>' => out.push_str("\\x3e"),
            '&' => out.push_str("\\x26"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

/// Only same-origin relative paths are accepted as redirect targets
pub fn sanitize_return_url(raw: Option<&str>) -> String {
    match raw {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Resolve the page language: explicit preference first, then the
/// browser's Accept-Language, then the configured fallback.
pub fn resolve_language(
    preference: PageLanguage,
    accept_language: Option<&str>,
    fallback: PageLanguage,
) -> PageLanguage {
    if preference != PageLanguage::Auto {
        return preference;
    }
    if let Some(header) = accept_language {
        for part in header.split(',') {
            let tag = part.split(';').next().unwrap_or("").trim().to_lowercase();
            if tag.starts_with("de") {
                return PageLanguage::De;
            }
            if tag.starts_with("en") {
                return PageLanguage::En;
            }
        }
    }
    match fallback {
        PageLanguage::Auto => PageLanguage::En,
        other => other,
    }
}

struct UiStrings {
    verifying: &'static str,
    verified: &'static str,
    failed: &'static str,
    noscript: &'static str,
}

const EN: UiStrings = UiStrings {
    verifying: "Verifying…",
    verified: "Verified. Redirecting…",
    failed: "Verification failed. Please try again.",
    noscript: "JavaScript is required to complete this check.",
};

const DE: UiStrings = UiStrings {
    verifying: "Überprüfung läuft…",
    verified: "Bestätigt. Sie werden weitergeleitet…",
    failed: "Die Überprüfung ist fehlgeschlagen. Bitte versuchen Sie es erneut.",
    noscript: "Für diese Überprüfung wird JavaScript benötigt.",
};

fn ui_strings(language: PageLanguage) -> &'static UiStrings {
    match language {
        PageLanguage::De => &DE,
        _ => &EN,
    }
}

/// Provider script tag for the page head
fn widget_script(challenge_type: ChallengeType, site_key: &str) -> String {
    match challenge_type {
        ChallengeType::RecaptchaV2 => {
            r#"<script src="https://www.google.com/recaptcha/api.js" async defer></script>"#
                .to_string()
        }
        ChallengeType::RecaptchaV3 => format!(
            r#"<script src="https://www.google.com/recaptcha/api.js?render={}"></script>"#,
            escape_html(site_key)
        ),
        ChallengeType::Hcaptcha => {
            r#"<script src="https://js.hcaptcha.com/1/api.js" async defer></script>"#.to_string()
        }
        ChallengeType::Turnstile => {
            r#"<script src="https://challenges.cloudflare.com/turnstile/v0/api.js" async defer></script>"#
                .to_string()
        }
    }
}

/// Provider widget markup for the page body. reCAPTCHA v3 is invisible
/// and auto-executes from the inline script instead.
fn widget_markup(challenge_type: ChallengeType, site_key: &str, theme: &str) -> String {
    let key = escape_html(site_key);
    match challenge_type {
        ChallengeType::RecaptchaV2 => format!(
            r#"<div class="g-recaptcha" data-sitekey="{key}" data-theme="{theme}" data-callback="onSolved"></div>"#
        ),
        ChallengeType::RecaptchaV3 => r#"<div id="invisible-widget"></div>"#.to_string(),
        ChallengeType::Hcaptcha => format!(
            r#"<div class="h-captcha" data-sitekey="{key}" data-theme="{theme}" data-callback="onSolved"></div>"#
        ),
        ChallengeType::Turnstile => format!(
            r#"<div class="cf-turnstile" data-sitekey="{key}" data-theme="{theme}" data-callback="onSolved"></div>"#
        ),
    }
}

/// Widget reset call used after a failed verify so checkbox-style
/// providers can be retried immediately
fn widget_reset(challenge_type: ChallengeType) -> &'static str {
    match challenge_type {
        ChallengeType::RecaptchaV2 => "if (window.grecaptcha) { grecaptcha.reset(); }",
        ChallengeType::RecaptchaV3 => "scheduleExecute();",
        ChallengeType::Hcaptcha => "if (window.hcaptcha) { hcaptcha.reset(); }",
        ChallengeType::Turnstile => "if (window.turnstile) { turnstile.reset(); }",
    }
}

/// Auto-execute block for the invisible reCAPTCHA v3 flow
fn v3_execute(challenge_type: ChallengeType, site_key: &str) -> String {
    if challenge_type != ChallengeType::RecaptchaV3 {
        return "function scheduleExecute() {}".to_string();
    }
    format!(
        r#"function scheduleExecute() {{
    grecaptcha.ready(function () {{
      grecaptcha.execute("{}", {{ action: "challenge" }}).then(window.onSolved);
    }});
  }}
  scheduleExecute();"#,
        escape_js(site_key)
    )
}

/// Render the full challenge page
pub fn render(ctx: &PageContext<'_>) -> String {
    let config = ctx.config;
    let language = resolve_language(config.language, ctx.accept_language, ctx.fallback_language);
    let strings = ui_strings(language);
    let theme = config.theme.as_str();

    let title = escape_html(&config.page_title);
    let message = escape_html(&config.page_message);
    let return_url = escape_js(&sanitize_return_url(ctx.return_url));
    let host_json = match ctx.host_id {
        Some(id) => id.to_string(),
        None => "null".to_string(),
    };

    let script = format!(
        r#"(function () {{
  var startedAt = Date.now();
  var statusEl = document.getElementById("challenge-status");
  function showStatus(text) {{ statusEl.textContent = text; }}
  function fail() {{
    showStatus("{failed}");
    {reset}
  }}
  window.onSolved = function (token) {{
    showStatus("{verifying}");
    fetch("/challenge/verify", {{
      method: "POST",
      headers: {{ "Content-Type": "application/json" }},
      body: JSON.stringify({{
        token: token,
        proxy_host_id: {host_json},
        challenge_reason: "{reason}",
        elapsed_ms: Date.now() - startedAt
      }})
    }}).then(function (resp) {{ return resp.json(); }}).then(function (data) {{
      if (data.success && data.token) {{
        var expires = new Date(data.expires_at).toUTCString();
        document.cookie = "{cookie}=" + data.token + "; Path=/; Expires=" + expires + "; SameSite=Lax";
        showStatus("{verified}");
        window.location.replace("{return_url}");
      }} else {{
        fail();
      }}
    }}).catch(fail);
  }};
  {execute}
}})();"#,
        failed = strings.failed,
        reset = widget_reset(config.challenge_type),
        verifying = strings.verifying,
        host_json = host_json,
        reason = ctx.reason.as_str(),
        cookie = CHALLENGE_COOKIE,
        verified = strings.verified,
        return_url = return_url,
        execute = v3_execute(config.challenge_type, &config.site_key),
    );

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  {widget_script}
  <style>
    :root {{ --fg: #1b1f24; --bg: #f5f6f8; --card: #ffffff; --muted: #57606a; --border: #d0d7de; }}
    body.dark {{ --fg: #e6edf3; --bg: #0d1117; --card: #161b22; --muted: #8b949e; --border: #30363d; }}
    body {{ font-family: system-ui, sans-serif; color: var(--fg); background: var(--bg); margin: 0; display: flex; min-height: 100vh; align-items: center; justify-content: center; }}
    .challenge {{ background: var(--card); border: 1px solid var(--border); border-radius: 8px; padding: 32px; max-width: 420px; width: 100%; text-align: center; }}
    .challenge h1 {{ font-size: 1.3rem; margin: 0 0 12px; }}
    .message {{ color: var(--muted); margin: 0 0 24px; }}
    .widget {{ display: flex; justify-content: center; margin-bottom: 16px; }}
    .status {{ min-height: 1.2em; color: var(--muted); font-size: 0.9rem; margin: 0; }}
  </style>
</head>
<body class="{theme}">
  <main class="challenge">
    <h1>{title}</h1>
    <p class="message">{message}</p>
    <div class="widget">{widget}</div>
    <p id="challenge-status" class="status" role="status"></p>
    <noscript><p class="status">{noscript}</p></noscript>
  </main>
  <script>{script}</script>
</body>
</html>
"#,
        lang = language.as_str(),
        title = title,
        widget_script = widget_script(config.challenge_type, &config.site_key),
        theme = theme,
        message = message,
        widget = widget_markup(config.challenge_type, &config.site_key, theme),
        noscript = strings.noscript,
        script = script,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_common::ChallengeTheme;

    fn page_config() -> ChallengeConfig {
        let mut config = ChallengeConfig::fallback(Some(1));
        config.enabled = true;
        config.challenge_type = ChallengeType::RecaptchaV2;
        config.site_key = "site-key-123".to_string();
        config
    }

    fn ctx<'a>(config: &'a ChallengeConfig) -> PageContext<'a> {
        PageContext {
            config,
            host_id: Some(1),
            reason: ChallengeReason::GeoRestriction,
            return_url: Some("/account"),
            accept_language: None,
            fallback_language: PageLanguage::En,
        }
    }

    #[test]
    fn html_escaping_covers_the_usual_suspects() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn js_escaping_neutralizes_script_breakouts() {
        let escaped = escape_js("</script><script>alert(1)</script>");
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(escaped.contains("\\x3c"));
        assert_eq!(escape_js("a\\\"b\nc"), "a\\\\\\\"b\\nc");
    }

    #[test]
    fn hostile_page_title_is_neutralized_in_markup() {
        let mut config = page_config();
        config.page_title = "</script><script>alert(1)</script>".to_string();

        let html = render(&ctx(&config));
        assert!(!html.contains("</script><script>alert(1)</script>"));
        assert!(html.contains("&lt;/script&gt;&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn hostile_site_key_is_neutralized_in_attribute_context() {
        let mut config = page_config();
        config.site_key = r#""><script>alert(1)</script>"#.to_string();

        let html = render(&ctx(&config));
        assert!(!html.contains(r#""><script>alert(1)</script>"#));
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn hostile_site_key_is_neutralized_in_script_context() {
        let mut config = page_config();
        config.challenge_type = ChallengeType::RecaptchaV3;
        config.site_key = "</script><script>alert(1)</script>".to_string();

        let html = render(&ctx(&config));
        assert!(!html.contains("execute(\"</script>"));
        assert!(html.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn each_provider_gets_its_widget() {
        let mut config = page_config();

        config.challenge_type = ChallengeType::RecaptchaV2;
        assert!(render(&ctx(&config)).contains("g-recaptcha"));

        config.challenge_type = ChallengeType::Hcaptcha;
        assert!(render(&ctx(&config)).contains("h-captcha"));

        config.challenge_type = ChallengeType::Turnstile;
        assert!(render(&ctx(&config)).contains("cf-turnstile"));

        config.challenge_type = ChallengeType::RecaptchaV3;
        let html = render(&ctx(&config));
        assert!(html.contains("grecaptcha.execute"));
        assert!(html.contains("api.js?render="));
    }

    #[test]
    fn theme_lands_on_body_and_widget() {
        let mut config = page_config();
        config.theme = ChallengeTheme::Dark;

        let html = render(&ctx(&config));
        assert!(html.contains(r#"<body class="dark">"#));
        assert!(html.contains(r#"data-theme="dark""#));
    }

    #[test]
    fn language_negotiation_prefers_explicit_setting() {
        assert_eq!(
            resolve_language(PageLanguage::De, Some("en-US,en;q=0.9"), PageLanguage::En),
            PageLanguage::De
        );
    }

    #[test]
    fn language_negotiation_reads_accept_language() {
        assert_eq!(
            resolve_language(PageLanguage::Auto, Some("de-DE,de;q=0.9,en;q=0.5"), PageLanguage::En),
            PageLanguage::De
        );
        assert_eq!(
            resolve_language(PageLanguage::Auto, Some("fr-FR,fr;q=0.9"), PageLanguage::De),
            PageLanguage::De
        );
        assert_eq!(
            resolve_language(PageLanguage::Auto, None, PageLanguage::Auto),
            PageLanguage::En
        );
    }

    #[test]
    fn localized_strings_show_up() {
        let mut config = page_config();
        config.language = PageLanguage::De;

        let html = render(&ctx(&config));
        assert!(html.contains("fehlgeschlagen"));
        assert!(html.contains(r#"<html lang="de">"#));
    }

    #[test]
    fn return_url_is_limited_to_relative_paths() {
        assert_eq!(sanitize_return_url(Some("/account")), "/account");
        assert_eq!(sanitize_return_url(Some("https://evil.example/")), "/");
        assert_eq!(sanitize_return_url(Some("//evil.example")), "/");
        assert_eq!(sanitize_return_url(Some("/a\\b")), "/");
        assert_eq!(sanitize_return_url(None), "/");
    }

    #[test]
    fn page_posts_back_with_scope_and_reason() {
        let config = page_config();
        let html = render(&ctx(&config));

        assert!(html.contains("/challenge/verify"));
        assert!(html.contains("proxy_host_id: 1"));
        assert!(html.contains(r#"challenge_reason: "geo_restriction""#));
        assert!(html.contains("ng_challenge"));
        assert!(html.contains("SameSite=Lax"));
    }
}
