//! Element locators and the page-side scripts that resolve them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// XPath expression
    #[serde(rename = "xpath")]
    XPath(String),
    /// Anchor whose normalized visible text contains the given string
    LinkText(String),
}

impl Locator {
    /// Shorthand for a CSS locator.
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Shorthand for an XPath locator.
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Shorthand for a link-text locator.
    pub fn link_text(text: impl Into<String>) -> Self {
        Self::LinkText(text.into())
    }

    /// Link text converted to an XPath over normalized anchor text.
    fn link_text_xpath(text: &str) -> String {
        format!("//a[contains(normalize-space(.), {})]", xpath_literal(text))
    }

    /// JavaScript expression evaluating to the first matching element or `null`.
    #[must_use]
    pub fn to_js(&self) -> String {
        match self {
            Self::Css(selector) => {
                format!("document.querySelector({})", js_string(selector))
            }
            Self::XPath(expr) => xpath_js(expr),
            Self::LinkText(text) => xpath_js(&Self::link_text_xpath(text)),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css `{s}`"),
            Self::XPath(s) => write!(f, "xpath `{s}`"),
            Self::LinkText(s) => write!(f, "link `{s}`"),
        }
    }
}

fn xpath_js(expr: &str) -> String {
    format!(
        "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
        js_string(expr)
    )
}

/// Quote a Rust string as a JavaScript string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Quote text as an XPath 1.0 literal, splitting on mixed quotes.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Script returning whether the element exists, is visible and is enabled.
pub(crate) fn clickable_script(locator: &Locator) -> String {
    format!(
        r"(() => {{
    const el = {};
    if (!el) return false;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    if (!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)) return false;
    return !el.disabled;
}})()",
        locator.to_js()
    )
}

/// Script clicking the element; returns `false` when it has vanished.
pub(crate) fn click_script(locator: &Locator) -> String {
    format!(
        r"(() => {{
    const el = {};
    if (!el) return false;
    el.scrollIntoView({{ block: 'center' }});
    el.click();
    return true;
}})()",
        locator.to_js()
    )
}

/// Script setting a field value and firing input events.
pub(crate) fn fill_script(locator: &Locator, value: &str) -> String {
    format!(
        r"(() => {{
    const el = {};
    if (!el) return false;
    el.focus();
    el.value = {};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()",
        locator.to_js(),
        js_string(value)
    )
}

/// Script submitting a form, either directly or through its submit control.
pub(crate) fn submit_script(locator: &Locator) -> String {
    format!(
        r"(() => {{
    const el = {};
    if (!el) return false;
    if (el.tagName === 'FORM') {{
        el.submit();
    }} else {{
        el.click();
    }}
    return true;
}})()",
        locator.to_js()
    )
}

/// Script returning whether the element exists at all.
pub(crate) fn present_script(locator: &Locator) -> String {
    format!("({}) !== null", locator.to_js())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_locator_is_quoted() {
        let js = Locator::css("input[name=\"leaseNum\"]").to_js();
        assert_eq!(
            js,
            r#"document.querySelector("input[name=\"leaseNum\"]")"#
        );
    }

    #[test]
    fn test_link_text_converts_to_xpath() {
        let js = Locator::link_text("Lease Drop-Crude Oil").to_js();
        assert!(js.contains("document.evaluate"));
        assert!(js.contains("//a[contains(normalize-space(.), 'Lease Drop-Crude Oil')]"));
    }

    #[test]
    fn test_xpath_literal_with_mixed_quotes() {
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn test_locator_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            fields: Vec<Locator>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"fields = [{ css = "input[name='leaseNum']" }, { xpath = "//input[contains(@name,'lease')]" }, { link_text = "Lease Drop - Crude Oil" }]"#,
        )
        .unwrap();
        assert_eq!(parsed.fields[0], Locator::css("input[name='leaseNum']"));
        assert_eq!(
            parsed.fields[1],
            Locator::xpath("//input[contains(@name,'lease')]")
        );
        assert_eq!(parsed.fields[2], Locator::link_text("Lease Drop - Crude Oil"));
    }

    #[test]
    fn test_display_names_kind() {
        assert_eq!(Locator::css("#DPN").to_string(), "css `#DPN`");
    }
}
