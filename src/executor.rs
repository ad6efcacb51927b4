use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Tab};
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::types::ActionOutcome;

/// Bound on waiting for a page to reach a stable load state.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared deadline for the click race: in-page navigation vs. a new tab
/// appearing. Hitting it is not an error.
pub const CLICK_RACE_TIMEOUT: Duration = Duration::from_secs(8);

const CLICK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Prefix `https://` when the URL carries no scheme.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub fn navigation_message(url: &str) -> String {
    format!("Navigated to {url}")
}

fn capture_screenshot(tab: &Arc<Tab>) -> Option<String> {
    match tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true) {
        Ok(bytes) => Some(BASE64.encode(bytes)),
        Err(e) => {
            warn!("screenshot failed: {e:#}");
            None
        }
    }
}

/// Navigate the tab to a URL and wait for it to settle.
pub fn navigate(tab: &Arc<Tab>, url: &str) -> Result<ActionOutcome, ExecutionError> {
    let url = normalize_url(url);

    tab.navigate_to(&url)
        .map_err(|e| ExecutionError::new("navigate", &url, format!("{e:#}")))?;
    tab.wait_until_navigated()
        .map_err(|e| ExecutionError::new("navigate", &url, format!("navigation timed out: {e:#}")))?;

    Ok(ActionOutcome {
        message: navigation_message(&url),
        screenshot: capture_screenshot(tab),
        navigation_occurred: true,
    })
}

/// Result of a click, including the tab to hand control to when the click
/// spawned a new one.
pub struct ClickResult {
    pub outcome: ActionOutcome,
    pub new_tab: Option<Arc<Tab>>,
}

fn open_tabs(browser: &Browser) -> Vec<Arc<Tab>> {
    browser.get_tabs().lock().unwrap().clone()
}

/// Click a tagged element, then race two outcomes under one deadline:
/// in-page navigation completing, or a new browser tab being created.
/// Whichever resolves first wins; neither resolving is not an error.
pub fn click(
    browser: &Browser,
    tab: &Arc<Tab>,
    selector: &str,
    element_id: &str,
) -> Result<ClickResult, ExecutionError> {
    let tabs_before = open_tabs(browser).len();
    let url_before = tab.get_url();

    let element = tab
        .find_element(selector)
        .map_err(|e| ExecutionError::new("click", element_id, format!("{e:#}")))?;
    element
        .click()
        .map_err(|e| ExecutionError::new("click", element_id, format!("{e:#}")))?;

    let deadline = Instant::now() + CLICK_RACE_TIMEOUT;
    let mut navigation_occurred = false;
    let mut new_tab = None;

    while Instant::now() < deadline {
        std::thread::sleep(CLICK_POLL_INTERVAL);

        let tabs = open_tabs(browser);
        if tabs.len() > tabs_before {
            debug!(element_id, "click opened a new tab");
            new_tab = tabs.last().cloned();
            navigation_occurred = true;
            break;
        }
        if tab.get_url() != url_before {
            let _ = tab.wait_until_navigated();
            navigation_occurred = true;
            break;
        }
    }

    let active = new_tab.as_ref().unwrap_or(tab);
    match capture_screenshot(active) {
        Some(screenshot) => Ok(ClickResult {
            outcome: ActionOutcome {
                message: format!("Clicked {element_id}"),
                screenshot: Some(screenshot),
                navigation_occurred,
            },
            new_tab,
        }),
        // Degraded result: the click closed every tab out from under us.
        None => Ok(ClickResult {
            outcome: ActionOutcome {
                message: format!("Clicked {element_id}; the page is no longer available"),
                screenshot: None,
                navigation_occurred: true,
            },
            new_tab,
        }),
    }
}

/// Focus a tagged element, clear it, and send the text as keystrokes.
pub fn type_text(
    tab: &Arc<Tab>,
    selector: &str,
    element_id: &str,
    text: &str,
) -> Result<ActionOutcome, ExecutionError> {
    let element = tab
        .find_element(selector)
        .map_err(|e| ExecutionError::new("type", element_id, format!("{e:#}")))?;
    element
        .click()
        .map_err(|e| ExecutionError::new("type", element_id, format!("{e:#}")))?;

    let js_selector = selector.replace('\'', "\\'");
    tab.evaluate(
        &format!("const el = document.querySelector('{js_selector}'); if (el) el.value = ''"),
        false,
    )
    .map_err(|e| ExecutionError::new("type", element_id, format!("{e:#}")))?;

    tab.type_str(text)
        .map_err(|e| ExecutionError::new("type", element_id, format!("{e:#}")))?;

    Ok(ActionOutcome {
        message: format!("Typed \"{text}\" into {element_id}"),
        screenshot: capture_screenshot(tab),
        navigation_occurred: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_prefixed_when_absent() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(
            normalize_url("example.com/path?q=1"),
            "https://example.com/path?q=1"
        );
    }

    #[test]
    fn existing_schemes_are_preserved() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
    }

    #[test]
    fn navigation_message_matches_reported_format() {
        assert_eq!(
            navigation_message(&normalize_url("example.com")),
            "Navigated to https://example.com"
        );
    }
}
