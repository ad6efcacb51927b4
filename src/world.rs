use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use headless_chrome::Tab;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::types::{
    AGENT_ID_ATTRIBUTE, ELEMENT_ID_MAX_CHARS, IntentMap, InteractiveElement, Link, WorldModel,
};

/// Roles considered interactive when scanning the page.
pub const INTERACTIVE_SELECTOR: &str = "a, button, input, textarea, select";

/// First pass: read raw facts about the page without touching it.
/// Element order is document order, which the tagging pass relies on.
const COLLECT_JS: &str = r#"
(() => {
  const els = Array.from(document.querySelectorAll('a, button, input, textarea, select'));
  const elements = els.map((el, index) => ({
    index,
    tag: el.tagName.toLowerCase(),
    role: el.getAttribute('role'),
    name: (el.getAttribute('aria-label') || el.textContent || '').trim(),
    domId: el.id || null,
    value: 'value' in el ? String(el.value) : null,
  }));
  const headings = Array.from(document.querySelectorAll('h1, h2, h3, h4, h5, h6'))
    .map(h => (h.textContent || '').trim())
    .filter(t => t.length > 0);
  const links = Array.from(document.querySelectorAll('a')).map(a => ({
    text: (a.textContent || '').trim(),
    href: a.href,
  }));
  return JSON.stringify({ title: document.title, headings, links, elements });
})()
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    index: usize,
    tag: String,
    role: Option<String>,
    name: String,
    dom_id: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    title: String,
    headings: Vec<String>,
    links: Vec<Link>,
    elements: Vec<RawElement>,
}

/// Deterministic candidate id: role + normalized accessible name + DOM id,
/// truncated. Empty names and roles are tolerated (the tag name stands in
/// for a missing role).
fn candidate_element_id(role: &str, name: &str, dom_id: Option<&str>) -> String {
    let normalized = name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");

    let mut id = role.to_string();
    if !normalized.is_empty() {
        id.push('-');
        id.push_str(&normalized);
    }
    if let Some(dom_id) = dom_id {
        id.push_str("-id-");
        id.push_str(dom_id);
    }
    id.chars().take(ELEMENT_ID_MAX_CHARS).collect()
}

fn positional_id(index: usize) -> String {
    format!("interactive-element-{index}")
}

/// Second pass input: which final id goes onto which element, by position.
struct Assignment {
    index: usize,
    element_id: String,
}

/// Compute final element ids for a raw extraction. Collisions and nameless
/// elements fall back to a positional id, so ids are unique within one
/// extraction. When an intent map from a prior pass is supplied, its
/// aliases replace the generated ids.
fn assign_element_ids(
    raw: &[RawElement],
    intent_map: Option<&IntentMap>,
) -> (Vec<InteractiveElement>, Vec<Assignment>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut elements = Vec::with_capacity(raw.len());
    let mut assignments = Vec::with_capacity(raw.len());

    for el in raw {
        let role = el.role.clone().unwrap_or_else(|| el.tag.clone());
        let candidate = candidate_element_id(&role, &el.name, el.dom_id.as_deref());

        let mut element_id = if candidate.is_empty() || seen.contains(&candidate) {
            positional_id(el.index)
        } else {
            candidate
        };

        if let Some(map) = intent_map
            && let Some(alias) = map.alias_for(&element_id)
        {
            element_id = alias.to_string();
        }

        seen.insert(element_id.clone());
        assignments.push(Assignment {
            index: el.index,
            element_id: element_id.clone(),
        });
        elements.push(InteractiveElement {
            element_id,
            role,
            name: el.name.clone(),
            value: el.value.clone().filter(|v| !v.is_empty()),
        });
    }

    (elements, assignments)
}

fn tagging_js(assignments: &[Assignment]) -> Result<String> {
    let pairs: Vec<serde_json::Value> = assignments
        .iter()
        .map(|a| json!({ "index": a.index, "id": a.element_id }))
        .collect();
    let pairs = serde_json::to_string(&pairs)?;

    Ok(format!(
        r#"(() => {{
  const els = document.querySelectorAll('{INTERACTIVE_SELECTOR}');
  for (const a of {pairs}) {{
    const el = els[a.index];
    if (el) el.setAttribute('{AGENT_ID_ATTRIBUTE}', a.id);
  }}
  return true;
}})()"#
    ))
}

/// Snapshot the current page into a world model and tag every interactive
/// element in place with its final id. The only DOM mutation is the
/// identifying attribute. Runs on the blocking browser channel.
pub fn build_world_model(
    tab: &Arc<Tab>,
    previous_screenshot: Option<String>,
    intent_map: Option<&IntentMap>,
) -> Result<WorldModel> {
    let result = tab
        .evaluate(COLLECT_JS, false)
        .context("page scan failed")?;
    let raw_json = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "{\"title\":\"\",\"headings\":[],\"links\":[],\"elements\":[]}".into());

    let raw: RawPage = serde_json::from_str(&raw_json).context("page scan returned bad JSON")?;
    let (interactive_elements, assignments) = assign_element_ids(&raw.elements, intent_map);

    if !assignments.is_empty() {
        tab.evaluate(&tagging_js(&assignments)?, false)
            .context("element tagging failed")?;
    }

    debug!(
        elements = interactive_elements.len(),
        title = %raw.title,
        "world model built"
    );

    Ok(WorldModel {
        title: raw.title,
        headings: raw.headings,
        links: raw.links,
        interactive_elements,
        screenshot: previous_screenshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionableElement;

    fn raw(index: usize, tag: &str, role: Option<&str>, name: &str, dom_id: Option<&str>) -> RawElement {
        RawElement {
            index,
            tag: tag.to_string(),
            role: role.map(str::to_string),
            name: name.to_string(),
            dom_id: dom_id.map(str::to_string),
            value: None,
        }
    }

    #[test]
    fn id_generation_is_deterministic() {
        let a = candidate_element_id("a", "Home Page", Some("nav-home"));
        let b = candidate_element_id("a", "Home Page", Some("nav-home"));
        assert_eq!(a, b);
        assert_eq!(a, "a-home-page-id-nav-home");
    }

    #[test]
    fn id_is_truncated_to_bounded_length() {
        let long_name = "x".repeat(200);
        let id = candidate_element_id("button", &long_name, None);
        assert_eq!(id.chars().count(), ELEMENT_ID_MAX_CHARS);
    }

    #[test]
    fn collision_falls_back_to_positional_id() {
        let elements = vec![
            raw(0, "button", None, "Submit", None),
            raw(1, "button", None, "Submit", None),
        ];
        let (out, _) = assign_element_ids(&elements, None);
        assert_eq!(out[0].element_id, "button-submit");
        assert_eq!(out[1].element_id, "interactive-element-1");
    }

    #[test]
    fn nameless_element_gets_role_only_id() {
        let elements = vec![raw(0, "input", None, "", None)];
        let (out, _) = assign_element_ids(&elements, None);
        assert_eq!(out[0].element_id, "input");
        assert_eq!(out[0].role, "input");
    }

    #[test]
    fn ids_are_unique_within_one_extraction() {
        let elements = vec![
            raw(0, "a", None, "Docs", None),
            raw(1, "a", None, "Docs", None),
            raw(2, "a", None, "Docs", None),
            raw(3, "a", None, "", None),
            raw(4, "a", None, "", None),
        ];
        let (out, _) = assign_element_ids(&elements, None);
        let mut ids: Vec<_> = out.iter().map(|e| e.element_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), out.len());
    }

    #[test]
    fn intent_map_alias_replaces_generated_id() {
        let elements = vec![raw(0, "a", None, "Home", None)];
        let map = IntentMap {
            user_intent: "go home".to_string(),
            actionable_elements: vec![ActionableElement {
                original_element_id: "a-home".to_string(),
                element_id: "link-home".to_string(),
                role: "a".to_string(),
                name: "Home".to_string(),
                reasoning: "takes the user home".to_string(),
            }],
            next_best_action: "click the home link".to_string(),
            suggested_next_steps: vec![],
        };
        let (out, assignments) = assign_element_ids(&elements, Some(&map));
        assert_eq!(out[0].element_id, "link-home");
        // The DOM tag reflects the alias too.
        assert_eq!(assignments[0].element_id, "link-home");
    }

    #[test]
    fn zero_interactive_elements_is_fine() {
        let (out, assignments) = assign_element_ids(&[], None);
        assert!(out.is_empty());
        assert!(assignments.is_empty());
    }

    #[test]
    fn explicit_role_attribute_wins_over_tag() {
        let elements = vec![raw(0, "a", Some("tab"), "Settings", None)];
        let (out, _) = assign_element_ids(&elements, None);
        assert_eq!(out[0].element_id, "tab-settings");
        assert_eq!(out[0].role, "tab");
    }

    #[test]
    fn tagging_js_embeds_assignments_as_json() {
        let assignments = vec![Assignment {
            index: 3,
            element_id: "search-bar".to_string(),
        }];
        let js = tagging_js(&assignments).unwrap();
        assert!(js.contains("\"index\":3"));
        assert!(js.contains("\"id\":\"search-bar\""));
        assert!(js.contains(AGENT_ID_ATTRIBUTE));
    }
}
