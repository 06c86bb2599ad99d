//! Observation walk: one item per `observation` element.
//!
//! The walk is the original-preserving base extraction — grab everything
//! that looks like a value first, refine with master hints where the
//! item is known. Rows without a `code/@code` cannot identify their
//! measurement and are skipped outright.

use std::collections::HashMap;

use kenshin_utils::text::strip_or_none;

use crate::{NS_XSI, hl7_child, is_hl7};

/// Declared value types an item master may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    St,
    Pq,
    Cd,
    Co,
}

impl ValueType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::St => "ST",
            Self::Pq => "PQ",
            Self::Cd => "CD",
            Self::Co => "CO",
        }
    }

    /// Parse a master's declared type; anything outside the four known
    /// types yields `None` (the node's own `xsi:type` then decides).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ST" => Some(Self::St),
            "PQ" => Some(Self::Pq),
            "CD" => Some(Self::Cd),
            "CO" => Some(Self::Co),
            _ => None,
        }
    }
}

/// How to pull the value out of the value node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueMethod {
    /// `@value` attribute, falling back to element text.
    #[default]
    Default,
    /// A named attribute (`@code`, `@value`, ...).
    Attr(String),
    /// Direct element text only.
    Text,
    /// Concatenated descendant text.
    StringAll,
}

impl ValueMethod {
    /// Parse the master's `value_method` hint. Unknown spellings fall
    /// back to [`ValueMethod::Text`]-like behavior via `Default`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let t = s.trim();
        if t.is_empty() {
            return Self::Default;
        }
        if let Some(attr) = t.strip_prefix('@') {
            return Self::Attr(attr.to_string());
        }
        match t {
            "text()" | "text" => Self::Text,
            "string()" | "string" => Self::StringAll,
            _ => Self::Default,
        }
    }
}

/// Per-namecode extraction hints derived from the item master.
#[derive(Debug, Clone, Default)]
pub struct ValueHints {
    pub value_type: Option<ValueType>,
    pub value_method: ValueMethod,
}

/// One extracted observation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationItem {
    pub namecode: String,
    /// 1-based per-namecode counter within the document.
    pub occurrence_no: i64,
    pub value_raw: Option<String>,
    pub value_type: Option<String>,
    pub unit: Option<String>,
    pub code_system: Option<String>,
    pub code_value: Option<String>,
    pub code_display: Option<String>,
}

fn direct_text(node: roxmltree::Node<'_, '_>) -> Option<String> {
    strip_or_none(node.text())
}

fn all_text(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let joined: String = node.descendants().filter_map(|n| n.text()).collect();
    strip_or_none(Some(joined.as_str()))
}

fn extract_by_method(node: roxmltree::Node<'_, '_>, method: &ValueMethod) -> Option<String> {
    match method {
        ValueMethod::Default => {
            strip_or_none(node.attribute("value")).or_else(|| direct_text(node))
        }
        ValueMethod::Attr(attr) => strip_or_none(node.attribute(attr.as_str())),
        ValueMethod::Text => direct_text(node),
        ValueMethod::StringAll => all_text(node),
    }
}

fn xsi_type(node: roxmltree::Node<'_, '_>) -> Option<String> {
    strip_or_none(node.attribute((NS_XSI, "type")))
}

/// Value-type precedence: master hint, then `xsi:type`, then "ST when
/// any value is present".
fn infer_value_type(
    node: roxmltree::Node<'_, '_>,
    master_type: Option<ValueType>,
) -> Option<String> {
    if let Some(t) = master_type {
        return Some(t.as_str().to_string());
    }
    if let Some(t) = xsi_type(node) {
        return Some(t);
    }
    if node.attribute("value").is_some() || direct_text(node).is_some() {
        return Some("ST".to_string());
    }
    None
}

/// Walk every `observation` element, emitting one row per
/// (namecode, occurrence).
#[must_use]
pub fn collect_observations(
    doc: &roxmltree::Document<'_>,
    hints: &HashMap<String, ValueHints>,
) -> Vec<ObservationItem> {
    let mut out = Vec::new();
    let mut occurrences: HashMap<String, i64> = HashMap::new();

    for obs in doc
        .descendants()
        .filter(|n| is_hl7(n, "observation"))
    {
        let Some(code_node) = hl7_child(obs, "code") else {
            continue;
        };
        let Some(namecode) = strip_or_none(code_node.attribute("code")) else {
            continue;
        };

        // value is authoritative; text is the fallback carrier.
        let value_node = hl7_child(obs, "value").or_else(|| hl7_child(obs, "text"));

        let hint = hints.get(&namecode);
        let method = hint.map(|h| h.value_method.clone()).unwrap_or_default();
        let master_type = hint.and_then(|h| h.value_type);

        let (value_raw, value_type, unit, v_system, v_code, v_display) = match value_node {
            Some(node) => (
                extract_by_method(node, &method),
                infer_value_type(node, master_type),
                strip_or_none(node.attribute("unit")),
                strip_or_none(node.attribute("codeSystem")),
                strip_or_none(node.attribute("code")),
                strip_or_none(node.attribute("displayName")),
            ),
            None => (None, master_type.map(|t| t.as_str().to_string()), None, None, None, None),
        };

        let occurrence = occurrences.entry(namecode.clone()).or_insert(0);
        *occurrence += 1;

        out.push(ObservationItem {
            namecode: namecode.clone(),
            occurrence_no: *occurrence,
            value_raw,
            value_type,
            unit,
            code_system: v_system.or_else(|| strip_or_none(code_node.attribute("codeSystem"))),
            code_value: v_code.or_else(|| strip_or_none(code_node.attribute("code"))),
            code_display: v_display
                .or_else(|| strip_or_none(code_node.attribute("displayName"))),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBSERVATIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ClinicalDocument xmlns="urn:hl7-org:v3"
                  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <component><structuredBody><component><section><entry>
    <observation>
      <code code="9N001000000000001" codeSystem="1.2.392.200119.6.1005"/>
      <value xsi:type="PQ" value="172.1" unit="cm"/>
    </observation>
  </entry><entry>
    <observation>
      <code code="3F015000002327101"/>
      <value xsi:type="CD" code="1" codeSystem="1.2.392.200119.6.2065" displayName="（－）"/>
    </observation>
  </entry><entry>
    <observation>
      <code code="9N001000000000001"/>
      <value xsi:type="PQ" value="171.9" unit="cm"/>
    </observation>
  </entry><entry>
    <observation>
      <code code="9A110160700000011"/>
      <text>特記事項なし</text>
    </observation>
  </entry><entry>
    <observation>
      <value xsi:type="ST">コード無し</value>
    </observation>
  </entry></section></component></structuredBody></component>
</ClinicalDocument>"#;

    fn collect(hints: &HashMap<String, ValueHints>) -> Vec<ObservationItem> {
        let doc = roxmltree::Document::parse(OBSERVATIONS).unwrap();
        collect_observations(&doc, hints)
    }

    #[test]
    fn occurrence_counters_are_per_namecode_and_gapless() {
        let items = collect(&HashMap::new());
        // The code-less observation is skipped.
        assert_eq!(items.len(), 4);

        let heights: Vec<_> = items
            .iter()
            .filter(|i| i.namecode == "9N001000000000001")
            .collect();
        assert_eq!(heights.len(), 2);
        assert_eq!(heights[0].occurrence_no, 1);
        assert_eq!(heights[1].occurrence_no, 2);
        assert_eq!(heights[0].value_raw.as_deref(), Some("172.1"));
        assert_eq!(heights[1].value_raw.as_deref(), Some("171.9"));
    }

    #[test]
    fn pq_value_carries_unit_and_xsi_type() {
        let items = collect(&HashMap::new());
        let h = &items[0];
        assert_eq!(h.value_type.as_deref(), Some("PQ"));
        assert_eq!(h.unit.as_deref(), Some("cm"));
    }

    #[test]
    fn cd_value_attributes_pass_through() {
        let items = collect(&HashMap::new());
        let cd = items
            .iter()
            .find(|i| i.namecode == "3F015000002327101")
            .unwrap();
        assert_eq!(cd.value_type.as_deref(), Some("CD"));
        assert_eq!(cd.code_value.as_deref(), Some("1"));
        assert_eq!(cd.code_system.as_deref(), Some("1.2.392.200119.6.2065"));
        assert_eq!(cd.code_display.as_deref(), Some("（－）"));
    }

    #[test]
    fn text_fallback_when_value_is_absent() {
        let items = collect(&HashMap::new());
        let note = items
            .iter()
            .find(|i| i.namecode == "9A110160700000011")
            .unwrap();
        assert_eq!(note.value_raw.as_deref(), Some("特記事項なし"));
        // No xsi:type, no @value, but text content: inferred ST.
        assert_eq!(note.value_type.as_deref(), Some("ST"));
    }

    #[test]
    fn master_type_beats_node_type() {
        let mut hints = HashMap::new();
        hints.insert(
            "9N001000000000001".to_string(),
            ValueHints {
                value_type: Some(ValueType::St),
                value_method: ValueMethod::Default,
            },
        );
        let items = collect(&hints);
        assert_eq!(items[0].value_type.as_deref(), Some("ST"));
    }

    #[test]
    fn attr_method_reads_the_named_attribute() {
        let mut hints = HashMap::new();
        hints.insert(
            "3F015000002327101".to_string(),
            ValueHints {
                value_type: Some(ValueType::Cd),
                value_method: ValueMethod::parse("@code"),
            },
        );
        let items = collect(&hints);
        let cd = items
            .iter()
            .find(|i| i.namecode == "3F015000002327101")
            .unwrap();
        assert_eq!(cd.value_raw.as_deref(), Some("1"));
    }

    #[test]
    fn value_method_parsing() {
        assert_eq!(ValueMethod::parse(""), ValueMethod::Default);
        assert_eq!(ValueMethod::parse("@value"), ValueMethod::Attr("value".into()));
        assert_eq!(ValueMethod::parse("text()"), ValueMethod::Text);
        assert_eq!(ValueMethod::parse("string()"), ValueMethod::StringAll);
        assert_eq!(ValueMethod::parse("mystery"), ValueMethod::Default);
    }

    #[test]
    fn value_type_parsing() {
        assert_eq!(ValueType::parse(" pq "), Some(ValueType::Pq));
        assert_eq!(ValueType::parse("INT"), None);
        assert_eq!(ValueType::parse(""), None);
    }
}
