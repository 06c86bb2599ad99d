//! Schema conformance check.
//!
//! Resolution follows the document: the last `.xsd` token of
//! `xsi:schemaLocation` names the schema file under the configured XSD
//! root, falling back to the deployment's default file name. An absent
//! schema file is a SKIP, never an error.
//!
//! The check itself is root-element conformance (element declared at the
//! schema top level, document namespace equals `targetNamespace`); the
//! outcome feeds the tri-state `xsd_valid` and never fails the extract.

use std::path::Path;

use kenshin_utils::text::shorten;

use crate::NS_XSI;

const NS_XSD: &str = "http://www.w3.org/2001/XMLSchema";

/// Outcome of the schema step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    /// No schema file to check against.
    Skipped { used: String, note: String },
    /// Root element conforms.
    Valid { used: String },
    /// Root element does not conform, or the schema is unreadable.
    Invalid { used: String, message: String },
}

impl SchemaCheck {
    /// The `xsd_valid` tri-state this outcome maps to.
    #[must_use]
    pub const fn xsd_valid(&self) -> Option<i64> {
        match self {
            Self::Skipped { .. } => None,
            Self::Valid { .. } => Some(1),
            Self::Invalid { .. } => Some(0),
        }
    }
}

/// File name of the last `.xsd` token in the root's
/// `xsi:schemaLocation`, when present.
#[must_use]
pub fn schema_location_xsd_name(doc: &roxmltree::Document<'_>) -> Option<String> {
    let loc = doc
        .root_element()
        .attribute((NS_XSI, "schemaLocation"))?;
    let last = loc
        .split_whitespace()
        .filter(|t| t.to_ascii_lowercase().ends_with(".xsd"))
        .next_back()?;
    let name = last.rsplit(['/', '\\']).next().unwrap_or(last);
    if name.is_empty() { None } else { Some(name.to_string()) }
}

/// Run the schema step for one document.
#[must_use]
pub fn check_against_schema(
    doc: &roxmltree::Document<'_>,
    xsd_root: &Path,
    default_name: &str,
) -> SchemaCheck {
    // Prefer the document's own hint when that file actually exists.
    let hinted = schema_location_xsd_name(doc);
    let used = match hinted {
        Some(name) if xsd_root.join(&name).exists() => name,
        _ => default_name.to_string(),
    };
    let schema_path = xsd_root.join(&used);

    if !schema_path.exists() {
        return SchemaCheck::Skipped {
            note: format!("used={used} XSD file not found (skip)"),
            used,
        };
    }

    let schema_text = match std::fs::read_to_string(&schema_path) {
        Ok(t) => t,
        Err(e) => {
            return SchemaCheck::Invalid {
                used,
                message: shorten(&format!("XSD validator exception: {e}"), 500),
            };
        }
    };
    let schema_doc = match roxmltree::Document::parse(&schema_text) {
        Ok(d) => d,
        Err(e) => {
            return SchemaCheck::Invalid {
                used,
                message: shorten(&format!("XSD validator exception: {e}"), 500),
            };
        }
    };

    let schema_root = schema_doc.root_element();
    let target_namespace = schema_root.attribute("targetNamespace");
    let declared: Vec<&str> = schema_root
        .children()
        .filter(|c| {
            c.is_element()
                && c.tag_name().name() == "element"
                && c.tag_name().namespace() == Some(NS_XSD)
        })
        .filter_map(|c| c.attribute("name"))
        .collect();

    let doc_root = doc.root_element();
    let root_name = doc_root.tag_name().name();
    let root_ns = doc_root.tag_name().namespace();

    if let Some(tns) = target_namespace {
        if root_ns != Some(tns) {
            return SchemaCheck::Invalid {
                used,
                message: shorten(
                    &format!(
                        "document namespace {} does not match targetNamespace {tns}",
                        root_ns.unwrap_or("(none)")
                    ),
                    500,
                ),
            };
        }
    }
    if !declared.is_empty() && !declared.contains(&root_name) {
        return SchemaCheck::Invalid {
            used,
            message: shorten(
                &format!("root element {root_name} is not declared in the schema"),
                500,
            ),
        };
    }

    SchemaCheck::Valid { used }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CDA_SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:hl7-org:v3"
           elementFormDefault="qualified">
  <xs:element name="ClinicalDocument" type="xs:anyType"/>
</xs:schema>"#;

    fn cda(schema_location: Option<&str>) -> String {
        let loc = schema_location
            .map(|l| format!(" xsi:schemaLocation=\"{l}\""))
            .unwrap_or_default();
        format!(
            "<ClinicalDocument xmlns=\"urn:hl7-org:v3\" \
             xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"{loc}/>"
        )
    }

    #[test]
    fn schema_location_picks_last_xsd_token() {
        let xml = cda(Some("urn:hl7-org:v3 ./extra/first.xsd urn:x ./XSD/hc08_V08.xsd"));
        let doc = roxmltree::Document::parse(&xml).unwrap();
        assert_eq!(
            schema_location_xsd_name(&doc).as_deref(),
            Some("hc08_V08.xsd")
        );
    }

    #[test]
    fn schema_location_absent_yields_none() {
        let xml = cda(None);
        let doc = roxmltree::Document::parse(&xml).unwrap();
        assert_eq!(schema_location_xsd_name(&doc), None);
    }

    #[test]
    fn missing_schema_file_skips() {
        let dir = tempfile::tempdir().unwrap();
        let xml = cda(None);
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let check = check_against_schema(&doc, dir.path(), "hc08_V08.xsd");
        assert!(matches!(check, SchemaCheck::Skipped { .. }));
        assert_eq!(check.xsd_valid(), None);
    }

    #[test]
    fn conforming_root_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hc08_V08.xsd"), CDA_SCHEMA).unwrap();
        let xml = cda(Some("urn:hl7-org:v3 hc08_V08.xsd"));
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let check = check_against_schema(&doc, dir.path(), "hc08_V08.xsd");
        assert_eq!(check, SchemaCheck::Valid { used: "hc08_V08.xsd".into() });
        assert_eq!(check.xsd_valid(), Some(1));
    }

    #[test]
    fn wrong_root_namespace_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hc08_V08.xsd"), CDA_SCHEMA).unwrap();
        let xml = "<ClinicalDocument xmlns=\"urn:other\"/>";
        let doc = roxmltree::Document::parse(xml).unwrap();
        let check = check_against_schema(&doc, dir.path(), "hc08_V08.xsd");
        assert_eq!(check.xsd_valid(), Some(0));
    }

    #[test]
    fn undeclared_root_element_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hc08_V08.xsd"), CDA_SCHEMA).unwrap();
        let xml = "<OtherDocument xmlns=\"urn:hl7-org:v3\"/>";
        let doc = roxmltree::Document::parse(xml).unwrap();
        let check = check_against_schema(&doc, dir.path(), "hc08_V08.xsd");
        assert!(matches!(check, SchemaCheck::Invalid { .. }));
    }

    #[test]
    fn hinted_name_wins_only_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hc08_V08.xsd"), CDA_SCHEMA).unwrap();
        // Hint names a file that is not present: the default is used.
        let xml = cda(Some("urn:hl7-org:v3 missing_V99.xsd"));
        let doc = roxmltree::Document::parse(&xml).unwrap();
        match check_against_schema(&doc, dir.path(), "hc08_V08.xsd") {
            SchemaCheck::Valid { used } => assert_eq!(used, "hc08_V08.xsd"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
