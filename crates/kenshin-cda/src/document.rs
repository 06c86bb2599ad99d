//! Parsing and the `/ClinicalDocument/id` index policy.

use thiserror::Error;

use crate::{hl7_child, is_hl7};

/// Well-formedness failure, carried up as `XML_PARSE`.
#[derive(Error, Debug)]
#[error("xml parse failed: {0}")]
pub struct ParseError(String);

/// Parse a member's bytes. UTF-8 only; a BOM is tolerated.
///
/// # Errors
///
/// [`ParseError`] when the bytes are not UTF-8 or not well-formed XML.
pub fn parse_xml(bytes: &[u8]) -> Result<roxmltree::Document<'_>, ParseError> {
    let stripped = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let text = std::str::from_utf8(stripped).map_err(|e| ParseError(e.to_string()))?;
    roxmltree::Document::parse(text).map_err(|e| ParseError(e.to_string()))
}

/// Whether the root element is an HL7 `ClinicalDocument`.
#[must_use]
pub fn is_clinical_document(doc: &roxmltree::Document<'_>) -> bool {
    is_hl7(&doc.root_element(), "ClinicalDocument")
}

/// Outcome of the CDA index step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// `@root` present; a document id was produced.
    Ok,
    /// `@nullFlavor` present; no id by design.
    Skip,
    /// Element missing, or neither `@root` nor `@nullFlavor`.
    Error,
}

/// Extract the document id from `/ClinicalDocument/id`.
///
/// `@root` present yields `"{root}|{extension}"` (or bare root when no
/// extension); `@nullFlavor` yields no id without being an error.
#[must_use]
pub fn extract_document_id(doc: &roxmltree::Document<'_>) -> (Option<String>, IndexOutcome) {
    let root_el = doc.root_element();
    if !is_hl7(&root_el, "ClinicalDocument") {
        return (None, IndexOutcome::Error);
    }
    let Some(id_node) = hl7_child(root_el, "id") else {
        return (None, IndexOutcome::Error);
    };

    let root_attr = id_node.attribute("root").map(str::trim).filter(|v| !v.is_empty());
    let ext_attr = id_node
        .attribute("extension")
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let null_flavor = id_node
        .attribute("nullFlavor")
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(root) = root_attr {
        let id = match ext_attr {
            Some(ext) => format!("{root}|{ext}"),
            None => root.to_string(),
        };
        return (Some(id), IndexOutcome::Ok);
    }
    if null_flavor.is_some() {
        return (None, IndexOutcome::Skip);
    }
    (None, IndexOutcome::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> String {
        xml.to_string()
    }

    #[test]
    fn parse_strips_bom() {
        let mut bytes = b"\xef\xbb\xbf".to_vec();
        bytes.extend_from_slice(b"<a/>");
        assert!(parse_xml(&bytes).is_ok());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_xml(b"<a><b></a>").is_err());
        assert!(parse_xml(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn document_id_with_root_and_extension() {
        let xml = doc(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
                 <id root="1.2.392.200119.6.1" extension="A0001"/>
               </ClinicalDocument>"#,
        );
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        let (id, outcome) = extract_document_id(&parsed);
        assert_eq!(id.as_deref(), Some("1.2.392.200119.6.1|A0001"));
        assert_eq!(outcome, IndexOutcome::Ok);
    }

    #[test]
    fn document_id_with_root_only() {
        let xml = doc(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3"><id root="1.2.3"/></ClinicalDocument>"#,
        );
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        let (id, outcome) = extract_document_id(&parsed);
        assert_eq!(id.as_deref(), Some("1.2.3"));
        assert_eq!(outcome, IndexOutcome::Ok);
    }

    #[test]
    fn null_flavor_skips_without_id() {
        let xml = doc(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3"><id nullFlavor="NI"/></ClinicalDocument>"#,
        );
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        let (id, outcome) = extract_document_id(&parsed);
        assert_eq!(id, None);
        assert_eq!(outcome, IndexOutcome::Skip);
    }

    #[test]
    fn missing_id_element_is_an_error() {
        let xml = doc(r#"<ClinicalDocument xmlns="urn:hl7-org:v3"/>"#);
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        let (id, outcome) = extract_document_id(&parsed);
        assert_eq!(id, None);
        assert_eq!(outcome, IndexOutcome::Error);
    }

    #[test]
    fn bare_id_without_attributes_is_an_error() {
        let xml =
            doc(r#"<ClinicalDocument xmlns="urn:hl7-org:v3"><id/></ClinicalDocument>"#);
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        let (_, outcome) = extract_document_id(&parsed);
        assert_eq!(outcome, IndexOutcome::Error);
    }

    #[test]
    fn non_cda_root_is_detected() {
        let xml = doc(r#"<other xmlns="urn:hl7-org:v3"/>"#);
        let parsed = roxmltree::Document::parse(&xml).unwrap();
        assert!(!is_clinical_document(&parsed));
        let (_, outcome) = extract_document_id(&parsed);
        assert_eq!(outcome, IndexOutcome::Error);
    }
}
