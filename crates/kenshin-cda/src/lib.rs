//! Read-only CDA document access.
//!
//! Everything here operates on a parsed [`roxmltree::Document`]; parsing
//! itself (the well-formed check) is [`document::parse_xml`]. Documents
//! are expected in UTF-8 — a member in any other encoding fails the
//! well-formed check and is handled by the caller like any parse error.

pub mod document;
pub mod header;
pub mod observations;
pub mod schema_check;

/// HL7 v3 namespace all CDA elements live in.
pub const NS_HL7: &str = "urn:hl7-org:v3";

/// XML Schema instance namespace (`xsi:type`, `xsi:schemaLocation`).
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub(crate) fn is_hl7<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(NS_HL7)
}

/// First child element `name` in the HL7 namespace.
pub(crate) fn hl7_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|c| is_hl7(c, name))
}

/// Walk a fixed child path from `node`, taking the first match at each
/// level (document order).
pub(crate) fn hl7_descend<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    path: &[&str],
) -> Option<roxmltree::Node<'a, 'input>> {
    let mut cur = node;
    for seg in path {
        cur = hl7_child(cur, seg)?;
    }
    Some(cur)
}

/// Whitespace-normalized direct text of a node.
pub(crate) fn node_text(node: roxmltree::Node<'_, '_>) -> String {
    node.text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}
