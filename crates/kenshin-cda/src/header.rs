//! Header-field extraction.
//!
//! Deterministic reads against the fixed CDA header structure. Values
//! land verbatim — no width folding, no digit normalization; matching
//! happens downstream. Missing non-critical fields are warnings, never
//! errors: this layer preserves the original document.

use chrono::NaiveDate;

use kenshin_utils::text::strip_or_none;

use crate::{hl7_child, hl7_descend, node_text};

/// OID roots for the `patientRole/id` entries.
const OID_INSURER_NUMBER: &str = "1.2.392.200119.6.101";
const OID_INSURANCE_SYMBOL: &str = "1.2.392.200119.6.204";
const OID_INSURANCE_NUMBER: &str = "1.2.392.200119.6.205";
const OID_INSURANCE_BRANCH: &str = "1.2.392.200119.6.211";

/// OID root identifying the performing organization.
const OID_FACILITY: &str = "1.2.392.200119.6.102";

/// Subject and organization fields from one CDA header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    pub gender_code: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub facility_code: Option<String>,
    pub facility_name: Option<String>,
    pub insurer_number: Option<String>,
    pub insurance_symbol: Option<String>,
    pub insurance_number: Option<String>,
    pub insurance_branch_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub exam_date: Option<NaiveDate>,
    pub patient_name: Option<String>,
    /// Raw `birthTime/@value` as written in the document.
    pub raw_birth: Option<String>,
    /// Raw exam `effectiveTime` value as written in the document.
    pub raw_exam: Option<String>,
}

/// Strict `YYYYMMDD` parse; anything else yields `None`.
#[must_use]
pub fn parse_yyyymmdd(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    if t.len() != 8 || !t.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(t, "%Y%m%d").ok()
}

fn attr_of(node: Option<roxmltree::Node<'_, '_>>, attr: &str) -> Option<String> {
    strip_or_none(node.and_then(|n| n.attribute(attr)))
}

fn text_of(node: Option<roxmltree::Node<'_, '_>>) -> Option<String> {
    node.map(node_text).filter(|t| !t.is_empty())
}

/// `patientRole/id[@root=oid]/@extension`.
fn patient_role_id<'a>(
    patient_role: Option<roxmltree::Node<'a, 'a>>,
    oid: &str,
) -> Option<String> {
    let role = patient_role?;
    let node = role
        .children()
        .find(|c| crate::is_hl7(c, "id") && c.attribute("root") == Some(oid))?;
    strip_or_none(node.attribute("extension"))
}

/// Extract every header field from a parsed document.
#[must_use]
pub fn extract_header(doc: &roxmltree::Document<'_>) -> HeaderFields {
    let root = doc.root_element();

    let patient_role = hl7_descend(root, &["recordTarget", "patientRole"]);
    let patient = patient_role.and_then(|n| hl7_child(n, "patient"));
    let addr = patient_role.and_then(|n| hl7_child(n, "addr"));

    let gender_code = attr_of(
        patient.and_then(|n| hl7_child(n, "administrativeGenderCode")),
        "code",
    );
    let postal_code = text_of(addr.and_then(|n| hl7_child(n, "postalCode")));
    let address = addr.map(|a| {
        ["state", "city", "streetAddressLine"]
            .into_iter()
            .filter_map(|seg| text_of(hl7_child(a, seg)))
            .collect::<Vec<_>>()
            .join(" ")
    });
    let address = address.filter(|a| !a.is_empty());

    let organization = hl7_descend(
        root,
        &[
            "documentationOf",
            "serviceEvent",
            "performer",
            "assignedEntity",
            "representedOrganization",
        ],
    );
    let facility_name = text_of(organization.and_then(|n| hl7_child(n, "name")));
    let facility_code = organization.and_then(|org| {
        let id = org
            .children()
            .find(|c| crate::is_hl7(c, "id") && c.attribute("root") == Some(OID_FACILITY))?;
        strip_or_none(id.attribute("extension"))
    });

    let insurer_number = patient_role_id(patient_role, OID_INSURER_NUMBER);
    let insurance_symbol = patient_role_id(patient_role, OID_INSURANCE_SYMBOL);
    let insurance_number = patient_role_id(patient_role, OID_INSURANCE_NUMBER);
    let insurance_branch_number = patient_role_id(patient_role, OID_INSURANCE_BRANCH);

    let raw_birth = attr_of(patient.and_then(|n| hl7_child(n, "birthTime")), "value");

    let service_event = hl7_descend(root, &["documentationOf", "serviceEvent"]);
    let effective_time = service_event.and_then(|n| hl7_child(n, "effectiveTime"));
    // Point-in-time exams carry @value directly; interval exams carry
    // low/@value.
    let raw_exam = attr_of(effective_time, "value")
        .or_else(|| attr_of(effective_time.and_then(|n| hl7_child(n, "low")), "value"));

    let birth_date = raw_birth.as_deref().and_then(parse_yyyymmdd);
    let exam_date = raw_exam.as_deref().and_then(parse_yyyymmdd);

    let patient_name = text_of(patient.and_then(|n| hl7_child(n, "name")));

    HeaderFields {
        gender_code,
        postal_code,
        address,
        facility_code,
        facility_name,
        insurer_number,
        insurance_symbol,
        insurance_number,
        insurance_branch_number,
        birth_date,
        exam_date,
        patient_name,
        raw_birth,
        raw_exam,
    }
}

/// Quality warnings for fields operators care about. None of these fail
/// the extract.
#[must_use]
pub fn missing_field_warnings(fields: &HeaderFields) -> Vec<String> {
    let mut missing: Vec<&str> = Vec::new();
    if fields.gender_code.is_none() {
        missing.push("gender_code");
    }
    if fields.postal_code.is_none() {
        missing.push("postal_code");
    }
    let mut out = Vec::new();
    if !missing.is_empty() {
        out.push(format!("warning missing: {}", missing.join(",")));
    }
    if fields.facility_code.is_none() {
        out.push("warning missing: facility_code".to_string());
    }
    if fields.facility_name.is_none() {
        out.push("warning missing: facility_name".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ClinicalDocument xmlns="urn:hl7-org:v3">
  <id root="1.2.392.200119.6.1" extension="DOC-1"/>
  <recordTarget>
    <patientRole>
      <id root="1.2.392.200119.6.101" extension="12345678"/>
      <id root="1.2.392.200119.6.204" extension="あ-123"/>
      <id root="1.2.392.200119.6.205" extension="456"/>
      <id root="1.2.392.200119.6.211" extension="00"/>
      <addr>
        <postalCode>100-0001</postalCode>
        <state>東京都</state>
        <city>千代田区</city>
        <streetAddressLine>千代田1-1</streetAddressLine>
      </addr>
      <patient>
        <name>ヤマダ タロウ</name>
        <administrativeGenderCode code="1"/>
        <birthTime value="19700101"/>
      </patient>
    </patientRole>
  </recordTarget>
  <documentationOf>
    <serviceEvent>
      <effectiveTime value="20250401"/>
      <performer>
        <assignedEntity>
          <representedOrganization>
            <id root="1.2.392.200119.6.102" extension="1311234567"/>
            <name>健診センター</name>
          </representedOrganization>
        </assignedEntity>
      </performer>
    </serviceEvent>
  </documentationOf>
</ClinicalDocument>"#;

    #[test]
    fn extracts_every_field() {
        let doc = roxmltree::Document::parse(FULL_HEADER).unwrap();
        let h = extract_header(&doc);
        assert_eq!(h.gender_code.as_deref(), Some("1"));
        assert_eq!(h.postal_code.as_deref(), Some("100-0001"));
        assert_eq!(h.address.as_deref(), Some("東京都 千代田区 千代田1-1"));
        assert_eq!(h.facility_code.as_deref(), Some("1311234567"));
        assert_eq!(h.facility_name.as_deref(), Some("健診センター"));
        assert_eq!(h.insurer_number.as_deref(), Some("12345678"));
        assert_eq!(h.insurance_symbol.as_deref(), Some("あ-123"));
        assert_eq!(h.insurance_number.as_deref(), Some("456"));
        assert_eq!(h.insurance_branch_number.as_deref(), Some("00"));
        assert_eq!(h.birth_date, NaiveDate::from_ymd_opt(1970, 1, 1));
        assert_eq!(h.exam_date, NaiveDate::from_ymd_opt(2025, 4, 1));
        assert_eq!(h.patient_name.as_deref(), Some("ヤマダ タロウ"));
        assert!(missing_field_warnings(&h).is_empty());
    }

    #[test]
    fn exam_date_falls_back_to_interval_low() {
        let xml = r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
          <documentationOf><serviceEvent>
            <effectiveTime><low value="20240315"/></effectiveTime>
          </serviceEvent></documentationOf>
        </ClinicalDocument>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let h = extract_header(&doc);
        assert_eq!(h.exam_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(h.raw_exam.as_deref(), Some("20240315"));
    }

    #[test]
    fn missing_fields_become_warnings() {
        let xml = r#"<ClinicalDocument xmlns="urn:hl7-org:v3"/>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let h = extract_header(&doc);
        let warnings = missing_field_warnings(&h);
        assert_eq!(
            warnings,
            vec![
                "warning missing: gender_code,postal_code".to_string(),
                "warning missing: facility_code".to_string(),
                "warning missing: facility_name".to_string(),
            ]
        );
    }

    #[test]
    fn yyyymmdd_rejects_non_dates() {
        assert_eq!(parse_yyyymmdd("20250401"), NaiveDate::from_ymd_opt(2025, 4, 1));
        assert_eq!(parse_yyyymmdd("2025040"), None);
        assert_eq!(parse_yyyymmdd("2025-04-01"), None);
        assert_eq!(parse_yyyymmdd("20251301"), None);
        assert_eq!(parse_yyyymmdd(""), None);
    }
}
