//! End-to-end reads over one realistic check-up document: index, header,
//! observations, and the schema step against a minimal schema file.

use std::collections::HashMap;

use kenshin_cda::document::{IndexOutcome, extract_document_id, is_clinical_document, parse_xml};
use kenshin_cda::header::extract_header;
use kenshin_cda::observations::{ValueHints, ValueMethod, ValueType, collect_observations};
use kenshin_cda::schema_check::{SchemaCheck, check_against_schema};

const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ClinicalDocument xmlns="urn:hl7-org:v3"
                  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
                  xsi:schemaLocation="urn:hl7-org:v3 XSD/hc08_V08.xsd">
  <id root="1.2.392.200119.6.1" extension="K-2025-0042"/>
  <recordTarget>
    <patientRole>
      <id root="1.2.392.200119.6.101" extension="06123456"/>
      <id root="1.2.392.200119.6.204" extension="健保１２"/>
      <id root="1.2.392.200119.6.205" extension="7890"/>
      <addr>
        <postalCode>260-0013</postalCode>
        <state>千葉県</state>
        <city>千葉市中央区</city>
        <streetAddressLine>中央3-10-8</streetAddressLine>
      </addr>
      <patient>
        <name>サトウ ハナコ</name>
        <administrativeGenderCode code="2"/>
        <birthTime value="19650408"/>
      </patient>
    </patientRole>
  </recordTarget>
  <documentationOf>
    <serviceEvent>
      <effectiveTime value="20250612"/>
      <performer>
        <assignedEntity>
          <representedOrganization>
            <id root="1.2.392.200119.6.102" extension="1219876543"/>
            <name>市民健診クリニック</name>
          </representedOrganization>
        </assignedEntity>
      </performer>
    </serviceEvent>
  </documentationOf>
  <component><structuredBody>
    <component><section><entry>
      <observation>
        <code code="9N006000000000001" codeSystem="1.2.392.200119.6.1005"/>
        <value xsi:type="PQ" value="58.2" unit="kg"/>
      </observation>
    </entry><entry>
      <observation>
        <code code="1A020000000190111"/>
        <value xsi:type="PQ" value="5.8" unit="%"/>
      </observation>
    </entry><entry>
      <observation>
        <code code="3F015000002327101"/>
        <value xsi:type="CD" code="+" codeSystem="1.2.392.200119.6.2065"
               displayName="（＋）"/>
      </observation>
    </entry><entry>
      <observation>
        <code code="1A020000000190111"/>
        <value xsi:type="PQ" value="5.9" unit="%"/>
      </observation>
    </entry></section></component>
  </structuredBody></component>
</ClinicalDocument>"#;

const SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:hl7-org:v3">
  <xs:element name="ClinicalDocument" type="xs:anyType"/>
</xs:schema>"#;

#[test]
fn index_header_and_observations_agree() {
    let doc = parse_xml(DOCUMENT.as_bytes()).unwrap();
    assert!(is_clinical_document(&doc));

    let (document_id, outcome) = extract_document_id(&doc);
    assert_eq!(outcome, IndexOutcome::Ok);
    assert_eq!(document_id.as_deref(), Some("1.2.392.200119.6.1|K-2025-0042"));

    let header = extract_header(&doc);
    assert_eq!(header.insurer_number.as_deref(), Some("06123456"));
    assert_eq!(header.insurance_symbol.as_deref(), Some("健保１２"));
    assert_eq!(header.insurance_number.as_deref(), Some("7890"));
    // No branch-number id row in this document.
    assert_eq!(header.insurance_branch_number, None);
    assert_eq!(header.facility_code.as_deref(), Some("1219876543"));
    assert_eq!(header.gender_code.as_deref(), Some("2"));

    let mut hints = HashMap::new();
    hints.insert(
        "3F015000002327101".to_string(),
        ValueHints {
            value_type: Some(ValueType::Cd),
            value_method: ValueMethod::parse("@code"),
        },
    );
    let items = collect_observations(&doc, &hints);
    assert_eq!(items.len(), 4);

    // Occurrences per namecode form 1..k with no gaps.
    let hba1c: Vec<i64> = items
        .iter()
        .filter(|i| i.namecode == "1A020000000190111")
        .map(|i| i.occurrence_no)
        .collect();
    assert_eq!(hba1c, vec![1, 2]);

    let urine = items
        .iter()
        .find(|i| i.namecode == "3F015000002327101")
        .unwrap();
    assert_eq!(urine.value_raw.as_deref(), Some("+"));
    assert_eq!(urine.value_type.as_deref(), Some("CD"));
}

#[test]
fn schema_step_resolves_from_schema_location() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hc08_V08.xsd"), SCHEMA).unwrap();

    let doc = parse_xml(DOCUMENT.as_bytes()).unwrap();
    match check_against_schema(&doc, dir.path(), "hc08_V08.xsd") {
        SchemaCheck::Valid { used } => assert_eq!(used, "hc08_V08.xsd"),
        other => panic!("unexpected schema outcome: {other:?}"),
    }
}
