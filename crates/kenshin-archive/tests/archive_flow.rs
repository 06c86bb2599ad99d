//! The archive lifecycle the import stages rely on: probe without
//! extraction, extract with password candidates, then reopen and read
//! individual members by recorded inner path.

use std::io::Write as _;

use zip::unstable::write::FileOptionsExt;
use zip::write::SimpleFileOptions;

use kenshin_archive::extract::{ExtractFailure, extract_zip_to_temp};
use kenshin_archive::member::{open_archive, read_member_bytes};
use kenshin_archive::probe::probe_zip_has_xml;

const CDA_BODY: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<ClinicalDocument xmlns="urn:hl7-org:v3"><id root="1.2.3"/></ClinicalDocument>"#;

fn build_zip(password: Option<&str>) -> tempfile::NamedTempFile {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut w = zip::ZipWriter::new(tmp.reopen().unwrap());
    let opts = match password {
        Some(pw) => {
            #[allow(deprecated)]
            let encrypted = SimpleFileOptions::default().with_deprecated_encryption(pw.as_bytes());
            encrypted
        }
        None => SimpleFileOptions::default(),
    };
    w.add_directory("DATA", SimpleFileOptions::default()).unwrap();
    w.start_file("DATA/h2025_0001.xml", opts).unwrap();
    w.write_all(CDA_BODY).unwrap();
    w.start_file("DATA/h2025_0002.xml", opts).unwrap();
    w.write_all(CDA_BODY).unwrap();
    w.start_file("SUMMARY.txt", opts).unwrap();
    w.write_all(b"2 documents").unwrap();
    w.finish().unwrap();
    tmp
}

#[test]
fn probe_then_extract_then_member_reads() {
    let zip = build_zip(None);

    // Probe never extracts, yet sees both XML members.
    let probe = probe_zip_has_xml(zip.path());
    assert!(probe.ok);
    assert!(probe.has_xml);
    assert_eq!(probe.xml_count, 2);

    // Full extraction into scratch.
    let scratch = tempfile::tempdir().unwrap();
    let dest = scratch.path().join("z");
    let outcome = extract_zip_to_temp(zip.path(), &dest, &[]).unwrap();
    assert_eq!(outcome.used_password, None);
    assert!(dest.join("DATA/h2025_0001.xml").exists());
    assert!(dest.join("SUMMARY.txt").exists());

    // Member read by the inner path recorded at inventory time.
    let mut archive = open_archive(zip.path()).unwrap();
    let bytes = read_member_bytes(&mut archive, "DATA/h2025_0001.xml", &[]).unwrap();
    assert_eq!(bytes, CDA_BODY);
}

#[test]
fn encrypted_archive_full_cycle() {
    let zip = build_zip(Some("P2"));
    let candidates = vec!["stale".to_string(), "P2".to_string()];

    let probe = probe_zip_has_xml(zip.path());
    assert!(probe.ok, "listing works without decryption");
    assert_eq!(probe.xml_count, 2);

    let scratch = tempfile::tempdir().unwrap();
    let dest = scratch.path().join("z");
    let outcome = extract_zip_to_temp(zip.path(), &dest, &candidates).unwrap();
    assert_eq!(outcome.used_password.as_deref(), Some("P2"));

    let mut archive = open_archive(zip.path()).unwrap();
    let bytes = read_member_bytes(&mut archive, "DATA/h2025_0002.xml", &candidates).unwrap();
    assert_eq!(bytes, CDA_BODY);
}

#[test]
fn encrypted_archive_with_no_good_candidate_stays_locked() {
    let zip = build_zip(Some("right"));
    let scratch = tempfile::tempdir().unwrap();
    let err = extract_zip_to_temp(
        zip.path(),
        &scratch.path().join("z"),
        &["wrong".to_string()],
    )
    .unwrap_err();
    assert_eq!(err.kind, ExtractFailure::Password);

    // A later attempt with the right candidate succeeds — recovery is
    // purely a matter of registering a new password.
    let outcome = extract_zip_to_temp(
        zip.path(),
        &scratch.path().join("z"),
        &["wrong".to_string(), "right".to_string()],
    )
    .unwrap();
    assert_eq!(outcome.used_password.as_deref(), Some("right"));
}
