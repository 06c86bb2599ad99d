//! `xml_ledger` — the per-XML header extract.
//!
//! One row per (`zip_sha256`, `zip_inner_path_sha256`). This is the
//! original-preserving layer: subject fields land verbatim, missing
//! non-critical fields stay NULL, and the XSD note rides along in
//! `error_content`.

use chrono::NaiveDate;
use sqlx::{Executor, MySql};

use kenshin_db::DbError;
use kenshin_db::catalog::Catalog;
use kenshin_db::upsert::{Param, UpsertBuilder};
use kenshin_utils::text::shorten;

const TABLE: &str = "xml_ledger";

/// Upsert adapter carrying the extracted header fields.
#[derive(Debug, Clone, Default)]
pub struct XmlLedgerUpsert {
    pub run_id: i64,
    pub zip_receipt_id: i64,
    pub facility_folder_name: Option<String>,
    pub facility_code: Option<String>,
    pub facility_name: Option<String>,
    pub zip_name: String,
    pub zip_sha256: String,
    pub xml_filename: String,
    pub zip_inner_path: String,
    pub zip_inner_path_sha256: String,
    pub insurer_number: Option<String>,
    pub insurance_symbol: Option<String>,
    pub insurance_number: Option<String>,
    pub insurance_branch_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub exam_date: Option<NaiveDate>,
    pub gender_code: Option<String>,
    pub name_kana: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub org_name_in_xml: Option<String>,
    pub org_code_in_xml: Option<String>,
    pub report_category_code: Option<String>,
    pub program_type_code: Option<String>,
    pub guidance_level_code: Option<String>,
    pub metabo_code: Option<String>,
    /// Tri-state: 1 valid, 0 invalid, NULL not checked.
    pub xsd_valid: Option<i64>,
    pub error_content: Option<String>,
}

/// Upsert keyed by (`zip_sha256`, `zip_inner_path_sha256`); returns
/// `xml_ledger_id` on both paths.
pub async fn upsert_xml_ledger<'e, E>(
    executor: E,
    catalog: &Catalog,
    row: &XmlLedgerUpsert,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = MySql>,
{
    let has_error_content = catalog.has_column(TABLE, "error_content").await?;

    let id = UpsertBuilder::new(TABLE)
        .id_column("xml_ledger_id")
        .col("run_id", Param::I64(row.run_id))
        .col("zip_receipt_id", Param::I64(row.zip_receipt_id))
        .col(
            "facility_folder_name",
            Param::OptStr(row.facility_folder_name.clone()),
        )
        .col("facility_code", Param::OptStr(row.facility_code.clone()))
        .col("facility_name", Param::OptStr(row.facility_name.clone()))
        .col("zip_name", Param::Str(row.zip_name.clone()))
        .col("zip_sha256", Param::Str(row.zip_sha256.clone()))
        .col("xml_filename", Param::Str(row.xml_filename.clone()))
        .col("zip_inner_path", Param::Str(row.zip_inner_path.clone()))
        .col(
            "zip_inner_path_sha256",
            Param::Str(row.zip_inner_path_sha256.clone()),
        )
        .col("insurer_number", Param::OptStr(row.insurer_number.clone()))
        .col("insurance_symbol", Param::OptStr(row.insurance_symbol.clone()))
        .col("insurance_number", Param::OptStr(row.insurance_number.clone()))
        .col(
            "insurance_branch_number",
            Param::OptStr(row.insurance_branch_number.clone()),
        )
        .col("birth_date", Param::OptDate(row.birth_date))
        .col("exam_date", Param::OptDate(row.exam_date))
        .col("gender_code", Param::OptStr(row.gender_code.clone()))
        .col("name_kana", Param::OptStr(row.name_kana.clone()))
        .col("postal_code", Param::OptStr(row.postal_code.clone()))
        .col("address", Param::OptStr(row.address.clone()))
        .col("org_name_in_xml", Param::OptStr(row.org_name_in_xml.clone()))
        .col("org_code_in_xml", Param::OptStr(row.org_code_in_xml.clone()))
        .col(
            "report_category_code",
            Param::OptStr(row.report_category_code.clone()),
        )
        .col(
            "program_type_code",
            Param::OptStr(row.program_type_code.clone()),
        )
        .col(
            "guidance_level_code",
            Param::OptStr(row.guidance_level_code.clone()),
        )
        .col("metabo_code", Param::OptStr(row.metabo_code.clone()))
        .col("xsd_valid", Param::OptI64(row.xsd_valid))
        .col_if(
            has_error_content,
            "error_content",
            Param::OptStr(row.error_content.as_deref().map(|m| shorten(m, 1500))),
        )
        .execute(executor)
        .await?;
    Ok(id as i64)
}
