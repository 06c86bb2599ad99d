//! Stage I — value normalization.
//!
//! The one rule: no guessing. `ST` copies, `PQ` trims and requires a
//! plain real number, `CD`/`CO` require a verbatim dictionary hit.
//! Everything else is an error with a reason precise enough that the
//! operator can extend the master or the dictionary and re-run.

use anyhow::{Context as _, Result};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use tracing::info;

use kenshin_config::NormalizeSettings;
use kenshin_ledger::item_values::{
    select_normalize_targets, update_normalize_error, update_normalize_ok,
};
use kenshin_ledger::masters::{ItemMasterRow, get_master, lookup_variant};

/// Normalize counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeSummary {
    pub targets: u64,
    pub ok: u64,
    pub error: u64,
}

impl NormalizeSummary {
    #[must_use]
    pub fn note(&self) -> String {
        format!(
            "normalize ok={} err={} targets={}",
            self.ok, self.error, self.targets
        )
    }
}

/// What the master says this value is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValueClass {
    /// Empty or `ST`: copy through.
    StLike,
    /// `PQ`: numeric after a single trim.
    Pq,
    /// `CD`/`CO` with a dictionary OID.
    CodeLike { kind: &'static str, oid: String },
    /// `CO` without an OID, or an unknown declared type.
    Unsupported(String),
}

pub(crate) fn classify_master(master: &ItemMasterRow) -> ValueClass {
    let declared = master
        .xml_value_type
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_ascii_uppercase();
    let oid = master
        .result_code_oid
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();
    match declared.as_str() {
        "" | "ST" => ValueClass::StLike,
        "PQ" => ValueClass::Pq,
        "CD" => {
            if oid.is_empty() {
                ValueClass::Unsupported("CD but result_code_oid is NULL/empty in item_master".into())
            } else {
                ValueClass::CodeLike { kind: "CD", oid }
            }
        }
        "CO" => {
            if oid.is_empty() {
                ValueClass::Unsupported("CO but result_code_oid is NULL/empty in item_master".into())
            } else {
                ValueClass::CodeLike { kind: "CO", oid }
            }
        }
        other => ValueClass::Unsupported(format!("unsupported xml_value_type='{other}'")),
    }
}

/// `ST`: the raw value as-is; a NULL raw is the only failure.
pub(crate) fn normalize_st(raw: Option<&str>) -> Result<String, String> {
    match raw {
        Some(v) => Ok(v.to_string()),
        None => Err("ST raw_value is NULL".to_string()),
    }
}

/// `PQ`: trim, require non-empty, require a plain finite number. The
/// trimmed numeric string itself is stored, not a reformatted one.
pub(crate) fn normalize_pq(raw: &str) -> Result<String, String> {
    let v = raw.trim();
    if v.is_empty() {
        return Err("PQ raw_value becomes empty after trim".to_string());
    }
    match v.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(v.to_string()),
        _ => Err(format!("PQ not numeric: raw_value='{raw}'")),
    }
}

/// Run the normalization batch.
pub async fn run(
    pool: &MySqlPool,
    master_pool: &MySqlPool,
    settings: &NormalizeSettings,
    dry_run: bool,
) -> Result<NormalizeSummary> {
    let targets = select_normalize_targets(pool, settings.limit)
        .await
        .context("select normalize targets")?;
    let mut summary = NormalizeSummary {
        targets: targets.len() as u64,
        ..NormalizeSummary::default()
    };
    if targets.is_empty() {
        info!("no targets");
        return Ok(summary);
    }
    info!(targets = summary.targets, dry_run, "normalize started");

    for target in targets {
        let raw = target.raw_value.as_deref();
        let raw_str = raw.unwrap_or("");

        let outcome: Result<String, String> = if target.namecode.is_empty() {
            Err("namecode is empty".to_string())
        } else {
            match get_master(master_pool, &target.namecode).await? {
                None => Err(format!(
                    "item_master not found: namecode={}",
                    target.namecode
                )),
                Some(master) => match classify_master(&master) {
                    ValueClass::StLike => normalize_st(raw),
                    ValueClass::Pq => normalize_pq(raw_str),
                    ValueClass::CodeLike { kind, oid } => {
                        match lookup_variant(master_pool, &oid, raw_str).await? {
                            Some(hit) => Ok(hit.normalized_code),
                            None => Err(format!(
                                "{kind} no match in norm_variants: \
                                 result_code_oid='{oid}', raw_value='{raw_str}'"
                            )),
                        }
                    }
                    ValueClass::Unsupported(reason) => Err(reason),
                },
            }
        };

        if dry_run {
            match &outcome {
                Ok(v) => info!(item_value_id = target.item_value_id, value = %v, "dry-run: would normalize"),
                Err(e) => info!(item_value_id = target.item_value_id, error = %e, "dry-run: would fail"),
            }
            match outcome {
                Ok(_) => summary.ok += 1,
                Err(_) => summary.error += 1,
            }
            continue;
        }

        match outcome {
            Ok(value) => {
                update_normalize_ok(pool, target.item_value_id, &value).await?;
                summary.ok += 1;
            }
            Err(message) => {
                update_normalize_error(pool, target.item_value_id, &message).await?;
                summary.error += 1;
            }
        }
    }

    info!(note = %summary.note(), "normalize finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master(value_type: &str, oid: Option<&str>) -> ItemMasterRow {
        ItemMasterRow {
            namecode: "X".to_string(),
            xml_value_type: Some(value_type.to_string()),
            result_code_oid: oid.map(str::to_string),
            value_method: None,
            display_unit: None,
            ucum_unit: None,
        }
    }

    #[test]
    fn st_copies_raw_verbatim() {
        assert_eq!(normalize_st(Some("  a b ")).unwrap(), "  a b ");
        assert!(normalize_st(None).is_err());
    }

    #[test]
    fn pq_trims_and_requires_plain_number() {
        assert_eq!(normalize_pq(" 172.1 ").unwrap(), "172.1");
        assert_eq!(normalize_pq("-0.5").unwrap(), "-0.5");
        assert!(normalize_pq("  ").is_err());
        assert!(normalize_pq("1,234").is_err());
        assert!(normalize_pq("172.1cm").is_err());
        assert!(normalize_pq("inf").is_err());
    }

    #[test]
    fn classification_follows_declared_type() {
        assert_eq!(classify_master(&master("ST", None)), ValueClass::StLike);
        assert_eq!(classify_master(&master("", None)), ValueClass::StLike);
        assert_eq!(classify_master(&master("PQ", None)), ValueClass::Pq);
        assert_eq!(
            classify_master(&master("CD", Some("1.2.3"))),
            ValueClass::CodeLike {
                kind: "CD",
                oid: "1.2.3".to_string()
            }
        );
        assert_eq!(
            classify_master(&master("CO", Some("1.2.3"))),
            ValueClass::CodeLike {
                kind: "CO",
                oid: "1.2.3".to_string()
            }
        );
    }

    #[test]
    fn code_types_without_oid_are_unsupported() {
        assert!(matches!(
            classify_master(&master("CD", None)),
            ValueClass::Unsupported(_)
        ));
        assert!(matches!(
            classify_master(&master("CO", Some("  "))),
            ValueClass::Unsupported(_)
        ));
        assert!(matches!(
            classify_master(&master("INT", None)),
            ValueClass::Unsupported(_)
        ));
    }
}
