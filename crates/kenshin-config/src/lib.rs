//! Stage configuration, loaded from `KENSHIN_*` environment variables.
//!
//! Operators drive the pipeline from cron-less shells: an optional `.env`
//! in the working directory is loaded first, then each stage reads its
//! own variables. CLI flags override the environment after loading
//! (precedence: flags > env > defaults).

use std::path::PathBuf;

use camino::Utf8PathBuf;
use thiserror::Error;

use kenshin_utils::env::{MissingEnv, env_bool, env_int, env_opt, env_required};

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Missing(#[from] MissingEnv),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Load `.env` from the working directory when present.
///
/// Returns the path that was loaded, so the caller can log it the way
/// operators expect ("which env file did this run actually see?").
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Work-database and master-database connection settings.
///
/// The master database (item master, variant dictionary) may live on a
/// separate host; when `KENSHIN_MASTER_DB_URL` is unset it falls back to
/// the work database URL.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub url: String,
    pub master_url: String,
}

impl DbSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env_required("KENSHIN_DB_URL")?;
        let master_url = env_opt("KENSHIN_MASTER_DB_URL").unwrap_or_else(|| url.clone());
        Ok(Self { url, master_url })
    }
}

/// Stage A: shared-filesystem scan.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub shared_root: Utf8PathBuf,
    /// Lowercased extensions without dots; default `zip` to keep UNC
    /// traversal bounded.
    pub exts: Vec<String>,
    /// 0 = unbounded.
    pub limit: i64,
    /// How many ancestor directory names feed the facility hint.
    pub hint_depth: usize,
}

impl ScanSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let shared_root = Utf8PathBuf::from(env_required("KENSHIN_SHARED_ROOT")?);
        let exts = parse_ext_list(env_opt("KENSHIN_SCAN_EXTS").as_deref().unwrap_or("zip"));
        let limit = env_int("KENSHIN_SCAN_LIMIT", 0);
        let hint_depth = usize::try_from(env_int("KENSHIN_SCAN_HINT_DEPTH", 2)).unwrap_or(2);
        Ok(Self {
            shared_root,
            exts,
            limit,
            hint_depth,
        })
    }
}

/// Stage B: content hashing.
#[derive(Debug, Clone)]
pub struct HashSettings {
    pub limit: i64,
    /// Restrict to a single `stage_status`; `None` hashes every stage.
    pub only_stage: Option<String>,
}

impl HashSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limit: env_int("KENSHIN_HASH_LIMIT", 200),
            only_stage: match env_opt("KENSHIN_HASH_ONLY_STAGE") {
                None => Some("NEW".to_string()),
                Some(v) if v.is_empty() => None,
                Some(v) => Some(v.to_ascii_uppercase()),
            },
        })
    }
}

/// Stage C: standalone central-directory probe pass.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub limit: i64,
}

impl ProbeSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limit: env_int("KENSHIN_PROBE_LIMIT", 500),
        })
    }
}

/// Stage D: automatic judgement of scanned archives.
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub limit: i64,
    /// Re-probe and overwrite even when `zip_has_xml` is already known.
    pub probe_always: bool,
}

impl JudgeSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limit: env_int("KENSHIN_JUDGE_LIMIT", 500),
            probe_always: env_bool("KENSHIN_JUDGE_PROBE_ALWAYS", false),
        })
    }
}

/// Stage E: copy judged archives into the staging input tree.
#[derive(Debug, Clone)]
pub struct CopySettings {
    pub input_root: Utf8PathBuf,
    pub limit: i64,
    pub overwrite: bool,
}

impl CopySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            input_root: Utf8PathBuf::from(env_required("KENSHIN_INPUT_ROOT")?),
            limit: env_int("KENSHIN_COPY_LIMIT", 500),
            overwrite: env_bool("KENSHIN_COPY_OVERWRITE", false),
        })
    }
}

/// What the `import` command runs in one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// ZIP receipt ledger + optional XML inventory.
    ZipImport,
    /// Per-XML extraction of PENDING receipts.
    XmlExtract,
    /// ZipImport then XmlExtract inside one run.
    Full,
}

impl ImportMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ZipImport => "ZIP_IMPORT",
            Self::XmlExtract => "XML_EXTRACT",
            Self::Full => "FULL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ZIP_IMPORT" => Ok(Self::ZipImport),
            "XML_EXTRACT" => Ok(Self::XmlExtract),
            "FULL" => Ok(Self::Full),
            other => Err(ConfigError::InvalidValue {
                key: "KENSHIN_IMPORT_MODE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Stages F/G: ZIP import and XML extraction.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub input_root: Utf8PathBuf,
    pub temp_root: Utf8PathBuf,
    pub mode: ImportMode,
    /// Inventory XML members during ZIP import.
    pub xml_enabled: bool,
    /// Light well-formed check during inventory (status stays PENDING
    /// on success).
    pub wellformed_check: bool,
    pub extract_limit: i64,
    pub target_status: String,
    pub xsd_root: Option<Utf8PathBuf>,
    pub xsd_main: String,
    /// Operator note prepended to the run summary.
    pub note: Option<String>,
}

impl ImportSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match env_opt("KENSHIN_IMPORT_MODE") {
            Some(raw) => ImportMode::parse(&raw)?,
            None => ImportMode::ZipImport,
        };
        Ok(Self {
            input_root: Utf8PathBuf::from(env_required("KENSHIN_INPUT_ROOT")?),
            temp_root: Utf8PathBuf::from(
                env_opt("KENSHIN_TEMP_ROOT").unwrap_or_else(|| "work/tmp_unzip".to_string()),
            ),
            mode,
            xml_enabled: env_bool("KENSHIN_XML_ENABLED", false),
            wellformed_check: env_bool("KENSHIN_XML_PARSE_WELLFORMED", false),
            extract_limit: env_int("KENSHIN_EXTRACT_LIMIT", 500),
            target_status: env_opt("KENSHIN_XML_TARGET_STATUS")
                .unwrap_or_else(|| "PENDING".to_string())
                .to_ascii_uppercase(),
            xsd_root: env_opt("KENSHIN_XSD_ROOT").map(Utf8PathBuf::from),
            xsd_main: env_opt("KENSHIN_XSD_MAIN").unwrap_or_else(|| "hc08_V08.xsd".to_string()),
            note: env_opt("KENSHIN_RUN_NOTE"),
        })
    }
}

/// Stage H: observation-value extraction.
#[derive(Debug, Clone)]
pub struct ItemExtractSettings {
    pub limit: i64,
    /// 0 = open a fresh run; >0 = attach to an existing run id.
    pub run_id: i64,
    pub zip_password_enabled: bool,
    pub note: Option<String>,
}

impl ItemExtractSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limit: env_int("KENSHIN_ITEM_LIMIT", 200),
            run_id: env_int("KENSHIN_ITEM_RUN_ID", 0),
            zip_password_enabled: env_bool("KENSHIN_ITEM_ZIP_PASSWORD_ENABLED", true),
            note: env_opt("KENSHIN_RUN_NOTE"),
        })
    }
}

/// Stage I: value normalization.
#[derive(Debug, Clone)]
pub struct NormalizeSettings {
    pub limit: i64,
}

impl NormalizeSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limit: env_int("KENSHIN_NORMALIZE_LIMIT", 500),
        })
    }
}

fn parse_ext_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = raw
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    out.sort();
    out.dedup();
    if out.is_empty() {
        // Safety net: an all-blank list would otherwise scan nothing.
        out.push("zip".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_list_normalizes() {
        assert_eq!(parse_ext_list("ZIP, .Xml ,zip"), vec!["xml", "zip"]);
        assert_eq!(parse_ext_list(" , "), vec!["zip"]);
    }

    #[test]
    fn import_mode_parses_case_insensitive() {
        assert_eq!(ImportMode::parse("full").unwrap(), ImportMode::Full);
        assert_eq!(
            ImportMode::parse(" zip_import ").unwrap(),
            ImportMode::ZipImport
        );
        assert!(ImportMode::parse("bogus").is_err());
    }

    #[test]
    fn import_mode_as_str_roundtrips() {
        for m in [ImportMode::ZipImport, ImportMode::XmlExtract, ImportMode::Full] {
            assert_eq!(ImportMode::parse(m.as_str()).unwrap(), m);
        }
    }
}
