//! Status, step, and error-code vocabularies shared across the pipeline.
//!
//! The ledger stores these as short uppercase strings; the enums here are
//! the single source of those spellings. Writers go through
//! [`as_str`](AutoJudgement::as_str)-style accessors so a typo cannot
//! reach the database.

/// Classification of an observed share file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoJudgement {
    /// A statutory health-checkup deliverable.
    Kenshin,
    /// Positively known not to be one (operator-set only).
    NonKenshin,
    /// The archive could not be inspected.
    Unreadable,
    /// Nothing decisive observed.
    Unknown,
}

impl AutoJudgement {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kenshin => "KENSHIN",
            Self::NonKenshin => "NON_KENSHIN",
            Self::Unreadable => "UNREADABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Where an observed share file sits in the staging flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    New,
    InputCopied,
    Imported,
    Skipped,
}

impl StageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InputCopied => "INPUT_COPIED",
            Self::Imported => "IMPORTED",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// Extraction status of an XML receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Ok,
    Error,
}

impl ReceiptStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

/// Structural verdict on an imported ZIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureStatus {
    Ok,
    Error,
}

impl StructureStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

/// Whether a receipt was first observed by this run or seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptAction {
    New,
    Seen,
}

impl ReceiptAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Seen => "SEEN",
        }
    }
}

/// Per-XML processing step recorded in `xml_process_logs`.
///
/// Kept to short fixed spellings: the column is an ENUM in most
/// deployments and the member list differs between them (the insert path
/// guards against unknown members).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Wellformed,
    CdaIndex,
    XsdValidate,
    ExtractItems,
    Ledger,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wellformed => "WELLFORMED",
            Self::CdaIndex => "CDA_INDEX",
            Self::XsdValidate => "XSD_VALIDATE",
            Self::ExtractItems => "EXTRACT_ITEMS",
            Self::Ledger => "LEDGER",
        }
    }
}

/// Outcome of a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Ok,
    Skip,
    Error,
}

impl StepResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Skip => "SKIP",
            Self::Error => "ERROR",
        }
    }
}

/// Normalization status of a projected item value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStatus {
    Raw,
    Ok,
    Error,
}

impl NormalizeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

/// Error taxonomy carried in `error_code` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Archive could not be opened at all.
    ZipOpen,
    /// Password candidates exhausted on an encrypted archive.
    ZipPassword,
    /// Path-length or path-creation failure while extracting.
    ZipLongPath,
    /// Extraction produced no files at all.
    ZipEmptyContent,
    /// Anything unexpected in the ZIP layer.
    ZipUnexpected,
    /// The recorded inner path has no member, even after suffix rescue.
    ZipMemberNotFound,
    /// The XML receipt's parent ZIP receipt is gone.
    ParentZipMissing,
    /// No `DATA` directory; XMLs were scooped from anywhere.
    StructNoDataDir,
    /// More than one `DATA` directory; all were scooped.
    StructMultiDataDir,
    /// Archive extracted but contains no XML.
    StructZeroXml,
    /// The member is not well-formed XML.
    XmlParse,
    /// Header-extract ledger upsert failed.
    LedgerUpsert,
    /// A receipt row is missing one of its identity keys.
    RowKeyMissing,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ZipOpen => "ZIP_OPEN",
            Self::ZipPassword => "ZIP_PASSWORD",
            Self::ZipLongPath => "ZIP_LONG_PATH",
            Self::ZipEmptyContent => "ZIP_EMPTY_CONTENT",
            Self::ZipUnexpected => "ZIP_UNEXPECTED",
            Self::ZipMemberNotFound => "ZIP_MEMBER_NOT_FOUND",
            Self::ParentZipMissing => "PARENT_ZIP_MISSING",
            Self::StructNoDataDir => "STRUCT_NO_DATA_DIR",
            Self::StructMultiDataDir => "STRUCT_MULTI_DATA_DIR",
            Self::StructZeroXml => "STRUCT_ZERO_XML",
            Self::XmlParse => "XML_PARSE",
            Self::LedgerUpsert => "LEDGER_UPSERT",
            Self::RowKeyMissing => "ROW_KEY_MISSING",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spellings_are_short_uppercase() {
        let all = [
            AutoJudgement::Kenshin.as_str(),
            AutoJudgement::NonKenshin.as_str(),
            StageStatus::InputCopied.as_str(),
            ReceiptStatus::Pending.as_str(),
            Step::XsdValidate.as_str(),
            StepResult::Skip.as_str(),
            ErrorCode::ZipMemberNotFound.as_str(),
            NormalizeStatus::Raw.as_str(),
        ];
        for s in all {
            assert!(!s.is_empty() && s.len() <= 24);
            assert_eq!(s, s.to_uppercase());
        }
    }
}
