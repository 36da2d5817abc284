//! Decoding of one delimited input row.
//!
//! Each line holds six fields in a fixed order:
//!
//! ```text
//! user_id | ucf | icf | iv | pv | label
//! ```
//!
//! The user id is an integer; the remaining five fields are JSON arrays that
//! stay as text until the tensorizer decodes them against the schema.

use std::borrow::Cow;

use csv::StringRecord;

use crate::error::{DataError, Result};

/// The six logical columns of an input row, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Integer user id.
    UserId,
    /// User-context features, a flat JSON vector.
    Ucf,
    /// Item-content features, one JSON vector per position.
    Icf,
    /// Interaction-vector features, one JSON vector per position.
    Iv,
    /// Page-view features, one JSON vector per position.
    Pv,
    /// Relevance labels, one per position.
    Label,
}

impl Column {
    /// Number of fields in a well-formed row.
    pub const COUNT: usize = 6;

    /// Returns the column name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Column::UserId => "user_id",
            Column::Ucf => "ucf",
            Column::Icf => "icf",
            Column::Iv => "iv",
            Column::Pv => "pv",
            Column::Label => "label",
        }
    }
}

/// One decoded input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source file.
    pub line: u64,
    /// The requesting user.
    pub user_id: i64,
    /// User-context JSON, already passed through [`normalize_nulls`].
    pub ucf: String,
    /// Item-content JSON.
    pub icf: String,
    /// Interaction-vector JSON.
    pub iv: String,
    /// Page-view JSON.
    pub pv: String,
    /// Label JSON.
    pub label: String,
}

impl RawRecord {
    /// Builds a record from the fields of one delimited row.
    ///
    /// An empty user id decodes as `0`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MalformedRecord`] if the row does not have exactly
    /// six fields or the user id is not an integer.
    pub fn from_fields(record: &StringRecord, line: u64) -> Result<Self> {
        if record.len() != Column::COUNT {
            return Err(DataError::MalformedRecord {
                line,
                column: Column::UserId.name(),
                message: format!(
                    "expected {} fields, found {}",
                    Column::COUNT,
                    record.len()
                ),
            });
        }

        let raw_uid = record[0].trim();
        let user_id = if raw_uid.is_empty() {
            0
        } else {
            raw_uid
                .parse::<i64>()
                .map_err(|e| DataError::MalformedRecord {
                    line,
                    column: Column::UserId.name(),
                    message: format!("'{}' is not an integer: {}", raw_uid, e),
                })?
        };

        Ok(Self {
            line,
            user_id,
            ucf: normalize_nulls(&record[1]).into_owned(),
            icf: record[2].to_string(),
            iv: record[3].to_string(),
            pv: record[4].to_string(),
            label: record[5].to_string(),
        })
    }

    /// Returns the raw text of a JSON column.
    ///
    /// For [`Column::UserId`] this is empty; use [`RawRecord::user_id`].
    pub fn json(&self, column: Column) -> &str {
        match column {
            Column::UserId => "",
            Column::Ucf => &self.ucf,
            Column::Icf => &self.icf,
            Column::Iv => &self.iv,
            Column::Pv => &self.pv,
            Column::Label => &self.label,
        }
    }
}

/// Rewrites literal `null` tokens to `0`.
///
/// This is the only coercion applied to input text, and only the user-context
/// column goes through it.
pub fn normalize_nulls(json: &str) -> Cow<'_, str> {
    if json.contains("null") {
        Cow::Owned(json.replace("null", "0"))
    } else {
        Cow::Borrowed(json)
    }
}
