//! Feature schema registry.
//!
//! A [`FeatureSchema`] maps each named feature group to its ordered list of
//! field names. The arity of each group fixes the width of the tensors the
//! tensorizer produces, so the schema is built once at startup and passed by
//! reference to everything that needs it. It is never mutated afterwards.
//!
//! # Example
//!
//! ```
//! use prm_core::schema::{FeatureGroupKind, FeatureSchema};
//!
//! let schema = FeatureSchema::default();
//! assert_eq!(schema.arity(FeatureGroupKind::Icf), 5);
//! assert_eq!(schema.arity(FeatureGroupKind::IvPv), 19);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ModelType;
use crate::error::{PrmError, Result};

/// The named feature groups understood by the tensorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureGroupKind {
    /// Item-content features, one vector per list position.
    #[serde(rename = "icf")]
    Icf,
    /// User-context features, one vector per request.
    #[serde(rename = "ucf")]
    Ucf,
    /// Page-view features, one vector per list position.
    #[serde(rename = "pv")]
    Pv,
    /// Interaction-vector features, one vector per list position.
    #[serde(rename = "iv")]
    Iv,
    /// Concatenation of `iv` and `pv`.
    #[serde(rename = "iv+pv")]
    IvPv,
}

impl FeatureGroupKind {
    /// All groups, in registry order.
    pub const ALL: [FeatureGroupKind; 5] = [
        FeatureGroupKind::Icf,
        FeatureGroupKind::Ucf,
        FeatureGroupKind::Pv,
        FeatureGroupKind::Iv,
        FeatureGroupKind::IvPv,
    ];

    /// Returns the canonical group name.
    pub fn name(self) -> &'static str {
        match self {
            FeatureGroupKind::Icf => "icf",
            FeatureGroupKind::Ucf => "ucf",
            FeatureGroupKind::Pv => "pv",
            FeatureGroupKind::Iv => "iv",
            FeatureGroupKind::IvPv => "iv+pv",
        }
    }
}

impl fmt::Display for FeatureGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureGroupKind {
    type Err = PrmError;

    fn from_str(s: &str) -> Result<Self> {
        FeatureGroupKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PrmError::InvalidSchema {
                message: format!("unknown feature group '{}'", s),
            })
    }
}

/// A named, ordered list of feature fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    kind: FeatureGroupKind,
    fields: Vec<String>,
}

impl FeatureGroup {
    /// Creates a group from its field names.
    pub fn new<S: Into<String>>(kind: FeatureGroupKind, fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns which group this is.
    pub fn kind(&self) -> FeatureGroupKind {
        self.kind
    }

    /// Returns the field names in order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns the number of fields in the group.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }
}

/// Serialized form of a schema; `iv+pv` is always derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaDef {
    icf: Vec<String>,
    ucf: Vec<String>,
    pv: Vec<String>,
    iv: Vec<String>,
}

/// The immutable registry of feature groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct FeatureSchema {
    icf: FeatureGroup,
    ucf: FeatureGroup,
    pv: FeatureGroup,
    iv: FeatureGroup,
    iv_pv: FeatureGroup,
}

impl FeatureSchema {
    /// Builds a schema from the four primary groups.
    ///
    /// The `iv+pv` group is the concatenation of `iv` followed by `pv`.
    ///
    /// # Errors
    ///
    /// Returns [`PrmError::InvalidSchema`] if any group is empty.
    pub fn new(
        icf: Vec<String>,
        ucf: Vec<String>,
        pv: Vec<String>,
        iv: Vec<String>,
    ) -> Result<Self> {
        for (kind, fields) in [
            (FeatureGroupKind::Icf, &icf),
            (FeatureGroupKind::Ucf, &ucf),
            (FeatureGroupKind::Pv, &pv),
            (FeatureGroupKind::Iv, &iv),
        ] {
            if fields.is_empty() {
                return Err(PrmError::InvalidSchema {
                    message: format!("group '{}' has no fields", kind),
                });
            }
        }

        let iv_pv = FeatureGroup::new(FeatureGroupKind::IvPv, iv.iter().chain(pv.iter()).cloned());
        Ok(Self {
            icf: FeatureGroup::new(FeatureGroupKind::Icf, icf),
            ucf: FeatureGroup::new(FeatureGroupKind::Ucf, ucf),
            pv: FeatureGroup::new(FeatureGroupKind::Pv, pv),
            iv: FeatureGroup::new(FeatureGroupKind::Iv, iv),
            iv_pv,
        })
    }

    /// Returns the group registered under `kind`.
    pub fn group(&self, kind: FeatureGroupKind) -> &FeatureGroup {
        match kind {
            FeatureGroupKind::Icf => &self.icf,
            FeatureGroupKind::Ucf => &self.ucf,
            FeatureGroupKind::Pv => &self.pv,
            FeatureGroupKind::Iv => &self.iv,
            FeatureGroupKind::IvPv => &self.iv_pv,
        }
    }

    /// Returns the arity of the group registered under `kind`.
    pub fn arity(&self, kind: FeatureGroupKind) -> usize {
        self.group(kind).arity()
    }

    /// Returns the trailing dense feature width a bundle has in the given mode.
    ///
    /// Modes 0 and 1 carry `iv` as their only dense block; the categorical
    /// channels of mode 1 are `[batch, seq_len]` arrays without a feature axis.
    /// Mode 2 stacks `icf`, `iv` and `pv`.
    pub fn dense_width(&self, model_type: ModelType) -> usize {
        match model_type {
            ModelType::ContextOnly | ModelType::PersonalizedV1 => self.iv.arity(),
            ModelType::PersonalizedV2 => self.icf.arity() + self.iv.arity() + self.pv.arity(),
        }
    }

    /// Returns the number of `[batch, seq_len]` categorical channels in mode 1:
    /// the user id plus one per `ucf` and `icf` field.
    pub fn categorical_channels(&self) -> usize {
        1 + self.ucf.arity() + self.icf.arity()
    }

    /// Checks `d_feature` against the schema for `model_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PrmError::FeatureWidthMismatch`] if the widths differ.
    pub fn check_width(&self, model_type: ModelType, d_feature: usize) -> Result<()> {
        let derived = self.dense_width(model_type);
        if derived != d_feature {
            return Err(PrmError::FeatureWidthMismatch {
                model_type,
                configured: d_feature,
                derived,
            });
        }
        Ok(())
    }
}

fn numbered(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}{}", prefix, i)).collect()
}

impl Default for FeatureSchema {
    /// The production layout: 5 item-content, 3 user-context, 12 page-view
    /// and 7 interaction fields.
    fn default() -> Self {
        Self {
            icf: FeatureGroup::new(FeatureGroupKind::Icf, numbered("icf", 5)),
            ucf: FeatureGroup::new(FeatureGroupKind::Ucf, numbered("ucf", 3)),
            pv: FeatureGroup::new(FeatureGroupKind::Pv, numbered("pv", 12)),
            iv: FeatureGroup::new(FeatureGroupKind::Iv, numbered("iv", 7)),
            iv_pv: FeatureGroup::new(
                FeatureGroupKind::IvPv,
                numbered("iv", 7).into_iter().chain(numbered("pv", 12)),
            ),
        }
    }
}

impl TryFrom<SchemaDef> for FeatureSchema {
    type Error = PrmError;

    fn try_from(def: SchemaDef) -> Result<Self> {
        FeatureSchema::new(def.icf, def.ucf, def.pv, def.iv)
    }
}

impl From<FeatureSchema> for SchemaDef {
    fn from(schema: FeatureSchema) -> Self {
        SchemaDef {
            icf: schema.icf.fields,
            ucf: schema.ucf.fields,
            pv: schema.pv.fields,
            iv: schema.iv.fields,
        }
    }
}
