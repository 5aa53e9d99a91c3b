//! Recipient targeting descriptors.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{Error, Result};

/// Who a notification or campaign is addressed to.
///
/// Serialized as `{"type": "roles", "ids": ["coach"]}`; `everyone` carries no ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum RecipientTarget {
    Everyone,
    Users(Vec<String>),
    Roles(Vec<String>),
    Teams(Vec<String>),
    Divisions(Vec<String>),
    Programs(Vec<String>),
}

/// Discriminator persisted in `target_kind` columns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TargetKind {
    Everyone,
    Users,
    Roles,
    Teams,
    Divisions,
    Programs,
}

impl RecipientTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Everyone => TargetKind::Everyone,
            Self::Users(_) => TargetKind::Users,
            Self::Roles(_) => TargetKind::Roles,
            Self::Teams(_) => TargetKind::Teams,
            Self::Divisions(_) => TargetKind::Divisions,
            Self::Programs(_) => TargetKind::Programs,
        }
    }

    pub fn ids(&self) -> &[String] {
        match self {
            Self::Everyone => &[],
            Self::Users(ids)
            | Self::Roles(ids)
            | Self::Teams(ids)
            | Self::Divisions(ids)
            | Self::Programs(ids) => ids,
        }
    }

    /// JSON array stored in `target_ids`.
    pub fn ids_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self.ids())?)
    }

    /// Rebuild a target from its persisted columns.
    pub fn from_columns(kind: &str, ids_json: &str) -> Result<Self> {
        let kind: TargetKind = kind
            .parse()
            .map_err(|_| Error::validation(format!("unknown target kind '{kind}'")))?;
        let ids: Vec<String> = serde_json::from_str(ids_json)?;
        Ok(match kind {
            TargetKind::Everyone => Self::Everyone,
            TargetKind::Users => Self::Users(ids),
            TargetKind::Roles => Self::Roles(ids),
            TargetKind::Teams => Self::Teams(ids),
            TargetKind::Divisions => Self::Divisions(ids),
            TargetKind::Programs => Self::Programs(ids),
        })
    }
}

/// A user that was not (fully) delivered to, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SkippedRecipient {
    pub user_id: String,
    pub reason: String,
}

impl SkippedRecipient {
    pub fn new(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_wire_format() {
        let target: RecipientTarget =
            serde_json::from_str(r#"{"type":"roles","ids":["coach","parent"]}"#).unwrap();
        assert_eq!(
            target,
            RecipientTarget::Roles(vec!["coach".into(), "parent".into()])
        );

        let everyone: RecipientTarget = serde_json::from_str(r#"{"type":"everyone"}"#).unwrap();
        assert_eq!(everyone, RecipientTarget::Everyone);
    }

    #[test]
    fn test_columns_roundtrip() {
        let target = RecipientTarget::Teams(vec!["t1".into()]);
        let rebuilt =
            RecipientTarget::from_columns(&target.kind().to_string(), &target.ids_json().unwrap())
                .unwrap();
        assert_eq!(rebuilt, target);
        assert!(RecipientTarget::from_columns("planets", "[]").is_err());
    }
}
