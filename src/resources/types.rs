use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use super::ResourceError;
use crate::store::{Changes, Column, Row, StoreError};

pub(crate) const TITLE_MAX: usize = 256;
pub(crate) const VERSION_MAX: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Form {
    pub id: Uuid,
    /// `None` once the owning account has been deleted.
    #[serde(rename = "userID")]
    pub user_id: Option<Uuid>,
    pub title: String,
}

impl TryFrom<&Row> for Form {
    type Error = StoreError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.uuid(Column::Id)?,
            user_id: row.opt_uuid(Column::UserId)?,
            title: row.text(Column::Title)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Schema {
    pub id: Uuid,
    #[serde(rename = "formID")]
    pub form_id: Uuid,
    pub title: String,
    pub version: String,
    #[schema(value_type = Option<Object>)]
    pub schema: Option<JsonValue>,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
}

impl TryFrom<&Row> for Schema {
    type Error = StoreError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.uuid(Column::Id)?,
            form_id: row.uuid(Column::FormId)?,
            title: row.text(Column::Title)?,
            version: row.text(Column::Version)?,
            schema: row.json(Column::Schema)?,
            read_only: row.boolean(Column::ReadOnly)?,
        })
    }
}

/// Body of form creation and form update requests.
#[derive(Clone, Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FormTitle {
    pub title: String,
}

impl FormTitle {
    pub(crate) fn changes(&self) -> Result<Changes, ResourceError> {
        valid_title(&self.title)?;
        Ok(Changes::new().set(Column::Title, self.title.as_str()))
    }
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NewSchema {
    pub title: String,
    pub version: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub schema: Option<JsonValue>,
    #[serde(default, rename = "readOnly")]
    pub read_only: bool,
}

impl NewSchema {
    pub(crate) fn values(&self, form_id: Uuid) -> Result<Changes, ResourceError> {
        valid_title(&self.title)?;
        valid_version(&self.version)?;
        Ok(Changes::new()
            .set(Column::FormId, form_id)
            .set(Column::Title, self.title.as_str())
            .set(Column::Version, self.version.as_str())
            .set(Column::Schema, self.schema.clone())
            .set(Column::ReadOnly, self.read_only))
    }
}

/// Partial schema update. Only these fields can change; the form a schema
/// belongs to is fixed at creation.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SchemaPatch {
    pub title: Option<String>,
    pub version: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub schema: Option<JsonValue>,
    #[serde(rename = "readOnly")]
    pub read_only: Option<bool>,
}

impl SchemaPatch {
    pub(crate) fn changes(&self) -> Result<Changes, ResourceError> {
        let mut changes = Changes::new();
        if let Some(title) = &self.title {
            valid_title(title)?;
            changes.push(Column::Title, title.as_str());
        }
        if let Some(version) = &self.version {
            valid_version(version)?;
            changes.push(Column::Version, version.as_str());
        }
        if let Some(schema) = &self.schema {
            changes.push(Column::Schema, Some(schema.clone()));
        }
        if let Some(read_only) = self.read_only {
            changes.push(Column::ReadOnly, read_only);
        }
        if changes.is_empty() {
            return Err(ResourceError::InvalidInput("patch must change at least one field"));
        }
        Ok(changes)
    }
}

fn valid_title(title: &str) -> Result<(), ResourceError> {
    let len = title.chars().count();
    if (1..=TITLE_MAX).contains(&len) {
        Ok(())
    } else {
        Err(ResourceError::InvalidInput(
            "title must be between 1 and 256 characters",
        ))
    }
}

fn valid_version(version: &str) -> Result<(), ResourceError> {
    let len = version.chars().count();
    if (1..=VERSION_MAX).contains(&len) {
        Ok(())
    } else {
        Err(ResourceError::InvalidInput(
            "version must be between 1 and 64 characters",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;

    #[test]
    fn empty_patch_is_rejected() {
        assert!(matches!(
            SchemaPatch::default().changes(),
            Err(ResourceError::InvalidInput(_))
        ));
    }

    #[test]
    fn patch_only_touches_given_fields() -> Result<(), ResourceError> {
        let patch = SchemaPatch {
            read_only: Some(true),
            ..SchemaPatch::default()
        };
        assert_eq!(
            patch.changes()?.assignments(),
            &[(Column::ReadOnly, Value::Bool(true))]
        );
        Ok(())
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let result = serde_json::from_str::<SchemaPatch>(r#"{"formID":"x"}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<SchemaPatch>(r#"{"title":"t","id":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn lengths_are_checked() {
        let long = FormTitle {
            title: "t".repeat(TITLE_MAX + 1),
        };
        assert!(long.changes().is_err());
        let empty = FormTitle {
            title: String::new(),
        };
        assert!(empty.changes().is_err());

        let schema = NewSchema {
            title: "t".to_string(),
            version: "v".repeat(VERSION_MAX + 1),
            schema: None,
            read_only: false,
        };
        assert!(schema.values(Uuid::new_v4()).is_err());
    }

    #[test]
    fn new_schema_defaults() -> Result<(), serde_json::Error> {
        let schema: NewSchema = serde_json::from_str(r#"{"title":"t","version":"1"}"#)?;
        assert!(!schema.read_only);
        assert!(schema.schema.is_none());
        Ok(())
    }
}
