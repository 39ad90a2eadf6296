use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const KEY_MAX_LENGTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranslationItem {
    pub key: String,
    pub language: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TranslationItemDto {
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schema(max_length = 100)]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub value: String,
}

/// `null` is reported by `validate()` as a missing field, not as a malformed body.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl TranslationItemDto {
    pub fn from_entity(item: &TranslationItem) -> Self {
        Self {
            key: item.key.clone(),
            value: item.value.clone(),
        }
    }

    /// The language always comes from the route, never from the body.
    pub fn into_entity(self, language: &str) -> TranslationItem {
        TranslationItem {
            key: self.key,
            language: language.to_string(),
            value: self.value,
        }
    }

    /**
     * validate
     * 校验 DTO 自身的字段约束，返回 字段 -> 错误信息 的映射（为空表示通过）。
     */
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();

        if self.key.trim().is_empty() {
            errors.add("key", "The Key field is required.");
        } else if self.key.chars().count() > KEY_MAX_LENGTH {
            errors.add(
                "key",
                format!(
                    "The field Key must be a string or array type with a maximum length of '{}'.",
                    KEY_MAX_LENGTH
                ),
            );
        }

        if self.value.trim().is_empty() {
            errors.add("value", "The Value field is required.");
        }

        errors
    }
}

/// Field name -> messages, serialized as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn add_duplicate_key(&mut self) {
        self.add("key", "Key is Duplicate.");
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct ApiError {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn database(err: &anyhow::Error) -> Self {
        Self {
            code: "database_error".to_string(),
            detail: Some(format!("{:#}", err)),
        }
    }
}
