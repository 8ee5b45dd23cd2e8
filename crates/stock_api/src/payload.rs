use chat_contract::{BindingPatch, OverridePatch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body for `POST agents/{id}/skills`.
#[derive(Debug, Clone, Serialize)]
pub struct BindRequest<'a> {
    pub skill_id: &'a str,
    pub is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt_override: Option<&'a str>,
}

/// Body for `PUT agents/{id}/skills/{binding_id}`.
///
/// Unchanged fields are omitted; a cleared override is sent as `null`.
pub fn binding_patch_body(patch: &BindingPatch) -> Value {
    let mut body = Map::new();
    if let Some(enabled) = patch.enabled {
        body.insert("is_enabled".to_owned(), Value::Bool(enabled));
    }
    match &patch.prompt_override {
        OverridePatch::Unchanged => {}
        OverridePatch::Set(text) => {
            body.insert(
                "custom_prompt_override".to_owned(),
                Value::String(text.clone()),
            );
        }
        OverridePatch::Clear => {
            body.insert("custom_prompt_override".to_owned(), Value::Null);
        }
    }
    Value::Object(body)
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleUpdate<'a> {
    pub title: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentUpdate<'a> {
    pub content: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeletedCount {
    #[serde(default, alias = "deleted_count", alias = "count")]
    pub deleted: u32,
}

/// List responses arrive either bare or wrapped in a keyed envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(
            alias = "data",
            alias = "tools",
            alias = "skills",
            alias = "categories",
            alias = "agents",
            alias = "bindings",
            alias = "sessions"
        )]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}
