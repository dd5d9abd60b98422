use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::RunContext;
use crate::error::BuildError;
use crate::validate::Rule;

/// Handle to a registered field, resolved once at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldId(pub(crate) usize);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub value: String,
    pub label: String,
}

impl OptionItem {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum FieldKind {
    Select,
    Radio { items: Vec<OptionItem> },
    Tree,
    TextArea,
    Table,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Items(Vec<String>),
    Rows(Vec<JsonValue>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Items(v) => v.is_empty(),
            FieldValue::Rows(r) => r.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Empty value of the same shape.
    pub fn cleared(&self) -> FieldValue {
        match self {
            FieldValue::Text(_) => FieldValue::Text(String::new()),
            FieldValue::Items(_) => FieldValue::Items(Vec::new()),
            FieldValue::Rows(_) => FieldValue::Rows(Vec::new()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Text(s) => JsonValue::String(s.clone()),
            FieldValue::Items(v) => {
                JsonValue::Array(v.iter().cloned().map(JsonValue::String).collect())
            }
            FieldValue::Rows(r) => JsonValue::Array(r.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnDef {
    pub tag: String,
    pub label: String,
    pub kind: String,
    pub attrs: serde_json::Map<String, JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TreeNode {
    pub value: String,
    pub label: String,
    pub leaf: bool,
    pub children: Vec<String>,
}

/// Tree data as an explicit node store keyed by node value. Lazy
/// expansions splice children in by key; nothing aliases the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TreeStore {
    pub roots: Vec<String>,
    pub nodes: HashMap<String, TreeNode>,
}

impl TreeStore {
    pub fn get(&self, value: &str) -> Option<&TreeNode> {
        self.nodes.get(value)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Splice `children` in under `parent`, replacing any previous
    /// expansion. Returns false when the parent is not in the store.
    pub fn insert_children(&mut self, parent: &str, children: TreeStore) -> bool {
        if !self.nodes.contains_key(parent) {
            return false;
        }
        let kids = children.roots;
        for (key, node) in children.nodes {
            self.nodes.insert(key, node);
        }
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children = kids;
        }
        true
    }
}

/// Remote data attached to a field, replaced wholesale by each
/// completed load.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldData {
    #[default]
    Empty,
    Options(Vec<OptionItem>),
    Tree(TreeStore),
    Columns(Vec<ColumnDef>),
}

/// Renders the request URL for a field's current dependencies.
/// `None` (or an empty string) means: no request, clear the data.
pub type UrlTemplate = Arc<dyn Fn(&RunContext, Siblings<'_>) -> Option<String> + Send + Sync>;

/// Same, for a lazy tree expansion step; the third argument is the
/// node being expanded.
pub type ExpandTemplate =
    Arc<dyn Fn(&RunContext, Siblings<'_>, &str) -> Option<String> + Send + Sync>;

/// Transform applied to the envelope's `data` before it becomes the
/// field's options/columns.
pub type RemoteInit = Arc<dyn Fn(&JsonValue) -> Result<FieldData, String> + Send + Sync>;

#[derive(Clone)]
pub struct ExpandSpec {
    pub template: ExpandTemplate,
    pub init: RemoteInit,
}

#[derive(Clone)]
pub struct RemoteSpec {
    pub template: UrlTemplate,
    pub init: RemoteInit,
    /// Adopt the first loaded option as the field value once the load
    /// completes (service-template default selection).
    pub adopt_first: bool,
    pub expand: Option<ExpandSpec>,
}

impl RemoteSpec {
    pub fn new(template: UrlTemplate, init: RemoteInit) -> Self {
        Self {
            template,
            init,
            adopt_first: false,
            expand: None,
        }
    }
}

pub struct FieldState {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub value: FieldValue,
    pub visible: bool,
    pub disabled: bool,
    pub hookable: bool,
    pub dirty: bool,
    pub attrs: serde_json::Map<String, JsonValue>,
    pub error: Option<String>,
    pub load_error: Option<String>,
    pub rules: Vec<Rule>,
    pub remote: Option<RemoteSpec>,
    pub data: FieldData,
}

impl FieldState {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        let value = match kind {
            FieldKind::Table => FieldValue::Rows(Vec::new()),
            FieldKind::Tree => FieldValue::Items(Vec::new()),
            _ => FieldValue::Text(String::new()),
        };
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            value,
            visible: true,
            disabled: false,
            hookable: false,
            dirty: false,
            attrs: serde_json::Map::new(),
            error: None,
            load_error: None,
            rules: Vec::new(),
            remote: None,
            data: FieldData::Empty,
        }
    }
}

/// Holds every field of one form, in declaration order.
#[derive(Default)]
pub struct Registry {
    fields: Vec<FieldState>,
    index: HashMap<String, FieldId>,
}

impl Registry {
    pub fn define(&mut self, field: FieldState) -> Result<FieldId, BuildError> {
        if self.index.contains_key(&field.name) {
            return Err(BuildError::DuplicateField(field.name));
        }
        let id = FieldId(self.fields.len());
        self.index.insert(field.name.clone(), id);
        self.fields.push(field);
        Ok(id)
    }

    pub fn resolve(&self, name: &str) -> Option<FieldId> {
        self.index.get(name).copied()
    }

    pub fn field(&self, id: FieldId) -> &FieldState {
        &self.fields[id.0]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldState {
        &mut self.fields[id.0]
    }

    pub fn name_of(&self, id: FieldId) -> &str {
        &self.fields[id.0].name
    }

    pub fn set_value(&mut self, id: FieldId, value: FieldValue) {
        let f = &mut self.fields[id.0];
        f.value = value;
        f.dirty = true;
    }

    /// Field ids in declaration order.
    pub fn ids(&self) -> Vec<FieldId> {
        (0..self.fields.len()).map(FieldId).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldState)> {
        self.fields.iter().enumerate().map(|(i, f)| (FieldId(i), f))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read-only view of sibling fields handed to templates, event actions
/// and custom validators.
#[derive(Clone, Copy)]
pub struct Siblings<'a> {
    reg: &'a Registry,
}

impl<'a> Siblings<'a> {
    pub fn new(reg: &'a Registry) -> Self {
        Self { reg }
    }

    pub fn get(&self, name: &str) -> Option<&'a FieldState> {
        self.reg.resolve(name).map(|id| self.reg.field(id))
    }

    pub fn value(&self, name: &str) -> Option<&'a FieldValue> {
        self.get(name).map(|f| &f.value)
    }

    pub fn text(&self, name: &str) -> Option<&'a str> {
        self.value(name).and_then(|v| v.as_text())
    }
}
