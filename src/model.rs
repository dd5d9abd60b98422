use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::context::RunContext;
use crate::error::BuildError;
use crate::events::{self, Action, EventKind};
use crate::fields::{
    ExpandSpec, FieldKind, FieldState, FieldValue, OptionItem, RemoteInit, RemoteSpec,
};
use crate::form::{Form, FormBuilder};
use crate::services::data;
use crate::services::loader::{
    decode_category_nodes, decode_columns, decode_options, decode_options_at, decode_tree,
};
use crate::validate::Rule;

/// Declarative form definition, loaded from YAML (or JSON).
#[derive(Debug, Deserialize, Clone)]
pub struct FormSpec {
    #[serde(default)]
    pub title: Option<String>,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub hookable: bool,
    #[serde(default)]
    pub items: Vec<OptionItem>,
    #[serde(default)]
    pub remote: Option<RemoteDef>,
    #[serde(default)]
    pub events: Vec<EventDef>,
    #[serde(default)]
    pub attrs: serde_json::Map<String, JsonValue>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteDef {
    /// business_list | topology | attribute_schema | service_category
    /// | service_templates | url
    pub query: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub unwrap: Option<String>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub adopt_first: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventDef {
    pub source: String,
    #[serde(rename = "on")]
    pub kind: EventKindDef,
    pub action: ActionDef,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKindDef {
    Init,
    Change,
}

impl From<EventKindDef> for EventKind {
    fn from(k: EventKindDef) -> Self {
        match k {
            EventKindDef::Init => EventKind::Init,
            EventKindDef::Change => EventKind::Change,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDef {
    ShowWhen {
        value: String,
    },
    ReplayChange,
    AdoptContextBiz,
    CascadeReload {
        #[serde(default)]
        clear_value: bool,
    },
    SetValue {
        value: String,
    },
    ClearValue,
}

pub fn load_form_spec(path: &Path) -> Result<FormSpec> {
    let s = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let spec: FormSpec = serde_yaml::from_str(&s).with_context(|| format!("parsing {path:?}"))?;
    Ok(spec)
}

const FIELD_TYPES: &[&str] = &["select", "radio", "tree", "textarea", "table"];
const REMOTE_QUERIES: &[&str] = &[
    "business_list",
    "topology",
    "attribute_schema",
    "service_category",
    "service_templates",
    "url",
];

/// Structural validation: unique ids, known kinds, resolvable event
/// sources, and no cycle among value-propagating change bindings.
pub fn validate_form_spec(spec: &FormSpec) -> Result<(), BuildError> {
    let mut ids: HashSet<&str> = HashSet::new();
    for f in &spec.fields {
        if !ids.insert(f.id.as_str()) {
            return Err(BuildError::DuplicateField(f.id.clone()));
        }
        if !FIELD_TYPES.contains(&f.kind.as_str()) {
            return Err(BuildError::InvalidSpec(format!(
                "field '{}' has unknown type '{}'",
                f.id, f.kind
            )));
        }
        if f.kind == "radio" && f.items.is_empty() {
            return Err(BuildError::InvalidSpec(format!(
                "radio field '{}' needs items",
                f.id
            )));
        }
        if let Some(r) = &f.remote {
            if !REMOTE_QUERIES.contains(&r.query.as_str()) {
                return Err(BuildError::InvalidSpec(format!(
                    "field '{}' has unknown remote query '{}'",
                    f.id, r.query
                )));
            }
            if r.query == "url" && r.url.is_none() {
                return Err(BuildError::InvalidSpec(format!(
                    "field '{}' remote query 'url' needs a url",
                    f.id
                )));
            }
            if r.unwrap.is_some() && f.kind != "select" {
                return Err(BuildError::InvalidSpec(format!(
                    "field '{}': 'unwrap' only applies to select fields",
                    f.id
                )));
            }
        }
    }
    for f in &spec.fields {
        for e in &f.events {
            if !ids.contains(e.source.as_str()) {
                return Err(BuildError::UnknownField {
                    source: e.source.clone(),
                    target: f.id.clone(),
                });
            }
        }
    }
    detect_event_cycles(spec)
}

fn detect_event_cycles(spec: &FormSpec) -> Result<(), BuildError> {
    // Edges source -> field for change bindings whose action writes the
    // field's value (and therefore re-publishes change).
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for f in &spec.fields {
        for e in &f.events {
            if e.kind != EventKindDef::Change {
                continue;
            }
            let writes = matches!(
                e.action,
                ActionDef::SetValue { .. }
                    | ActionDef::ClearValue
                    | ActionDef::CascadeReload { clear_value: true }
            );
            if writes {
                edges
                    .entry(e.source.as_str())
                    .or_default()
                    .push(f.id.as_str());
            }
        }
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        state: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match state.get(node).copied().unwrap_or(0) {
            1 => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            2 => return None,
            _ => {}
        }
        state.insert(node, 1);
        path.push(node);
        if let Some(next) = edges.get(node) {
            for n in next {
                if let Some(cycle) = visit(n, edges, state, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        state.insert(node, 2);
        None
    }

    let mut state: HashMap<&str, u8> = HashMap::new();
    let keys: Vec<&str> = edges.keys().copied().collect();
    for k in keys {
        let mut path = Vec::new();
        if let Some(cycle) = visit(k, &edges, &mut state, &mut path) {
            return Err(BuildError::CyclicEvents { path: cycle });
        }
    }
    Ok(())
}

/// Compile a validated definition into a live form.
pub fn compile(spec: &FormSpec, ctx: RunContext) -> Result<Form, BuildError> {
    validate_form_spec(spec)?;
    let mut builder = FormBuilder::new(ctx);
    for f in &spec.fields {
        let kind = match f.kind.as_str() {
            "radio" => FieldKind::Radio {
                items: f.items.clone(),
            },
            "tree" => FieldKind::Tree,
            "textarea" => FieldKind::TextArea,
            "table" => FieldKind::Table,
            _ => FieldKind::Select,
        };
        let mut field = FieldState::new(&f.id, &f.label, kind);
        if let Some(d) = &f.default {
            field.value = FieldValue::Text(d.clone());
        }
        field.visible = f.visible;
        field.disabled = f.disabled;
        field.hookable = f.hookable;
        field.attrs = f.attrs.clone();
        if f.required {
            field.rules.push(Rule::Required);
        }
        if let Some(r) = &f.remote {
            field.remote = Some(compile_remote(r, &f.kind)?);
        }
        builder = builder.field(field);
    }
    for f in &spec.fields {
        for e in &f.events {
            builder = builder.on(&e.source, e.kind.into(), &f.id, compile_action(&e.action));
        }
    }
    builder.build()
}

fn compile_action(a: &ActionDef) -> Action {
    match a {
        ActionDef::ShowWhen { value } => events::show_when(value),
        ActionDef::ReplayChange => events::replay_change(),
        ActionDef::AdoptContextBiz => events::adopt_context_biz(),
        ActionDef::CascadeReload { clear_value } => events::cascade_reload(*clear_value),
        ActionDef::SetValue { value } => events::set_value(FieldValue::Text(value.clone())),
        ActionDef::ClearValue => events::clear_value(),
    }
}

fn compile_remote(r: &RemoteDef, kind: &str) -> Result<RemoteSpec, BuildError> {
    let dep = r.depends_on.as_deref();
    let mut spec = match r.query.as_str() {
        "business_list" => {
            RemoteSpec::new(data::business_list_template(), Arc::new(decode_options))
        }
        "topology" => RemoteSpec::new(data::topology_template(dep), Arc::new(decode_tree)),
        "attribute_schema" => RemoteSpec::new(
            data::attribute_schema_template(dep),
            Arc::new(decode_columns),
        ),
        "service_templates" => RemoteSpec::new(
            data::service_templates_template(dep),
            Arc::new(decode_options),
        ),
        "service_category" => {
            let mut s = RemoteSpec::new(
                data::service_category_template(dep),
                decode_category_nodes(false),
            );
            s.expand = Some(ExpandSpec {
                template: data::service_category_expand(dep),
                init: decode_category_nodes(true),
            });
            s
        }
        _ => {
            let url = r.url.as_deref().ok_or_else(|| {
                BuildError::InvalidSpec("remote query 'url' needs a url".to_string())
            })?;
            let init: RemoteInit = match (r.unwrap.as_deref(), kind) {
                (Some(path), _) => decode_options_at(path),
                (None, "tree") => Arc::new(decode_tree),
                (None, "table") => Arc::new(decode_columns),
                (None, _) => Arc::new(decode_options),
            };
            RemoteSpec::new(data::url_template(url, dep), init)
        }
    };
    spec.adopt_first = r.adopt_first;
    Ok(spec)
}
