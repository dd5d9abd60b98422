use std::collections::HashMap;
use std::env;
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::context::RunContext;
use crate::fields::{ExpandTemplate, Siblings, UrlTemplate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectScope {
    Set,
    Module,
}

impl ObjectScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectScope::Set => "set",
            ObjectScope::Module => "module",
        }
    }
}

/// The catalog queries the form family needs, addressed as URLs so the
/// transport stays a dumb request/response channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteQuery {
    BusinessList,
    Topology { biz: String },
    AttributeSchema { scope: ObjectScope, biz: String },
    ServiceCategory { biz: String, parent: Option<String> },
    ServiceTemplates { biz: String },
}

impl RemoteQuery {
    pub fn url(&self, ctx: &RunContext) -> String {
        let site = &ctx.site_url;
        match self {
            RemoteQuery::BusinessList => format!("{site}pipeline/cc_get_business_list/"),
            RemoteQuery::Topology { biz } => {
                format!("{site}pipeline/cc_search_topo/set/normal/{biz}/")
            }
            RemoteQuery::AttributeSchema { scope, biz } => format!(
                "{site}pipeline/cc_search_create_object_attribute/{}/{biz}/",
                scope.as_str()
            ),
            RemoteQuery::ServiceCategory { biz, parent } => format!(
                "{site}pipeline/cc_list_service_category/{biz}/{}/",
                parent.as_deref().unwrap_or("0")
            ),
            RemoteQuery::ServiceTemplates { biz } => {
                format!("{site}pipeline/cc_list_service_template/{biz}/")
            }
        }
    }
}

/// Request/response channel to the console backend. Implementations
/// return the raw `{result, data, message}` envelope.
pub trait DataService: Send + Sync {
    fn fetch(&self, url: &str) -> Result<JsonValue>;
}

/// Unwrap a gateway envelope, yielding its `data` or the error message.
pub fn unwrap_envelope(v: &JsonValue) -> Result<JsonValue, String> {
    let ok = v
        .get("result")
        .and_then(|b| b.as_bool())
        .or_else(|| v.get("ok").and_then(|b| b.as_bool()))
        .unwrap_or(true);
    if !ok {
        let msg = v
            .get("message")
            .and_then(|s| s.as_str())
            .unwrap_or("remote call failed");
        return Err(msg.to_string());
    }
    Ok(v.get("data").cloned().unwrap_or(JsonValue::Null))
}

fn expand_cmdline_env(cmdline: &str) -> String {
    // Expand ${VAR} from the environment.
    let re = Regex::new(r"\$\{([A-Z0-9_]+)\}").unwrap();
    let env_map: HashMap<String, String> = env::vars().collect();
    re.replace_all(cmdline, |caps: &regex::Captures| {
        env_map.get(&caps[1]).cloned().unwrap_or_default()
    })
    .to_string()
}

/// Gateway-backed data service: one command invocation per request with
/// the URL appended as the final argument; stdout must be the envelope.
pub struct CliDataService {
    gateway: String,
}

impl CliDataService {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
        }
    }
}

impl DataService for CliDataService {
    fn fetch(&self, url: &str) -> Result<JsonValue> {
        let expanded = expand_cmdline_env(&self.gateway);
        let mut parts =
            shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse gateway command"))?;
        if parts.is_empty() {
            return Err(anyhow!("Empty gateway command"));
        }
        parts.push(url.to_string());
        let program = &parts[0];
        let args = &parts[1..];
        let output = Command::new(program)
            .args(args)
            .env("FORMWIRE_JSON", "1")
            .output()
            .with_context(|| format!("spawning {expanded}"))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(anyhow!("Gateway failed for {}\n{}", url, err));
        }
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        let v: JsonValue =
            serde_json::from_str(&text).with_context(|| "parsing gateway JSON")?;
        Ok(v)
    }
}

/// Canned envelopes keyed by URL; unknown URLs fail like a dead endpoint.
#[derive(Default)]
pub struct StaticDataService {
    routes: HashMap<String, JsonValue>,
}

impl StaticDataService {
    pub fn route(mut self, url: impl Into<String>, envelope: JsonValue) -> Self {
        self.routes.insert(url.into(), envelope);
        self
    }
}

impl DataService for StaticDataService {
    fn fetch(&self, url: &str) -> Result<JsonValue> {
        self.routes
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no route for {url}"))
    }
}

// URL templates for the module-creation form family. Each one renders
// against the injected context plus current sibling state; `None`
// suppresses the request and clears the field's data.

/// Business id a dependent field should load under: the selected
/// sibling first, then the fixed context business when selection is
/// locked, otherwise nothing.
pub fn effective_biz(dep: Option<&str>, ctx: &RunContext, fields: &Siblings<'_>) -> Option<String> {
    if let Some(name) = dep {
        if let Some(t) = fields.text(name) {
            if !t.is_empty() {
                return Some(t.to_string());
            }
            if !ctx.can_select_biz && !ctx.biz_id.is_empty() {
                return Some(ctx.biz_id.clone());
            }
            return None;
        }
    }
    if ctx.biz_id.is_empty() {
        None
    } else {
        Some(ctx.biz_id.clone())
    }
}

pub fn business_list_template() -> UrlTemplate {
    Arc::new(|ctx, _fields| Some(RemoteQuery::BusinessList.url(ctx)))
}

pub fn topology_template(dep: Option<&str>) -> UrlTemplate {
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields| {
        effective_biz(dep.as_deref(), ctx, &fields)
            .map(|biz| RemoteQuery::Topology { biz }.url(ctx))
    })
}

/// Schema columns: module scope once a business is picked, otherwise
/// the fixed-context set scope.
pub fn attribute_schema_template(dep: Option<&str>) -> UrlTemplate {
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields| {
        if let Some(name) = dep.as_deref() {
            if let Some(t) = fields.text(name) {
                if !t.is_empty() {
                    return Some(
                        RemoteQuery::AttributeSchema {
                            scope: ObjectScope::Module,
                            biz: t.to_string(),
                        }
                        .url(ctx),
                    );
                }
            }
        }
        if !ctx.can_select_biz && !ctx.biz_id.is_empty() {
            return Some(
                RemoteQuery::AttributeSchema {
                    scope: ObjectScope::Set,
                    biz: ctx.biz_id.clone(),
                }
                .url(ctx),
            );
        }
        None
    })
}

pub fn service_category_template(dep: Option<&str>) -> UrlTemplate {
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields| {
        effective_biz(dep.as_deref(), ctx, &fields)
            .map(|biz| RemoteQuery::ServiceCategory { biz, parent: None }.url(ctx))
    })
}

pub fn service_category_expand(dep: Option<&str>) -> ExpandTemplate {
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields, node| {
        effective_biz(dep.as_deref(), ctx, &fields).map(|biz| {
            RemoteQuery::ServiceCategory {
                biz,
                parent: Some(node.to_string()),
            }
            .url(ctx)
        })
    })
}

pub fn service_templates_template(dep: Option<&str>) -> UrlTemplate {
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields| {
        effective_biz(dep.as_deref(), ctx, &fields)
            .map(|biz| RemoteQuery::ServiceTemplates { biz }.url(ctx))
    })
}

/// Render a free-form `{site}` / `{biz}` placeholder template. An
/// unresolved placeholder suppresses the request.
pub fn url_template(pattern: &str, dep: Option<&str>) -> UrlTemplate {
    let pattern = pattern.to_string();
    let dep = dep.map(str::to_string);
    Arc::new(move |ctx, fields| {
        let re = Regex::new(r"\{([a-z_]+)\}").unwrap();
        let mut missing = false;
        let out = re
            .replace_all(&pattern, |caps: &regex::Captures| match &caps[1] {
                "site" => ctx.site_url.clone(),
                "biz" => match effective_biz(dep.as_deref(), ctx, &fields) {
                    Some(b) => b,
                    None => {
                        missing = true;
                        String::new()
                    }
                },
                _ => {
                    missing = true;
                    String::new()
                }
            })
            .to_string();
        if missing {
            None
        } else {
            Some(out)
        }
    })
}
