use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::fields::{ColumnDef, FieldData, FieldId, OptionItem, RemoteInit, TreeNode, TreeStore};
use crate::form::{Effect, Form};
use crate::services::data::{unwrap_envelope, DataService};

pub const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Completion of one remote load, reported back to the owning form.
/// `seq` carries the issuance order so stale results can be dropped.
#[derive(Debug)]
pub struct LoadMsg {
    pub field: FieldId,
    pub into: Option<String>,
    pub seq: u64,
    pub outcome: Result<FieldData, String>,
}

pub fn spawn_load(
    svc: Arc<dyn DataService>,
    url: String,
    init: RemoteInit,
    field: FieldId,
    into: Option<String>,
    seq: u64,
    tx: Sender<LoadMsg>,
) {
    thread::spawn(move || {
        debug!(%url, seq, "remote load");
        let outcome = (|| -> Result<FieldData, String> {
            let v = svc.fetch(&url).map_err(|e| format!("{e:#}"))?;
            let data = unwrap_envelope(&v)?;
            init(&data)
        })();
        let _ = tx.send(LoadMsg {
            field,
            into,
            seq,
            outcome,
        });
    });
}

pub fn perform(effects: Vec<Effect>, svc: &Arc<dyn DataService>, tx: &Sender<LoadMsg>) {
    for eff in effects {
        match eff {
            Effect::Load {
                field,
                into,
                seq,
                url,
                init,
            } => spawn_load(svc.clone(), url, init, field, into, seq, tx.clone()),
        }
    }
}

/// Drive a form until every pending remote load has completed or been
/// superseded. Load completions may themselves produce new effects
/// (cascaded loads), which keep the loop going.
pub fn run_to_idle(form: &mut Form, svc: &Arc<dyn DataService>, effects: Vec<Effect>) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    perform(effects, svc, &tx);
    while form.has_pending_loads() {
        let msg = rx
            .recv_timeout(LOAD_TIMEOUT)
            .context("waiting for remote load")?;
        let next = form.apply(msg);
        perform(next, svc, &tx);
    }
    Ok(())
}

// Remote data init transforms: decode an envelope's `data` into field
// data. Fields override these with composed variants where the raw
// schema needs reshaping.

pub fn get_by_path<'a>(v: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = v;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn scalar(v: &JsonValue) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v.as_i64().map(|n| n.to_string()))
}

fn option_from(item: &JsonValue) -> Option<OptionItem> {
    if let Some(s) = item.as_str() {
        return Some(OptionItem::new(s, s));
    }
    let obj = item.as_object()?;
    let value = obj
        .get("value")
        .or_else(|| obj.get("id"))
        .and_then(scalar)?;
    let label = obj
        .get("label")
        .or_else(|| obj.get("title"))
        .or_else(|| obj.get("name"))
        .and_then(scalar)
        .unwrap_or_else(|| value.clone());
    Some(OptionItem::new(value, label))
}

pub fn decode_options(data: &JsonValue) -> Result<FieldData, String> {
    let arr = data
        .as_array()
        .or_else(|| data.get("items").and_then(|x| x.as_array()))
        .ok_or_else(|| "expected an option list".to_string())?;
    let mut out = Vec::new();
    for item in arr {
        if let Some(o) = option_from(item) {
            out.push(o);
        }
    }
    Ok(FieldData::Options(out))
}

/// Options decoder reading the list at a dotted path into `data`.
pub fn decode_options_at(path: &str) -> RemoteInit {
    let path = path.to_string();
    Arc::new(move |data| {
        let target =
            get_by_path(data, &path).ok_or_else(|| format!("missing '{path}' in response"))?;
        decode_options(target)
    })
}

fn add_node(v: &JsonValue, store: &mut TreeStore) -> Result<String, String> {
    let obj = v.as_object().ok_or("tree node must be an object")?;
    let value = obj
        .get("value")
        .or_else(|| obj.get("id"))
        .and_then(scalar)
        .ok_or("tree node missing value")?;
    let label = obj
        .get("label")
        .or_else(|| obj.get("name"))
        .and_then(scalar)
        .unwrap_or_else(|| value.clone());
    let mut children = Vec::new();
    if let Some(arr) = obj.get("children").and_then(|c| c.as_array()) {
        for c in arr {
            children.push(add_node(c, store)?);
        }
    }
    let leaf = children.is_empty();
    store.nodes.insert(
        value.clone(),
        TreeNode {
            value: value.clone(),
            label,
            leaf,
            children,
        },
    );
    Ok(value)
}

/// Fully materialized tree: nodes without children are leaves.
pub fn decode_tree(data: &JsonValue) -> Result<FieldData, String> {
    let arr = data
        .as_array()
        .ok_or_else(|| "expected a node list".to_string())?;
    let mut store = TreeStore::default();
    for node in arr {
        let value = add_node(node, &mut store)?;
        store.roots.push(value);
    }
    Ok(FieldData::Tree(store))
}

/// One level of a lazily loaded tree. The `leaf` flag marks whether
/// this level is terminal; the response may also say so per node.
pub fn decode_category_nodes(leaf: bool) -> RemoteInit {
    Arc::new(move |data| {
        let arr = data
            .as_array()
            .ok_or_else(|| "expected a category list".to_string())?;
        let mut store = TreeStore::default();
        for item in arr {
            let Some(o) = option_from(item) else { continue };
            let leaf = leaf || item.get("leaf").and_then(|b| b.as_bool()).unwrap_or(false);
            store.roots.push(o.value.clone());
            store.nodes.insert(
                o.value.clone(),
                TreeNode {
                    value: o.value,
                    label: o.label,
                    leaf,
                    children: Vec::new(),
                },
            );
        }
        Ok(FieldData::Tree(store))
    })
}

/// Attribute schema rows become plain input columns.
pub fn decode_columns(data: &JsonValue) -> Result<FieldData, String> {
    let arr = data
        .as_array()
        .ok_or_else(|| "expected a column list".to_string())?;
    let mut cols = Vec::new();
    for c in arr {
        let tag = c
            .get("tag_code")
            .and_then(|s| s.as_str())
            .ok_or_else(|| "column missing tag_code".to_string())?;
        let label = c
            .get("attrs")
            .and_then(|a| a.get("name"))
            .and_then(|s| s.as_str())
            .unwrap_or(tag);
        let mut attrs = serde_json::Map::new();
        attrs.insert("width".into(), JsonValue::String("200px".into()));
        cols.push(ColumnDef {
            tag: tag.to_string(),
            label: label.to_string(),
            kind: "input".into(),
            attrs,
        });
    }
    Ok(FieldData::Columns(cols))
}
