use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::error::{BuildError, EngineError};
use crate::events::{Action, Bus, EventArgs, EventKind, Op};
use crate::fields::{FieldData, FieldId, FieldState, FieldValue, Registry, RemoteInit, Siblings};
use crate::services::loader::LoadMsg;
use crate::validate::{run_rules, RuleOutcome};

/// Work the controller cannot do synchronously; the caller hands these
/// to the loader (or a test applies `LoadMsg`s by hand).
pub enum Effect {
    Load {
        field: FieldId,
        into: Option<String>,
        seq: u64,
        url: String,
        init: RemoteInit,
    },
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Load {
                field,
                into,
                seq,
                url,
                ..
            } => f
                .debug_struct("Load")
                .field("field", field)
                .field("into", into)
                .field("seq", seq)
                .field("url", url)
                .finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient user-visible message; load failures land here instead of
/// propagating.
#[derive(Clone, Debug)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub ok: bool,
    pub failures: Vec<(String, String)>,
    pub payload: Option<JsonValue>,
}

/// Stages fields and bindings by name, resolving everything to typed
/// ids when the form is built. Construction fails fast on duplicate or
/// unknown field references.
pub struct FormBuilder {
    ctx: RunContext,
    fields: Vec<FieldState>,
    bindings: Vec<(String, EventKind, String, Action)>,
}

impl FormBuilder {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            fields: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldState) -> Self {
        self.fields.push(field);
        self
    }

    pub fn on(mut self, source: &str, kind: EventKind, target: &str, action: Action) -> Self {
        self.bindings
            .push((source.to_string(), kind, target.to_string(), action));
        self
    }

    pub fn build(self) -> Result<Form, BuildError> {
        let mut registry = Registry::default();
        for field in self.fields {
            registry.define(field)?;
        }
        let mut bus = Bus::default();
        for (source, kind, target, action) in self.bindings {
            let s = registry
                .resolve(&source)
                .ok_or_else(|| BuildError::UnknownField {
                    source: source.clone(),
                    target: target.clone(),
                })?;
            let t = registry
                .resolve(&target)
                .ok_or_else(|| BuildError::UnknownField {
                    source: target.clone(),
                    target: target.clone(),
                })?;
            bus.subscribe(s, kind, t, action);
        }
        Ok(Form {
            ctx: self.ctx,
            registry,
            bus,
            next_seq: 0,
            pending: HashMap::new(),
            notices: Vec::new(),
        })
    }
}

/// Owns the field graph. All mutation goes through here so dependent
/// events fire; remote loads are the only asynchronous edges.
pub struct Form {
    ctx: RunContext,
    registry: Registry,
    bus: Bus,
    next_seq: u64,
    pending: HashMap<(FieldId, Option<String>), u64>,
    notices: Vec<Notice>,
}

// Hand-written because `Bus` holds boxed `Action` closures that are not
// `Debug`; tests only need `Form: Debug` so `Result::unwrap_err` can
// format the unreached `Ok` value on panic.
impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form").finish_non_exhaustive()
    }
}

type Visited = HashSet<(FieldId, EventKind)>;

impl Form {
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn field(&self, name: &str) -> Result<&FieldState, EngineError> {
        self.registry
            .resolve(name)
            .map(|id| self.registry.field(id))
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldState> {
        self.registry.iter().map(|(_, f)| f)
    }

    pub fn has_pending_loads(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Fire the construction-time cycle: issue every remote field's
    /// initial load, then publish `init` per field in declaration
    /// order. Init handlers replay selector defaults through the same
    /// wiring a manual change uses.
    pub fn init(&mut self) -> Result<Vec<Effect>, EngineError> {
        let mut effects = Vec::new();
        for id in self.registry.ids() {
            self.issue_load(id, &mut effects);
        }
        for id in self.registry.ids() {
            let mut visited = Visited::new();
            self.publish(id, EventKind::Init, &mut visited, &mut effects)?;
        }
        Ok(effects)
    }

    pub fn set_value(&mut self, name: &str, value: FieldValue) -> Result<Vec<Effect>, EngineError> {
        let id = self
            .registry
            .resolve(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let mut effects = Vec::new();
        let mut visited = Visited::new();
        self.set_value_id(id, value, &mut visited, &mut effects)?;
        Ok(effects)
    }

    fn set_value_id(
        &mut self,
        id: FieldId,
        value: FieldValue,
        visited: &mut Visited,
        effects: &mut Vec<Effect>,
    ) -> Result<(), EngineError> {
        self.registry.set_value(id, value);
        self.publish(id, EventKind::Change, visited, effects)
    }

    fn publish(
        &mut self,
        source: FieldId,
        kind: EventKind,
        visited: &mut Visited,
        effects: &mut Vec<Effect>,
    ) -> Result<(), EngineError> {
        if !visited.insert((source, kind)) {
            return Err(EngineError::CyclicEvent {
                field: self.registry.name_of(source).to_string(),
            });
        }
        debug!(field = self.registry.name_of(source), ?kind, "publish");
        for i in self.bus.matching(source, kind) {
            let target = self.bus.target(i);
            let ops = {
                let args = EventArgs {
                    value: &self.registry.field(source).value,
                    fields: Siblings::new(&self.registry),
                    ctx: &self.ctx,
                };
                (self.bus.action(i))(&args)
            };
            self.apply_ops(target, ops, visited, effects)?;
        }
        Ok(())
    }

    fn apply_ops(
        &mut self,
        target: FieldId,
        ops: Vec<Op>,
        visited: &mut Visited,
        effects: &mut Vec<Effect>,
    ) -> Result<(), EngineError> {
        for op in ops {
            match op {
                Op::SetValue(v) => self.set_value_id(target, v, visited, effects)?,
                Op::ClearValue => {
                    let cleared = self.registry.field(target).value.cleared();
                    self.set_value_id(target, cleared, visited, effects)?;
                }
                Op::Show => self.registry.field_mut(target).visible = true,
                Op::Hide => self.registry.field_mut(target).visible = false,
                Op::ClearData => {
                    self.pending.retain(|(f, _), _| *f != target);
                    self.registry.field_mut(target).data = FieldData::Empty;
                }
                Op::Reload => self.issue_load(target, effects),
                Op::ReplayChange => self.publish(target, EventKind::Change, visited, effects)?,
            }
        }
        Ok(())
    }

    /// Re-render the field's URL template. An empty render clears the
    /// field's data without issuing a request; otherwise a new load is
    /// issued and supersedes anything still in flight.
    fn issue_load(&mut self, id: FieldId, effects: &mut Vec<Effect>) {
        let rendered = {
            let f = self.registry.field(id);
            match &f.remote {
                None => return,
                Some(r) => (
                    (r.template)(&self.ctx, Siblings::new(&self.registry)),
                    r.init.clone(),
                ),
            }
        };
        let (url, init) = rendered;
        match url.filter(|u| !u.is_empty()) {
            None => {
                self.pending.retain(|(f, _), _| *f != id);
                let f = self.registry.field_mut(id);
                f.data = FieldData::Empty;
                debug!(field = f.name.as_str(), "empty remote url, data cleared");
            }
            Some(url) => {
                self.next_seq += 1;
                let seq = self.next_seq;
                self.pending.insert((id, None), seq);
                effects.push(Effect::Load {
                    field: id,
                    into: None,
                    seq,
                    url,
                    init,
                });
            }
        }
    }

    /// Lazy tree expansion: one request per expansion step, spliced in
    /// under the expanded node. Expanding a leaf is a no-op.
    pub fn expand_tree(&mut self, name: &str, node: &str) -> Result<Vec<Effect>, EngineError> {
        let id = self
            .registry
            .resolve(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let rendered = {
            let f = self.registry.field(id);
            let Some(remote) = &f.remote else {
                return Ok(Vec::new());
            };
            let Some(expand) = &remote.expand else {
                return Ok(Vec::new());
            };
            let FieldData::Tree(store) = &f.data else {
                return Err(EngineError::UnknownNode {
                    field: name.to_string(),
                    node: node.to_string(),
                });
            };
            let Some(n) = store.get(node) else {
                return Err(EngineError::UnknownNode {
                    field: name.to_string(),
                    node: node.to_string(),
                });
            };
            if n.leaf {
                return Ok(Vec::new());
            }
            (
                (expand.template)(&self.ctx, Siblings::new(&self.registry), node),
                expand.init.clone(),
            )
        };
        let (url, init) = rendered;
        let mut effects = Vec::new();
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.next_seq += 1;
            let seq = self.next_seq;
            self.pending.insert((id, Some(node.to_string())), seq);
            effects.push(Effect::Load {
                field: id,
                into: Some(node.to_string()),
                seq,
                url,
                init,
            });
        }
        Ok(effects)
    }

    /// Apply one load completion. Results that were superseded by a
    /// newer request for the same field are dropped regardless of
    /// arrival order; failures become notices and leave the field
    /// usable with cleared data.
    pub fn apply(&mut self, msg: LoadMsg) -> Vec<Effect> {
        let mut effects = Vec::new();
        let key = (msg.field, msg.into.clone());
        if self.pending.get(&key).copied() != Some(msg.seq) {
            warn!(
                field = self.registry.name_of(msg.field),
                seq = msg.seq,
                "dropping superseded load result"
            );
            return effects;
        }
        self.pending.remove(&key);
        let name = self.registry.name_of(msg.field).to_string();
        match msg.outcome {
            Ok(data) => match msg.into {
                Some(parent) => {
                    let f = self.registry.field_mut(msg.field);
                    f.load_error = None;
                    if let (FieldData::Tree(store), FieldData::Tree(children)) =
                        (&mut f.data, data)
                    {
                        if !store.insert_children(&parent, children) {
                            warn!(
                                field = name.as_str(),
                                node = parent.as_str(),
                                "expansion target vanished"
                            );
                        }
                    } else {
                        warn!(field = name.as_str(), "tree expansion on a non-tree field");
                    }
                }
                None => {
                    let adopt = {
                        let f = self.registry.field_mut(msg.field);
                        f.data = data;
                        f.load_error = None;
                        match (&f.remote, &f.data) {
                            (Some(r), FieldData::Options(opts)) if r.adopt_first => {
                                opts.first().map(|o| o.value.clone())
                            }
                            _ => None,
                        }
                    };
                    if let Some(first) = adopt {
                        let mut visited = Visited::new();
                        if let Err(e) = self.set_value_id(
                            msg.field,
                            FieldValue::Text(first),
                            &mut visited,
                            &mut effects,
                        ) {
                            warn!(error = %e, "adopting first option failed");
                        }
                    }
                }
            },
            Err(e) => {
                {
                    let f = self.registry.field_mut(msg.field);
                    f.data = FieldData::Empty;
                    f.load_error = Some(e.clone());
                }
                warn!(field = name.as_str(), error = e.as_str(), "remote load failed");
                self.notices.push(Notice {
                    level: NoticeLevel::Error,
                    text: format!("failed to load data for '{name}': {e}"),
                });
            }
        }
        effects
    }

    pub fn validate(&self, name: &str) -> Result<RuleOutcome, EngineError> {
        let id = self
            .registry
            .resolve(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        Ok(run_rules(
            self.registry.field(id),
            Siblings::new(&self.registry),
        ))
    }

    /// Validate every currently visible field; hidden fields are
    /// exempt. Submission proceeds only when everything passes.
    pub fn submit(&mut self) -> SubmitOutcome {
        let mut results: Vec<(FieldId, RuleOutcome)> = Vec::new();
        for (id, f) in self.registry.iter() {
            if !f.visible {
                continue;
            }
            results.push((id, run_rules(f, Siblings::new(&self.registry))));
        }
        let mut failures: Vec<(String, String)> = Vec::new();
        for (id, out) in results {
            let name = self.registry.name_of(id).to_string();
            let f = self.registry.field_mut(id);
            if out.ok {
                f.error = None;
            } else {
                f.error = Some(out.message.clone());
                failures.push((name, out.message));
            }
        }
        if failures.is_empty() {
            SubmitOutcome {
                ok: true,
                failures,
                payload: Some(self.payload()),
            }
        } else {
            SubmitOutcome {
                ok: false,
                failures,
                payload: None,
            }
        }
    }

    fn payload(&self) -> JsonValue {
        let mut values = serde_json::Map::new();
        let mut hooked: Vec<JsonValue> = Vec::new();
        for (_, f) in self.registry.iter() {
            if !f.visible {
                continue;
            }
            values.insert(f.name.clone(), f.value.to_json());
            if f.hookable {
                hooked.push(JsonValue::String(f.name.clone()));
            }
        }
        json!({ "values": values, "hookable": hooked })
    }

    pub fn snapshot(&self) -> JsonValue {
        let fields: Vec<JsonValue> = self
            .registry
            .iter()
            .map(|(_, f)| {
                json!({
                    "id": f.name,
                    "label": f.label,
                    "value": f.value.to_json(),
                    "visible": f.visible,
                    "disabled": f.disabled,
                    "dirty": f.dirty,
                    "error": f.error,
                    "load_error": f.load_error,
                    "data": serde_json::to_value(&f.data).unwrap_or(JsonValue::Null),
                })
            })
            .collect();
        json!({ "fields": fields })
    }
}
