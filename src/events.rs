use crate::context::RunContext;
use crate::fields::{FieldId, FieldValue, Siblings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    Change,
}

/// What a binding sees when it fires: the emitting field's current
/// value, read-only sibling lookup, and the session context.
pub struct EventArgs<'a> {
    pub value: &'a FieldValue,
    pub fields: Siblings<'a>,
    pub ctx: &'a RunContext,
}

/// Mutations a binding may request on its target field. The controller
/// applies them before the next binding runs; value-setting ops
/// re-publish `change` synchronously.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    SetValue(FieldValue),
    ClearValue,
    Show,
    Hide,
    ClearData,
    Reload,
    ReplayChange,
}

pub type Action = Box<dyn Fn(&EventArgs<'_>) -> Vec<Op> + Send + Sync>;

pub struct Binding {
    pub source: FieldId,
    pub kind: EventKind,
    pub target: FieldId,
    pub action: Action,
}

/// Routes `init`/`change` events to bindings, in subscription order.
#[derive(Default)]
pub struct Bus {
    bindings: Vec<Binding>,
}

impl Bus {
    pub fn subscribe(&mut self, source: FieldId, kind: EventKind, target: FieldId, action: Action) {
        self.bindings.push(Binding {
            source,
            kind,
            target,
            action,
        });
    }

    pub fn matching(&self, source: FieldId, kind: EventKind) -> Vec<usize> {
        self.bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.source == source && b.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn target(&self, idx: usize) -> FieldId {
        self.bindings[idx].target
    }

    pub fn action(&self, idx: usize) -> &Action {
        &self.bindings[idx].action
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

// Stock binding actions.

/// Show the target while the source equals `expect`, hide it otherwise.
pub fn show_when(expect: &str) -> Action {
    let expect = expect.to_string();
    Box::new(move |args| {
        if args.value.as_text() == Some(expect.as_str()) {
            vec![Op::Show]
        } else {
            vec![Op::Hide]
        }
    })
}

/// Re-publish the target's current value as a `change`, so the init
/// path runs the exact same wiring as a manual change.
pub fn replay_change() -> Action {
    Box::new(|_| vec![Op::ReplayChange])
}

/// Parent-driven cascade: optionally clear the dependent's value, then
/// drop its loaded data and reload from the new parent state. The value
/// is only cleared when the operator may actually switch businesses.
pub fn cascade_reload(clear_value: bool) -> Action {
    Box::new(move |args| {
        let mut ops = Vec::new();
        if clear_value && args.ctx.can_select_biz {
            ops.push(Op::ClearValue);
        }
        ops.push(Op::ClearData);
        ops.push(Op::Reload);
        ops
    })
}

/// On init, fall back to the context's business id when no value is set.
pub fn adopt_context_biz() -> Action {
    Box::new(|args| {
        if args.value.is_empty() && !args.ctx.biz_id.is_empty() {
            vec![Op::SetValue(FieldValue::Text(args.ctx.biz_id.clone()))]
        } else {
            Vec::new()
        }
    })
}

pub fn set_value(value: FieldValue) -> Action {
    Box::new(move |_| vec![Op::SetValue(value.clone())])
}

pub fn clear_value() -> Action {
    Box::new(|_| vec![Op::ClearValue])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldKind, FieldState, Registry};

    fn args<'a>(reg: &'a Registry, value: &'a FieldValue, ctx: &'a RunContext) -> EventArgs<'a> {
        EventArgs {
            value,
            fields: Siblings::new(reg),
            ctx,
        }
    }

    #[test]
    fn matching_preserves_subscription_order() {
        let mut bus = Bus::default();
        let (a, b) = (FieldId(0), FieldId(1));
        bus.subscribe(a, EventKind::Change, b, show_when("x"));
        bus.subscribe(a, EventKind::Init, b, replay_change());
        bus.subscribe(a, EventKind::Change, a, clear_value());
        assert_eq!(bus.matching(a, EventKind::Change), vec![0, 2]);
        assert_eq!(bus.matching(a, EventKind::Init), vec![1]);
        assert!(bus.matching(b, EventKind::Change).is_empty());
    }

    #[test]
    fn show_when_matches_text_value() {
        let reg = Registry::default();
        let ctx = RunContext::default();
        let action = show_when("topo");
        let on = FieldValue::text("topo");
        let off = FieldValue::text("text");
        assert_eq!(action(&args(&reg, &on, &ctx)), vec![Op::Show]);
        assert_eq!(action(&args(&reg, &off, &ctx)), vec![Op::Hide]);
    }

    #[test]
    fn cascade_reload_clears_value_only_when_biz_selectable() {
        let reg = Registry::default();
        let value = FieldValue::text("7");
        let action = cascade_reload(true);
        let selectable = RunContext::new("/", "", true);
        assert_eq!(
            action(&args(&reg, &value, &selectable)),
            vec![Op::ClearValue, Op::ClearData, Op::Reload]
        );
        let fixed = RunContext::new("/", "7", false);
        assert_eq!(
            action(&args(&reg, &value, &fixed)),
            vec![Op::ClearData, Op::Reload]
        );
    }

    #[test]
    fn adopt_context_biz_only_fills_empty_values() {
        let mut reg = Registry::default();
        reg.define(FieldState::new("biz", "Business", FieldKind::Select))
            .unwrap();
        let ctx = RunContext::new("/", "42", false);
        let action = adopt_context_biz();
        let empty = FieldValue::text("");
        assert_eq!(
            action(&args(&reg, &empty, &ctx)),
            vec![Op::SetValue(FieldValue::text("42"))]
        );
        let set = FieldValue::text("7");
        assert!(action(&args(&reg, &set, &ctx)).is_empty());
    }
}
