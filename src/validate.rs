use crate::fields::{FieldState, FieldValue, Siblings};

#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome {
    pub ok: bool,
    pub message: String,
}

impl RuleOutcome {
    pub fn pass() -> Self {
        Self {
            ok: true,
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub type Predicate = Box<dyn Fn(&FieldValue, Siblings<'_>) -> RuleOutcome + Send + Sync>;

pub enum Rule {
    Required,
    Custom(Predicate),
}

/// Run a field's rules in declared order, stopping at the first failure.
pub fn run_rules(field: &FieldState, siblings: Siblings<'_>) -> RuleOutcome {
    for rule in &field.rules {
        let out = match rule {
            Rule::Required => {
                if field.value.is_empty() {
                    RuleOutcome::fail("This field is required")
                } else {
                    RuleOutcome::pass()
                }
            }
            Rule::Custom(predicate) => predicate(&field.value, siblings),
        };
        if !out.ok {
            return out;
        }
    }
    RuleOutcome::pass()
}

/// Require a value only while `selector` currently equals `expect`.
/// A missing selector sibling passes.
pub fn required_when(selector: &str, expect: &str, message: &str) -> Rule {
    let selector = selector.to_string();
    let expect = expect.to_string();
    let message = message.to_string();
    Rule::Custom(Box::new(move |value, siblings| {
        match siblings.text(&selector) {
            Some(v) if v == expect && value.is_empty() => RuleOutcome::fail(message.clone()),
            _ => RuleOutcome::pass(),
        }
    }))
}
