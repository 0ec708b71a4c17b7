//! Represents parsed manifest strings with embedded variable references,
//! e.g. `c++ $in -o $out`, and mechanisms for expanding those into plain
//! strings.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::smallmap::SmallMap;

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may be expanded against a chain of environments; the
/// first one that knows the variable wins.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
/// This is generic to support EvalString<&str>, which borrows from parser
/// input, and EvalString<String>, which rule bindings are stored as.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    for env in envs {
                        if let Some(v) = env.get_var(v.as_ref()) {
                            val.push_str(&v);
                            break;
                        }
                    }
                }
            }
        }
        val
    }
}

impl EvalString<&str> {
    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// A scope's worth of variable definitions, fully evaluated.
#[derive(Debug, Default)]
pub struct Vars(HashMap<String, String>);

impl Vars {
    pub fn insert(&mut self, key: impl Into<String>, val: String) {
        self.0.insert(key.into(), val);
    }
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}

// Impl for the variables attached to a build statement.
impl Env for SmallMap<&str, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}
