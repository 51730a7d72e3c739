//! Represents parsed build-file strings with embedded variable references,
//! e.g. `$builddir/clean.csv`, and mechanisms for expanding those into plain
//! strings.

use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "$root/a.csv".
#[derive(Debug, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    /// Expand into a plain string.  Each variable is looked up in the
    /// environments in order and the first hit wins; variables that no
    /// environment defines expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut result = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => result.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    if let Some(val) = envs.iter().find_map(|env| env.get_var(v.as_ref())) {
                        result.push_str(&val);
                    }
                }
            }
        }
        result
    }
}

/// Top-level variable bindings of a build file.  Values are expanded when
/// bound, so later rebinding a variable doesn't affect earlier uses.
#[derive(Debug, Default)]
pub struct Vars<'text>(FxHashMap<&'text str, String>);

impl<'text> Vars<'text> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &'text str, val: String) {
        self.0.insert(key, val);
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl<'text> Env for Vars<'text> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layered_lookup() {
        let mut outer = Vars::new();
        outer.insert("dir", "out".to_owned());
        outer.insert("ext", ".csv".to_owned());
        let mut inner = Vars::new();
        inner.insert("dir", "tmp".to_owned());

        let s = EvalString::new(vec![
            EvalPart::VarRef("dir"),
            EvalPart::Literal("/a"),
            EvalPart::VarRef("ext"),
            EvalPart::VarRef("nope"),
        ]);
        assert_eq!(s.evaluate(&[&outer]), "out/a.csv");
        assert_eq!(s.evaluate(&[&inner, &outer]), "tmp/a.csv");
        assert_eq!(s.evaluate(&[]), "/a");
    }
}
