//! The table of command kinds a build file may declare.
//!
//! A registry is owned by whoever loads build files; `Registry::default()`
//! knows the built-in `script` and `external` kinds, and callers can
//! register their own constructors on top.

use crate::command::{CommandSpec, External, Script, DEFAULT_INTERPRETER};
use crate::error::{Error, Result};
use crate::parse::Decl;
use crate::smallmap::SmallMap;
use std::time::Duration;

/// Build-file settings that constructors may consult.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Interpreter for scripts that don't name one.
    pub interpreter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            interpreter: DEFAULT_INTERPRETER.to_owned(),
        }
    }
}

pub type Constructor = fn(&Decl, &Settings) -> Result<CommandSpec>;

pub struct Kind {
    pub description: &'static str,
    pub construct: Constructor,
}

pub struct Registry {
    kinds: SmallMap<String, Kind>,
}

impl Registry {
    /// A registry without any kinds.
    pub fn empty() -> Self {
        Registry {
            kinds: SmallMap::new(),
        }
    }

    /// Register a kind, replacing any existing kind of the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: &'static str,
        construct: Constructor,
    ) {
        self.kinds.insert(
            name.into(),
            Kind {
                description,
                construct,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Kind> {
        self.kinds.get(name)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&str, &Kind)> {
        self.kinds.iter().map(|(name, kind)| (name.as_str(), kind))
    }

    /// Turn a declaration into a command.
    pub fn construct(&self, decl: &Decl, settings: &Settings) -> Result<CommandSpec> {
        let kind = self
            .get(decl.kind)
            .ok_or_else(|| Error::UnknownKind(decl.kind.to_owned()))?;
        (kind.construct)(decl, settings)
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Registry::empty();
        registry.register(
            "script",
            "run a local script under an interpreter",
            construct_script,
        );
        registry.register(
            "external",
            "run a command-line template",
            construct_external,
        );
        registry
    }
}

/// Keys understood by every kind.
const COMMON_KEYS: &[&str] = &[
    "name",
    "in",
    "out",
    "depends",
    "args",
    "stdout",
    "derive",
    "description",
    "timeout",
];

fn check_keys(decl: &Decl, extra: &[&str]) -> Result<()> {
    for (key, _) in decl.vars.iter() {
        if !COMMON_KEYS.contains(key) && !extra.contains(key) {
            return Err(Error::InvalidValue {
                field: format!("{} key", decl.kind),
                value: (*key).to_owned(),
            });
        }
    }
    Ok(())
}

fn list(decl: &Decl, key: &str) -> Vec<String> {
    decl.vars
        .get(key)
        .map(|val| val.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Parse a timeout given in (possibly fractional) seconds.
fn parse_timeout(val: &str) -> Result<Duration> {
    match val.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(Error::InvalidValue {
            field: "timeout".to_owned(),
            value: val.to_owned(),
        }),
    }
}

/// Apply the keys shared by all kinds to a builder.
macro_rules! with_common {
    ($builder:expr, $decl:expr) => {{
        let decl: &Decl = $decl;
        let mut b = $builder
            .inputs(list(decl, "in"))
            .outputs(list(decl, "out"))
            .depends(list(decl, "depends"))
            .args(list(decl, "args"));
        if let Some(name) = decl.vars.get("name") {
            b = b.name(name);
        }
        if let Some(path) = decl.vars.get("stdout") {
            b = b.capture_stdout(path);
        }
        if let Some(template) = decl.vars.get("derive") {
            b = b.derive(template);
        }
        if let Some(desc) = decl.vars.get("description") {
            b = b.description(desc);
        }
        if let Some(timeout) = decl.vars.get("timeout") {
            b = b.timeout(parse_timeout(timeout)?);
        }
        b
    }};
}

fn construct_script(decl: &Decl, settings: &Settings) -> Result<CommandSpec> {
    check_keys(decl, &["interpreter"])?;
    if decl.subject.is_empty() {
        return Err(Error::MissingField {
            kind: decl.kind.to_owned(),
            field: "script path".to_owned(),
        });
    }
    let mut script = Script::new(decl.subject.as_str());
    if let Some(interpreter) = decl.vars.get("interpreter") {
        script = script.interpreter(interpreter);
    }
    let script = script.default_interpreter(settings.interpreter.as_str());
    with_common!(script, decl).build()
}

fn construct_external(decl: &Decl, _settings: &Settings) -> Result<CommandSpec> {
    check_keys(decl, &["command"])?;
    let template = match (decl.subject.as_str(), decl.vars.get("command")) {
        ("", Some(command)) => command.as_str(),
        ("", None) => {
            return Err(Error::MissingField {
                kind: decl.kind.to_owned(),
                field: "command".to_owned(),
            })
        }
        (subject, None) => subject,
        (_, Some(command)) => {
            return Err(Error::InvalidValue {
                field: "command (already given on the declaration line)".to_owned(),
                value: command.clone(),
            })
        }
    };
    with_common!(External::new(template), decl).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Program;

    fn decl<'a>(kind: &'a str, subject: &str, vars: &[(&'a str, &str)]) -> Decl<'a> {
        let mut map = SmallMap::new();
        for &(k, v) in vars {
            map.insert(k, v.to_owned());
        }
        Decl {
            kind,
            subject: subject.to_owned(),
            line: 1,
            vars: map,
        }
    }

    #[test]
    fn script_kind() -> Result<()> {
        let registry = Registry::default();
        let settings = Settings {
            interpreter: "python3.11".to_owned(),
        };
        let spec = registry.construct(
            &decl(
                "script",
                "scripts/clean.py",
                &[
                    ("in", "raw.csv"),
                    ("derive", "{stem}-clean{ext}"),
                    ("depends", "lib/util.py"),
                    ("args", "--strict"),
                    ("timeout", "1.5"),
                ],
            ),
            &settings,
        )?;
        assert_eq!(
            spec.program,
            Program::Script {
                interpreter: "python3.11".to_owned(),
                script: "scripts/clean.py".to_owned(),
            }
        );
        assert_eq!(spec.outputs, vec!["raw-clean.csv"]);
        assert_eq!(spec.cmdline, "python3.11 scripts/clean.py --strict raw.csv");
        assert_eq!(spec.extra_depends, vec!["scripts/clean.py", "lib/util.py"]);
        assert_eq!(spec.timeout, Some(Duration::from_millis(1500)));

        let spec = registry.construct(
            &decl("script", "a.py", &[("interpreter", "Rscript")]),
            &settings,
        )?;
        assert_eq!(spec.cmdline, "Rscript a.py");
        Ok(())
    }

    #[test]
    fn external_kind() -> Result<()> {
        let registry = Registry::default();
        let settings = Settings::default();
        let vars = [("in", "a.txt"), ("stdout", "sorted.txt")];
        let spec = registry.construct(&decl("external", "sort {in0}", &vars), &settings)?;
        assert_eq!(spec.cmdline, "sort a.txt > sorted.txt");
        assert_eq!(spec.outputs, vec!["sorted.txt"]);

        let vars = [("command", "sort {in0}"), ("in", "a.txt")];
        let via_key = registry.construct(&decl("external", "", &vars), &settings)?;
        assert_eq!(via_key.cmdline, "sort a.txt");
        Ok(())
    }

    #[test]
    fn construction_errors() {
        let registry = Registry::default();
        let settings = Settings::default();
        let construct = |d: Decl| registry.construct(&d, &settings).unwrap_err();

        assert_eq!(
            construct(decl("make", "x", &[])),
            Error::UnknownKind("make".to_owned())
        );
        assert!(matches!(
            construct(decl("external", "", &[])),
            Error::MissingField { .. }
        ));
        assert!(matches!(
            construct(decl("script", "", &[])),
            Error::MissingField { .. }
        ));
        assert!(matches!(
            construct(decl("external", "true", &[("inputs", "a")])),
            Error::InvalidValue { .. }
        ));
        assert!(matches!(
            construct(decl("external", "true", &[("command", "false")])),
            Error::InvalidValue { .. }
        ));
        assert_eq!(
            construct(decl("external", "true", &[("timeout", "soon")])),
            Error::InvalidValue {
                field: "timeout".to_owned(),
                value: "soon".to_owned(),
            }
        );
        assert!(matches!(
            construct(decl("external", "cat {in3}", &[("in", "a")])),
            Error::UnresolvedSubstitution { .. }
        ));
    }

    #[test]
    fn custom_kind() -> Result<()> {
        fn construct_touch(decl: &Decl, _: &Settings) -> Result<CommandSpec> {
            External::new("touch {out}")
                .outputs(decl.subject.as_str())
                .build()
        }
        let mut registry = Registry::default();
        registry.register("touch", "create an empty file", construct_touch);
        let names: Vec<&str> = registry.kinds().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["script", "external", "touch"]);

        let spec = registry.construct(&decl("touch", "stamp", &[]), &Settings::default())?;
        assert_eq!(spec.cmdline, "touch stamp");
        assert_eq!(spec.id, "stamp");
        Ok(())
    }
}
