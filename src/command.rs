//! Commands: one external process invocation with declared inputs, outputs
//! and extra dependencies.
//!
//! Two builders produce a CommandSpec: `External`, wrapping an arbitrary
//! command-line template, and `Script`, running a local script under an
//! interpreter.  Both resolve the command line fully at construction, so a
//! bad template is reported before anything runs.

use crate::canon::canon_path;
use crate::error::{Error, Result};
use crate::pathmodel::derive_name;
use std::time::Duration;

/// Interpreter used for scripts when neither the script nor the build file
/// names one.
pub const DEFAULT_INTERPRETER: &str = "python3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// An arbitrary command line, with `{in}`-style slots.
    External { template: String },
    /// A script file run by an interpreter.
    Script { interpreter: String, script: String },
}

/// An immutable description of one unit of work.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Stable identifier: explicit name, else the outputs, else the cmdline.
    pub id: String,
    pub program: Program,
    /// Arguments after slot substitution.
    pub args: Vec<String>,
    pub inputs: Vec<String>,
    /// Includes the capture_stdout path, if any.
    pub outputs: Vec<String>,
    /// Paths that affect staleness without appearing on the command line.
    pub extra_depends: Vec<String>,
    pub capture_stdout: Option<String>,
    /// The fully substituted shell command line.
    pub cmdline: String,
    pub description: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Input paths that, if changed, invalidate the outputs.
    pub fn dirtying_ins(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs
            .iter()
            .chain(self.extra_depends.iter())
            .map(|s| s.as_str())
    }

    /// The message to display while this command runs.
    pub fn message(&self) -> &str {
        match &self.description {
            Some(desc) if !desc.is_empty() => desc,
            _ => &self.cmdline,
        }
    }
}

/// Conversion of "one or many" arguments into a list, so callers can pass a
/// single path or a collection of them interchangeably.
pub trait IntoList {
    fn into_list(self) -> Vec<String>;
}

impl IntoList for &str {
    fn into_list(self) -> Vec<String> {
        vec![self.to_owned()]
    }
}

impl IntoList for String {
    fn into_list(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoList for &String {
    fn into_list(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<T: IntoList> IntoList for Option<T> {
    fn into_list(self) -> Vec<String> {
        self.map(IntoList::into_list).unwrap_or_default()
    }
}

impl<T: Into<String>> IntoList for Vec<T> {
    fn into_list(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: AsRef<str>> IntoList for &[T] {
    fn into_list(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_owned()).collect()
    }
}

impl<T: Into<String>, const N: usize> IntoList for [T; N] {
    fn into_list(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Fields shared by both builders.
#[derive(Debug, Clone, Default)]
struct Common {
    name: Option<String>,
    args: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    depends: Vec<String>,
    capture_stdout: Option<String>,
    derive: Option<String>,
    description: Option<String>,
    timeout: Option<Duration>,
}

macro_rules! common_setters {
    () => {
        /// Explicit identifier for the command.
        pub fn name(mut self, name: impl Into<String>) -> Self {
            self.common.name = Some(name.into());
            self
        }

        pub fn args(mut self, args: impl IntoList) -> Self {
            self.common.args.extend(args.into_list());
            self
        }

        pub fn inputs(mut self, inputs: impl IntoList) -> Self {
            self.common.inputs.extend(inputs.into_list());
            self
        }

        pub fn outputs(mut self, outputs: impl IntoList) -> Self {
            self.common.outputs.extend(outputs.into_list());
            self
        }

        /// Extra dependencies: affect staleness, not the command line.
        pub fn depends(mut self, depends: impl IntoList) -> Self {
            self.common.depends.extend(depends.into_list());
            self
        }

        /// Redirect stdout into path, which becomes an output.
        pub fn capture_stdout(mut self, path: impl Into<String>) -> Self {
            self.common.capture_stdout = Some(path.into());
            self
        }

        /// Name template (see pathmodel::derive_name) used to compute the
        /// output from the first input when no outputs are given.
        pub fn derive(mut self, template: impl Into<String>) -> Self {
            self.common.derive = Some(template.into());
            self
        }

        pub fn description(mut self, desc: impl Into<String>) -> Self {
            self.common.description = Some(desc.into());
            self
        }

        pub fn timeout(mut self, timeout: Duration) -> Self {
            self.common.timeout = Some(timeout);
            self
        }
    };
}

/// Builder for a command wrapping an arbitrary command-line template.
///
/// The template may refer to `{in}`, `{out}`, `{args}` (space-joined lists),
/// `{inN}` and `{outN}` (0-based positions), and `{infiles}` (same as
/// `{in}`).  Other brace text, like `awk '{print $1}'` or `${HOME}`, is
/// left alone.
#[derive(Debug, Clone)]
pub struct External {
    template: String,
    common: Common,
}

impl External {
    pub fn new(template: impl Into<String>) -> Self {
        External {
            template: template.into(),
            common: Common::default(),
        }
    }

    common_setters!();

    pub fn build(self) -> Result<CommandSpec> {
        let template = self.template;
        let paths = Paths::resolve("external", self.common)?;
        let args = paths.substitute_args()?;
        let mut cmdline = substitute(&template, &paths.slots(Some(args.as_slice())))?;
        paths.finish(Program::External { template }, args, &mut cmdline)
    }
}

/// Builder for a command running a local script:
/// `interpreter script args... inputs...`.
/// The script itself becomes an extra dependency, so editing it reruns the
/// command.
#[derive(Debug, Clone)]
pub struct Script {
    script: String,
    interpreter: Option<String>,
    common: Common,
}

impl Script {
    pub fn new(script: impl Into<String>) -> Self {
        Script {
            script: script.into(),
            interpreter: None,
            common: Common::default(),
        }
    }

    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Set the interpreter only if none was given explicitly.
    pub fn default_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        if self.interpreter.is_none() {
            self.interpreter = Some(interpreter.into());
        }
        self
    }

    common_setters!();

    pub fn build(self) -> Result<CommandSpec> {
        let interpreter = self
            .interpreter
            .unwrap_or_else(|| DEFAULT_INTERPRETER.to_owned());
        let script = canon_path(&self.script);
        let mut paths = Paths::resolve("script", self.common)?;
        if !paths.depends.contains(&script) {
            paths.depends.insert(0, script.clone());
        }
        let args = paths.substitute_args()?;

        let mut words: Vec<&str> = vec![interpreter.as_str(), script.as_str()];
        words.extend(args.iter().map(|s| s.as_str()));
        words.extend(paths.inputs.iter().map(|s| s.as_str()));
        let mut cmdline = words.join(" ");

        paths.finish(
            Program::Script {
                interpreter,
                script,
            },
            args,
            &mut cmdline,
        )
    }
}

/// Canonicalized paths of a command under construction.
struct Paths {
    name: Option<String>,
    raw_args: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    depends: Vec<String>,
    capture_stdout: Option<String>,
    description: Option<String>,
    timeout: Option<Duration>,
}

fn canon_all(paths: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len());
    for p in paths {
        let p = canon_path(p);
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

impl Paths {
    fn resolve(kind: &str, common: Common) -> Result<Self> {
        let inputs = canon_all(common.inputs);
        let mut outputs = canon_all(common.outputs);
        if outputs.is_empty() {
            if let Some(template) = &common.derive {
                let first = inputs.first().ok_or_else(|| Error::MissingField {
                    kind: kind.to_owned(),
                    field: "in (needed by derive)".to_owned(),
                })?;
                let extra = common.name.iter().map(|n| ("name", n.as_str()));
                outputs.push(canon_path(derive_name(first, template, extra)?));
            }
        }
        Ok(Paths {
            name: common.name,
            raw_args: common.args,
            inputs,
            outputs,
            depends: canon_all(common.depends),
            capture_stdout: common.capture_stdout.map(canon_path),
            description: common.description,
            timeout: common.timeout,
        })
    }

    fn slots<'a>(&'a self, args: Option<&'a [String]>) -> Slots<'a> {
        Slots {
            inputs: &self.inputs,
            outputs: &self.outputs,
            args,
        }
    }

    /// Args may themselves refer to input and output slots.
    fn substitute_args(&self) -> Result<Vec<String>> {
        let slots = self.slots(None);
        self.raw_args
            .iter()
            .map(|arg| substitute(arg, &slots))
            .collect()
    }

    fn finish(self, program: Program, args: Vec<String>, cmdline: &mut String) -> Result<CommandSpec> {
        let mut outputs = self.outputs;
        if let Some(capture) = &self.capture_stdout {
            cmdline.push_str(" > ");
            cmdline.push_str(capture);
            if !outputs.contains(capture) {
                outputs.push(capture.clone());
            }
        }

        let id = match self.name {
            Some(name) => name,
            None if !outputs.is_empty() => outputs.join(" "),
            None => cmdline.clone(),
        };

        for path in self.inputs.iter().chain(self.depends.iter()) {
            if outputs.contains(path) {
                return Err(Error::SelfDependency {
                    id,
                    path: path.clone(),
                });
            }
        }

        Ok(CommandSpec {
            id,
            program,
            args,
            inputs: self.inputs,
            outputs,
            extra_depends: self.depends,
            capture_stdout: self.capture_stdout,
            cmdline: std::mem::take(cmdline),
            description: self.description,
            timeout: self.timeout,
        })
    }
}

/// Values available to `{slot}` references.
struct Slots<'a> {
    inputs: &'a [String],
    outputs: &'a [String],
    /// None while substituting the args themselves.
    args: Option<&'a [String]>,
}

impl<'a> Slots<'a> {
    fn lookup(&self, slot: &str) -> Option<String> {
        match slot {
            "in" | "infiles" => return Some(self.inputs.join(" ")),
            "out" => return Some(self.outputs.join(" ")),
            "args" => return self.args.map(|args| args.join(" ")),
            _ => {}
        }
        let (list, index) = if let Some(n) = slot.strip_prefix("out") {
            (self.outputs, n)
        } else if let Some(n) = slot.strip_prefix("in") {
            (self.inputs, n)
        } else {
            return None;
        };
        if index.is_empty() || !index.bytes().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let index: usize = index.parse().ok()?;
        list.get(index).cloned()
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Expand `{slot}` references in template.
fn substitute(template: &str, slots: &Slots) -> Result<String> {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut literal_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' || (i > 0 && bytes[i - 1] == b'$') {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        if end < bytes.len() && is_ident_start(bytes[end]) {
            end += 1;
            while end < bytes.len() && is_ident_char(bytes[end]) {
                end += 1;
            }
        }
        if end == start || end >= bytes.len() || bytes[end] != b'}' {
            // Not a slot, e.g. "{print $1}".
            i += 1;
            continue;
        }
        let slot = &template[start..end];
        let value = slots
            .lookup(slot)
            .ok_or_else(|| Error::UnresolvedSubstitution {
                slot: format!("{{{}}}", slot),
                template: template.to_owned(),
            })?;
        out.push_str(&template[literal_start..i]);
        out.push_str(&value);
        i = end + 1;
        literal_start = i;
    }
    out.push_str(&template[literal_start..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_slots() {
        let spec = External::new("sort {args} {in0} -o {out0} # {in}")
            .args(["-r", "-n"])
            .inputs(vec!["a.txt", "./b.txt"])
            .outputs("sorted.txt")
            .build()
            .unwrap();
        assert_eq!(spec.cmdline, "sort -r -n a.txt -o sorted.txt # a.txt b.txt");
        assert_eq!(spec.inputs, vec!["a.txt", "b.txt"]);
        assert_eq!(spec.id, "sorted.txt");
        assert!(spec.extra_depends.is_empty());
    }

    #[test]
    fn external_literal_braces() {
        let spec = External::new("awk '{print $1}' {in} > ${HOME}/{out}")
            .inputs("x")
            .outputs("y")
            .build()
            .unwrap();
        assert_eq!(spec.cmdline, "awk '{print $1}' x > ${HOME}/y");
    }

    #[test]
    fn unresolved_slot() {
        let err = External::new("cat {in1}").inputs("only").build().unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedSubstitution {
                slot: "{in1}".to_owned(),
                template: "cat {in1}".to_owned(),
            }
        );
        assert!(matches!(
            External::new("cat {bogus}").build(),
            Err(Error::UnresolvedSubstitution { .. })
        ));
        // Args can't refer to themselves.
        assert!(matches!(
            External::new("echo {args}").args("{args}").build(),
            Err(Error::UnresolvedSubstitution { .. })
        ));
    }

    #[test]
    fn script_form() {
        let spec = Script::new("./scripts/clean.py")
            .args("--strict")
            .inputs("data/raw.csv")
            .outputs("data/clean.csv")
            .depends("lib/util.py")
            .build()
            .unwrap();
        assert_eq!(spec.cmdline, "python3 scripts/clean.py --strict data/raw.csv");
        assert_eq!(spec.extra_depends, vec!["scripts/clean.py", "lib/util.py"]);
        assert_eq!(
            spec.program,
            Program::Script {
                interpreter: "python3".to_owned(),
                script: "scripts/clean.py".to_owned()
            }
        );
        let dirtying: Vec<_> = spec.dirtying_ins().collect();
        assert_eq!(dirtying, vec!["data/raw.csv", "scripts/clean.py", "lib/util.py"]);
    }

    #[test]
    fn script_interpreter_defaults() {
        let spec = Script::new("s.sh")
            .interpreter("sh")
            .default_interpreter("perl")
            .build()
            .unwrap();
        assert_eq!(spec.cmdline, "sh s.sh");
        let spec = Script::new("s.pl").default_interpreter("perl").build().unwrap();
        assert_eq!(spec.cmdline, "perl s.pl");
    }

    #[test]
    fn capture_stdout_adds_output() {
        let spec = Script::new("count.py")
            .inputs("a.csv")
            .capture_stdout("counts.txt")
            .build()
            .unwrap();
        assert_eq!(spec.cmdline, "python3 count.py a.csv > counts.txt");
        assert_eq!(spec.outputs, vec!["counts.txt"]);
        assert_eq!(spec.capture_stdout.as_deref(), Some("counts.txt"));
    }

    #[test]
    fn self_dependency() {
        let err = External::new("touch {out}")
            .inputs("a")
            .outputs("./a")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::SelfDependency { ref path, .. } if path == "a"));
    }

    #[test]
    fn derived_output() {
        let spec = External::new("clean {in} > {out}")
            .inputs("data/raw.csv")
            .derive("{dir}{stem}-clean{ext}")
            .build()
            .unwrap();
        assert_eq!(spec.outputs, vec!["data/raw-clean.csv"]);
        assert_eq!(spec.cmdline, "clean data/raw.csv > data/raw-clean.csv");

        assert!(matches!(
            External::new("x").derive("{stem}").build(),
            Err(Error::MissingField { .. })
        ));
    }

    #[test]
    fn ids() {
        let spec = External::new("echo hi").build().unwrap();
        assert_eq!(spec.id, "echo hi");
        assert!(spec.outputs.is_empty());
        let spec = External::new("x").outputs(["b", "a"]).build().unwrap();
        assert_eq!(spec.id, "b a");
        let spec = External::new("x").name("named").outputs("a").build().unwrap();
        assert_eq!(spec.id, "named");
        assert_eq!(spec.message(), "x");
        let spec = External::new("x").description("doing x").build().unwrap();
        assert_eq!(spec.message(), "doing x");
    }

    #[test]
    fn normalization() {
        let none: Option<&str> = None;
        assert!(none.into_list().is_empty());
        assert_eq!(Some("a").into_list(), vec!["a"]);
        assert_eq!("a".into_list(), vec!["a"]);
        let slice: &[&str] = &["a", "b"];
        assert_eq!(slice.into_list(), vec!["a", "b"]);
        assert_eq!(vec![String::from("c")].into_list(), vec!["c"]);
    }
}
