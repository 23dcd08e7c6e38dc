// src/sandbox/interp.rs

//! Evaluator for parsed recipe scripts.
//!
//! Runs under the capability set in [`super::caps`]: external commands
//! succeed without running, filesystem access is jailed to the sandbox
//! root, and stdio is a sink unless a command substitution is capturing.

use crate::error::{Error, Result};
use crate::sandbox::caps::Capabilities;
use crate::sandbox::syntax::{
    AssignValue, ChainOp, Command, Parser, Script, Stmt, VarOp, Word, WordPart,
};
use crate::sandbox::Value;
use glob::{MatchOptions, Pattern};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const MAX_SOURCE_DEPTH: usize = 16;

/// Control flow out of a statement
enum Flow {
    Normal(i32),
    Return(i32),
    Break(u32),
    Continue(u32),
}

/// One expanded field, before pathname expansion
struct Field {
    text: String,
    /// Whether an unquoted part contributed; only such fields glob
    glob: bool,
}

pub struct Interp<'a> {
    caps: &'a Capabilities,
    ctx: &'a CancellationToken,
    file: String,
    vars: HashMap<String, Value>,
    cwd: PathBuf,
    capture: Vec<String>,
    source_depth: usize,
    last_status: i32,
}

impl<'a> Interp<'a> {
    pub fn new(
        caps: &'a Capabilities,
        ctx: &'a CancellationToken,
        file: impl Into<String>,
        vars: HashMap<String, Value>,
    ) -> Self {
        Self {
            caps,
            ctx,
            file: file.into(),
            vars,
            cwd: caps.root().to_path_buf(),
            capture: Vec::new(),
            source_depth: 0,
            last_status: 0,
        }
    }

    pub fn run(&mut self, script: &Script) -> Result<()> {
        self.run_stmts(&script.stmts)?;
        Ok(())
    }

    pub fn into_vars(self) -> HashMap<String, Value> {
        self.vars
    }

    fn run_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        let mut status = self.last_status;
        for stmt in stmts {
            if self.ctx.is_cancelled() {
                return Err(Error::exec(&self.file, "execution canceled"));
            }
            match self.run_stmt(stmt)? {
                Flow::Normal(s) => {
                    status = s;
                    self.last_status = s;
                }
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(status))
    }

    fn run_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Assign { name, value } => {
                let value = match value {
                    AssignValue::Scalar(word) => Value::Scalar(self.expand_scalar(word)?),
                    AssignValue::Array(words) => {
                        let mut elements = Vec::new();
                        for word in words {
                            elements.extend(self.expand_fields_globbed(word)?);
                        }
                        Value::Array(elements)
                    }
                };
                self.vars.insert(name.clone(), value);
                Ok(Flow::Normal(0))
            }
            Stmt::List(list) => {
                let mut status = 0;
                for (op, command) in &list.items {
                    match op {
                        Some(ChainOp::And) if status != 0 => continue,
                        Some(ChainOp::Or) if status == 0 => continue,
                        _ => {}
                    }
                    match self.run_command(command)? {
                        Flow::Normal(s) => status = s,
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(status))
            }
            Stmt::If { arms, else_body } => {
                for arm in arms {
                    match self.run_stmts(&arm.cond)? {
                        Flow::Normal(0) => return self.run_stmts(&arm.body),
                        Flow::Normal(_) => continue,
                        flow => return Ok(flow),
                    }
                }
                self.run_stmts(else_body)
            }
            Stmt::For { var, items, body } => {
                let mut values = Vec::new();
                for word in items {
                    values.extend(self.expand_fields_globbed(word)?);
                }

                let mut status = 0;
                'outer: for value in values {
                    self.vars.insert(var.clone(), Value::Scalar(value));
                    match self.run_stmts(body)? {
                        Flow::Normal(s) => status = s,
                        Flow::Break(n) => {
                            if n > 1 {
                                return Ok(Flow::Break(n - 1));
                            }
                            break 'outer;
                        }
                        Flow::Continue(n) => {
                            if n > 1 {
                                return Ok(Flow::Continue(n - 1));
                            }
                        }
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(status))
            }
            Stmt::While { cond, body } => {
                let mut status = 0;
                loop {
                    match self.run_stmts(cond)? {
                        Flow::Normal(0) => {}
                        Flow::Normal(_) => break,
                        flow => return Ok(flow),
                    }
                    match self.run_stmts(body)? {
                        Flow::Normal(s) => status = s,
                        Flow::Break(n) => {
                            if n > 1 {
                                return Ok(Flow::Break(n - 1));
                            }
                            break;
                        }
                        Flow::Continue(n) => {
                            if n > 1 {
                                return Ok(Flow::Continue(n - 1));
                            }
                        }
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(status))
            }
            // Build-step functions are defined but never called on the
            // metadata path
            Stmt::FuncDef { .. } => Ok(Flow::Normal(0)),
        }
    }

    fn run_command(&mut self, command: &Command) -> Result<Flow> {
        let mut fields = Vec::new();
        for word in &command.words {
            fields.extend(self.expand_fields_globbed(word)?);
        }

        if fields.is_empty() {
            return Ok(Flow::Normal(0));
        }

        let status = match fields[0].as_str() {
            "true" | ":" => 0,
            "false" => 1,
            "echo" => {
                let line = format!("{}\n", fields[1..].join(" "));
                self.write_output(&line);
                0
            }
            "export" => {
                for arg in &fields[1..] {
                    if let Some((name, value)) = arg.split_once('=') {
                        self.vars
                            .insert(name.to_string(), Value::Scalar(value.to_string()));
                    }
                }
                0
            }
            "unset" => {
                for arg in &fields[1..] {
                    self.vars.remove(arg);
                }
                0
            }
            "cd" => self.builtin_cd(&fields)?,
            "source" | "." => self.builtin_source(&fields)?,
            "test" | "[" => self.builtin_test(&fields)?,
            "return" => {
                let code = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                return Ok(Flow::Return(code));
            }
            "break" => {
                let n = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                return Ok(Flow::Break(n.max(1)));
            }
            "continue" => {
                let n = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                return Ok(Flow::Continue(n.max(1)));
            }
            _ => self.caps.exec(&fields),
        };

        let status = if command.negate {
            i32::from(status == 0)
        } else {
            status
        };
        Ok(Flow::Normal(status))
    }

    fn builtin_cd(&mut self, fields: &[String]) -> Result<i32> {
        let target = match fields.get(1) {
            Some(path) => path.as_str(),
            None => return Ok({
                self.cwd = self.caps.root().to_path_buf();
                0
            }),
        };

        match self.caps.change_dir(&self.cwd, target) {
            Ok(dir) => {
                self.cwd = dir;
                Ok(0)
            }
            Err(Error::Io(_)) => Ok(1),
            Err(e) => Err(e),
        }
    }

    fn builtin_source(&mut self, fields: &[String]) -> Result<i32> {
        let path = match fields.get(1) {
            Some(path) => path.clone(),
            None => return Ok(1),
        };

        if self.source_depth >= MAX_SOURCE_DEPTH {
            return Err(Error::exec(&self.file, "source nesting too deep"));
        }

        let mut file = match self.caps.open(&self.cwd, &path) {
            Ok(file) => file,
            Err(Error::Io(_)) => return Ok(1),
            Err(e) => return Err(e),
        };
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let script = Parser::new().parse(&content, &path)?;
        self.source_depth += 1;
        let flow = self.run_stmts(&script.stmts);
        self.source_depth -= 1;

        match flow? {
            Flow::Normal(status) | Flow::Return(status) => Ok(status),
            _ => Ok(0),
        }
    }

    fn builtin_test(&mut self, fields: &[String]) -> Result<i32> {
        let mut args: &[String] = &fields[1..];
        if fields[0] == "[" {
            match args.last() {
                Some(close) if close == "]" => args = &args[..args.len() - 1],
                _ => return Ok(2),
            }
        }

        if let Some(first) = args.first() {
            if first == "!" {
                let inner = self.builtin_test_args(&args[1..])?;
                return Ok(i32::from(inner == 0));
            }
        }
        self.builtin_test_args(args)
    }

    fn builtin_test_args(&mut self, args: &[String]) -> Result<i32> {
        let truth = match args {
            [] => false,
            [s] => !s.is_empty(),
            [op, s] if op == "-z" => s.is_empty(),
            [op, s] if op == "-n" => !s.is_empty(),
            [op, path] if op == "-e" || op == "-f" || op == "-d" => {
                match self.caps.stat(&self.cwd, path) {
                    Ok(meta) => match op.as_str() {
                        "-f" => meta.is_file(),
                        "-d" => meta.is_dir(),
                        _ => true,
                    },
                    Err(Error::Io(_)) => false,
                    Err(e) => return Err(e),
                }
            }
            [a, op, b] if op == "=" || op == "==" => a == b,
            [a, op, b] if op == "!=" => a != b,
            _ => false,
        };
        Ok(i32::from(!truth))
    }

    fn write_output(&mut self, text: &str) {
        if let Some(buffer) = self.capture.last_mut() {
            buffer.push_str(text);
        }
        // Otherwise stdio is a sink
    }

    // ---- expansion ----------------------------------------------------

    /// Expand a word for an assignment right-hand side: no field
    /// splitting, no pathname expansion
    fn expand_scalar(&mut self, word: &Word) -> Result<String> {
        let mut out = String::new();
        for part in &word.parts {
            out.push_str(&self.expand_part_joined(part)?);
        }
        Ok(out)
    }

    /// Expand a word into fields and apply pathname expansion
    fn expand_fields_globbed(&mut self, word: &Word) -> Result<Vec<String>> {
        let fields = self.expand_fields(word)?;
        let mut out = Vec::new();
        for field in fields {
            if field.glob && field.text.chars().any(|c| "*?[".contains(c)) {
                out.extend(self.pathname_expand(&field.text)?);
            } else {
                out.push(field.text);
            }
        }
        Ok(out)
    }

    fn expand_fields(&mut self, word: &Word) -> Result<Vec<Field>> {
        let mut fields: Vec<Field> = Vec::new();
        let mut open = false;

        for part in &word.parts {
            match part {
                WordPart::Literal(text) => {
                    let expanded = text.clone();
                    split_append(&mut fields, &mut open, &expanded, true);
                }
                WordPart::SingleQuoted(text) => {
                    quoted_append(&mut fields, &mut open, text);
                }
                WordPart::DoubleQuoted(parts) => {
                    // A quoted part always produces a field, even empty
                    ensure_open(&mut fields, &mut open);
                    for inner in parts {
                        let expanded = self.expand_part_joined(inner)?;
                        quoted_append(&mut fields, &mut open, &expanded);
                    }
                }
                WordPart::Var { name, op } => {
                    match self.var_lookup(name, op)? {
                        Expanded::Scalar(value) => {
                            split_append(&mut fields, &mut open, &value, false)
                        }
                        Expanded::Array(elements) => {
                            for (i, element) in elements.iter().enumerate() {
                                if i > 0 {
                                    open = false;
                                }
                                split_append(&mut fields, &mut open, element, false);
                            }
                        }
                    }
                }
                WordPart::CmdSubst(script) => {
                    let output = self.run_subst(script)?;
                    split_append(&mut fields, &mut open, &output, false);
                }
            }
        }

        Ok(fields)
    }

    /// Expand a single part to a string (quoted context: no splitting)
    fn expand_part_joined(&mut self, part: &WordPart) -> Result<String> {
        match part {
            WordPart::Literal(text) | WordPart::SingleQuoted(text) => Ok(text.clone()),
            WordPart::DoubleQuoted(parts) => {
                let mut out = String::new();
                for inner in parts {
                    out.push_str(&self.expand_part_joined(inner)?);
                }
                Ok(out)
            }
            WordPart::Var { name, op } => Ok(match self.var_lookup(name, op)? {
                Expanded::Scalar(value) => value,
                Expanded::Array(elements) => elements.join(" "),
            }),
            WordPart::CmdSubst(script) => self.run_subst(script),
        }
    }

    fn var_lookup(&mut self, name: &str, op: &VarOp) -> Result<Expanded> {
        if name == "?" {
            return Ok(Expanded::Scalar(self.last_status.to_string()));
        }

        let current = self.vars.get(name).cloned();

        // Arrays expand element-wise only without an operator
        if let (Some(Value::Array(elements)), VarOp::None) = (&current, op) {
            return Ok(Expanded::Array(elements.clone()));
        }

        let value = match current {
            Some(Value::Scalar(s)) => s,
            Some(Value::Array(elements)) => elements.join(" "),
            None => String::new(),
        };

        let value = match op {
            VarOp::None => value,
            VarOp::Default(word) => {
                if value.is_empty() {
                    self.expand_scalar(word)?
                } else {
                    value
                }
            }
            VarOp::TrimPrefix { pattern, longest } => {
                let pattern = self.expand_scalar(pattern)?;
                trim_prefix(&value, &pattern, *longest)
            }
            VarOp::TrimSuffix { pattern, longest } => {
                let pattern = self.expand_scalar(pattern)?;
                trim_suffix(&value, &pattern, *longest)
            }
        };

        Ok(Expanded::Scalar(value))
    }

    /// Run a command substitution in a subshell-like scope and capture
    /// everything builtins write
    fn run_subst(&mut self, script: &Script) -> Result<String> {
        let saved_vars = self.vars.clone();
        let saved_cwd = self.cwd.clone();

        self.capture.push(String::new());
        let result = self.run_stmts(&script.stmts);
        let output = self.capture.pop().unwrap_or_default();

        self.vars = saved_vars;
        self.cwd = saved_cwd;
        result?;

        Ok(output.trim_end_matches('\n').to_string())
    }

    /// Pathname expansion through the restricted readdir handler.
    /// No match leaves the pattern in place, like the shell default.
    fn pathname_expand(&mut self, pattern: &str) -> Result<Vec<String>> {
        let (base, prefix, components) = if let Some(rest) = pattern.strip_prefix('/') {
            (PathBuf::from("/"), "/".to_string(), rest)
        } else {
            (self.cwd.clone(), String::new(), pattern)
        };
        let components: Vec<&str> = components.split('/').filter(|c| !c.is_empty()).collect();

        let mut matches = Vec::new();
        self.glob_walk(&base, prefix, &components, &mut matches)?;

        if matches.is_empty() {
            Ok(vec![pattern.to_string()])
        } else {
            matches.sort();
            Ok(matches)
        }
    }

    fn glob_walk(
        &mut self,
        dir: &Path,
        prefix: String,
        components: &[&str],
        out: &mut Vec<String>,
    ) -> Result<()> {
        let (component, rest) = match components.split_first() {
            Some(pair) => pair,
            None => return Ok(()),
        };

        let options = MatchOptions {
            require_literal_leading_dot: true,
            require_literal_separator: true,
            ..MatchOptions::new()
        };

        if !component.chars().any(|c| "*?[".contains(c)) {
            // Literal component: descend without listing
            let next = dir.join(component);
            let joined = format!("{prefix}{component}");
            match self.caps.stat(&self.cwd, next.to_string_lossy().as_ref()) {
                Ok(meta) => {
                    if rest.is_empty() {
                        out.push(joined);
                    } else if meta.is_dir() {
                        self.glob_walk(&next, format!("{joined}/"), rest, out)?;
                    }
                }
                Err(Error::Io(_)) => {}
                Err(e) => return Err(e),
            }
            return Ok(());
        }

        let pattern = match Pattern::new(component) {
            Ok(pattern) => pattern,
            Err(_) => return Ok(()),
        };

        let names = match self.caps.read_dir(&self.cwd, dir.to_string_lossy().as_ref()) {
            Ok(names) => names,
            Err(Error::Io(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        for name in names {
            if !pattern.matches_with(&name, options) {
                continue;
            }
            let joined = format!("{prefix}{name}");
            if rest.is_empty() {
                out.push(joined);
            } else {
                let next = dir.join(&name);
                match self.caps.stat(&self.cwd, next.to_string_lossy().as_ref()) {
                    Ok(meta) if meta.is_dir() => {
                        self.glob_walk(&next, format!("{joined}/"), rest, out)?
                    }
                    Ok(_) => {}
                    Err(Error::Io(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }
}

enum Expanded {
    Scalar(String),
    Array(Vec<String>),
}

fn ensure_open(fields: &mut Vec<Field>, open: &mut bool) {
    if !*open {
        fields.push(Field {
            text: String::new(),
            glob: false,
        });
        *open = true;
    }
}

/// Append quoted text: never split, never glob
fn quoted_append(fields: &mut Vec<Field>, open: &mut bool, text: &str) {
    ensure_open(fields, open);
    if let Some(field) = fields.last_mut() {
        field.text.push_str(text);
    }
}

/// Append text subject to field splitting; `glob` marks unquoted literals
fn split_append(fields: &mut Vec<Field>, open: &mut bool, text: &str, glob: bool) {
    for c in text.chars() {
        if c == ' ' || c == '\t' || c == '\n' {
            *open = false;
        } else {
            ensure_open(fields, open);
            if let Some(field) = fields.last_mut() {
                field.text.push(c);
                if glob {
                    field.glob = true;
                }
            }
        }
    }
}

fn trim_prefix(value: &str, pattern: &str, longest: bool) -> String {
    let Ok(pattern) = Pattern::new(pattern) else {
        return value.to_string();
    };

    let indices: Vec<usize> = value
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(value.len()))
        .collect();

    let candidates: Box<dyn Iterator<Item = &usize>> = if longest {
        Box::new(indices.iter().rev())
    } else {
        Box::new(indices.iter())
    };

    for &end in candidates {
        if pattern.matches(&value[..end]) {
            return value[end..].to_string();
        }
    }
    value.to_string()
}

fn trim_suffix(value: &str, pattern: &str, longest: bool) -> String {
    let Ok(pattern) = Pattern::new(pattern) else {
        return value.to_string();
    };

    let indices: Vec<usize> = value
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(value.len()))
        .collect();

    let candidates: Box<dyn Iterator<Item = &usize>> = if longest {
        Box::new(indices.iter())
    } else {
        Box::new(indices.iter().rev())
    };

    for &start in candidates {
        if pattern.matches(&value[start..]) {
            return value[..start].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_suffix_shortest() {
        assert_eq!(trim_suffix("1.2.3", ".*", false), "1.2");
        assert_eq!(trim_suffix("1.2.3", ".*", true), "1");
    }

    #[test]
    fn test_trim_prefix_longest() {
        assert_eq!(trim_prefix("a/b/c", "*/", false), "b/c");
        assert_eq!(trim_prefix("a/b/c", "*/", true), "c");
    }
}
