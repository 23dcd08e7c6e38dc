// src/sandbox/mod.rs

//! Sandboxed recipe evaluation.
//!
//! A recipe is executed with capabilities restricted to its repository
//! root: filesystem handlers refuse resolved paths outside the root,
//! external commands are no-ops that report success, and stdio is a
//! sink. What comes out is the final set of shell variable bindings.

mod caps;
mod interp;
mod syntax;

pub use caps::Capabilities;
pub use syntax::{Parser, Script};

use crate::error::Result;
use interp::Interp;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// A shell variable binding: either a scalar or an ordered array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    Array(Vec<String>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Value::Scalar(_) => None,
            Value::Array(elements) => Some(elements),
        }
    }
}

/// Variable bindings left behind by a recipe run
#[derive(Debug, Default)]
pub struct Bindings(HashMap<String, Value>);

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// A single-use-at-a-time recipe sandbox rooted at a repository directory.
///
/// State is reset on every [`Sandbox::evaluate`] call: bindings start from
/// the host environment plus `scriptdir`, and the working directory starts
/// at the root.
pub struct Sandbox {
    caps: Capabilities,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            caps: Capabilities::new(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.caps.root()
    }

    /// Parse and run a recipe, returning its final bindings.
    ///
    /// `recipe_path` is the recipe's location, absolute or relative to the
    /// root; it determines the `scriptdir` binding. `source` is the recipe
    /// text (which may come from a git blob rather than the filesystem).
    pub fn evaluate(
        &mut self,
        ctx: &CancellationToken,
        parser: &Parser,
        recipe_path: &Path,
        source: &str,
    ) -> Result<Bindings> {
        let file = recipe_path.to_string_lossy().into_owned();
        let script = parser.parse(source, &file)?;

        let mut interp = Interp::new(&self.caps, ctx, file.as_str(), self.initial_vars(recipe_path));
        interp.run(&script)?;

        Ok(Bindings(interp.into_vars()))
    }

    /// Host environment plus `scriptdir`
    fn initial_vars(&self, recipe_path: &Path) -> HashMap<String, Value> {
        let mut vars: HashMap<String, Value> = std::env::vars()
            .map(|(name, value)| (name, Value::Scalar(value)))
            .collect();

        let absolute = if recipe_path.is_absolute() {
            recipe_path.to_path_buf()
        } else {
            self.caps.root().join(recipe_path)
        };
        let scriptdir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.caps.root().to_path_buf());

        vars.insert(
            "scriptdir".to_string(),
            Value::Scalar(scriptdir.to_string_lossy().into_owned()),
        );
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(root: &Path, recipe: &str) -> Result<Bindings> {
        let ctx = CancellationToken::new();
        let parser = Parser::new();
        let mut sandbox = Sandbox::new(root)?;
        sandbox.evaluate(&ctx, &parser, Path::new("pkg/lure.sh"), recipe)
    }

    #[test]
    fn test_scalar_and_array_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(
            dir.path(),
            "name=foo\nversion=1.0\nrelease=1\narchitectures=(amd64 arm64)\n",
        )
        .unwrap();

        assert_eq!(bindings.get("name").unwrap().as_scalar(), Some("foo"));
        assert_eq!(
            bindings.get("architectures").unwrap().as_array(),
            Some(&["amd64".to_string(), "arm64".to_string()][..])
        );
    }

    #[test]
    fn test_expansion_between_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(dir.path(), "base=1.2\nversion=\"$base.3\"\n").unwrap();
        assert_eq!(bindings.get("version").unwrap().as_scalar(), Some("1.2.3"));
    }

    #[test]
    fn test_external_commands_succeed_silently() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(
            dir.path(),
            "curl -o /etc/passwd https://example.com\nname=safe\n",
        )
        .unwrap();
        assert_eq!(bindings.get("name").unwrap().as_scalar(), Some("safe"));
    }

    #[test]
    fn test_command_substitution_captures_builtins_only() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(dir.path(), "a=$(echo hi)\nb=$(uname -m)\n").unwrap();
        assert_eq!(bindings.get("a").unwrap().as_scalar(), Some("hi"));
        // External output does not exist
        assert_eq!(bindings.get("b").unwrap().as_scalar(), Some(""));
    }

    #[test]
    fn test_scriptdir_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(dir.path(), "where=$scriptdir\n").unwrap();
        let scriptdir = bindings.get("where").unwrap().as_scalar().unwrap();
        assert!(scriptdir.ends_with("/pkg"));
    }

    #[test]
    fn test_source_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("common.sh"), "shared=yes\n").unwrap();

        let bindings = eval(dir.path(), "source common.sh\nname=foo\n").unwrap();
        assert_eq!(bindings.get("shared").unwrap().as_scalar(), Some("yes"));
    }

    #[test]
    fn test_read_outside_root_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let err = eval(dir.path(), "source /etc/profile\n").unwrap_err();
        assert!(matches!(err, crate::Error::SandboxEscape { .. }));
    }

    #[test]
    fn test_conditionals_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(
            dir.path(),
            "if [ -z \"$unset_var\" ]; then kind=empty; else kind=full; fi\n\
             total=\nfor n in a b c; do total=\"$total$n\"; done\n",
        )
        .unwrap();
        assert_eq!(bindings.get("kind").unwrap().as_scalar(), Some("empty"));
        assert_eq!(bindings.get("total").unwrap().as_scalar(), Some("abc"));
    }

    #[test]
    fn test_functions_are_stored_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = eval(
            dir.path(),
            "name=foo\nbuild() {\n  name=clobbered\n  make install\n}\n",
        )
        .unwrap();
        assert_eq!(bindings.get("name").unwrap().as_scalar(), Some("foo"));
    }

    #[test]
    fn test_reset_between_evaluations() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let parser = Parser::new();
        let mut sandbox = Sandbox::new(dir.path()).unwrap();

        sandbox
            .evaluate(&ctx, &parser, Path::new("a/lure.sh"), "first=1\n")
            .unwrap();
        let second = sandbox
            .evaluate(&ctx, &parser, Path::new("b/lure.sh"), "name=two\n")
            .unwrap();

        assert!(second.get("first").is_none());
    }

    #[test]
    fn test_cancellation_stops_execution() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();

        let parser = Parser::new();
        let mut sandbox = Sandbox::new(dir.path()).unwrap();
        let err = sandbox
            .evaluate(&ctx, &parser, Path::new("a/lure.sh"), "name=foo\n")
            .unwrap_err();
        assert!(matches!(err, crate::Error::RecipeExec { .. }));
    }
}
