// src/decoder.rs

//! Projection of recipe bindings into a [`Package`] record.
//!
//! Base fields copy directly from same-named bindings. Dependency
//! bindings carry an optional override suffix selecting an architecture
//! or distribution (`deps_amd64`, `build_deps_debian`); the bare names
//! `deps` and `build_deps` land under the default `""` key. Overrides for
//! any other field are resolved at install time by a different consumer
//! and are ignored here.

use crate::db::models::Json;
use crate::error::{Error, Result};
use crate::sandbox::{Bindings, Value};
use crate::Package;

enum Shape {
    Scalar,
    Array,
}

/// Binding name, required, and expected shape for each base field
const FIELDS: &[(&str, bool, Shape)] = &[
    ("name", true, Shape::Scalar),
    ("version", true, Shape::Scalar),
    ("release", true, Shape::Scalar),
    ("epoch", false, Shape::Scalar),
    ("architectures", false, Shape::Array),
    ("license", false, Shape::Array),
    ("provides", false, Shape::Array),
    ("conflicts", false, Shape::Array),
    ("replaces", false, Shape::Array),
];

/// Copy base fields out of `bindings` into `pkg`.
///
/// Missing required bindings and shape mismatches are errors; `release`
/// and `epoch` must parse as integers.
pub fn decode(bindings: &Bindings, pkg: &mut Package) -> Result<()> {
    for (name, required, shape) in FIELDS {
        let value = match bindings.get(name) {
            Some(value) => value,
            None if *required => {
                return Err(Error::Decode(format!("missing required field: {name}")))
            }
            None => continue,
        };

        match shape {
            Shape::Scalar => {
                let scalar = value
                    .as_scalar()
                    .ok_or_else(|| Error::Decode(format!("field {name} must be a string")))?;
                apply_scalar(pkg, name, scalar)?;
            }
            Shape::Array => {
                let array = value
                    .as_array()
                    .ok_or_else(|| Error::Decode(format!("field {name} must be an array")))?;
                apply_array(pkg, name, array);
            }
        }
    }

    Ok(())
}

fn apply_scalar(pkg: &mut Package, name: &str, value: &str) -> Result<()> {
    match name {
        "name" => pkg.name = value.to_string(),
        "version" => pkg.version = value.to_string(),
        "release" => {
            pkg.release = value
                .parse()
                .map_err(|_| Error::Decode(format!("field release is not an integer: {value}")))?;
        }
        "epoch" => {
            pkg.epoch = value
                .parse()
                .map_err(|_| Error::Decode(format!("field epoch is not an integer: {value}")))?;
        }
        _ => unreachable!("unknown scalar field {name}"),
    }
    Ok(())
}

fn apply_array(pkg: &mut Package, name: &str, value: &[String]) {
    let value = Json(Some(value.to_vec()));
    match name {
        "architectures" => pkg.architectures = value,
        "license" => pkg.licenses = value,
        "provides" => pkg.provides = value,
        "conflicts" => pkg.conflicts = value,
        "replaces" => pkg.replaces = value,
        _ => unreachable!("unknown array field {name}"),
    }
}

/// Resolve dependency override bindings into `pkg`.
///
/// Scans every binding starting with `deps` or `build_deps`, strips the
/// prefix and a single leading underscore, and stores the array under the
/// remaining key. Scalar bindings with those prefixes are skipped.
pub fn resolve_overrides(bindings: &Bindings, pkg: &mut Package) {
    for (name, value) in bindings.iter() {
        let Some(array) = value.as_array() else {
            continue;
        };

        if let Some(key) = name.strip_prefix("build_deps") {
            let key = key.strip_prefix('_').unwrap_or(key);
            pkg.build_depends.0.insert(key.to_string(), array.to_vec());
        } else if let Some(key) = name.strip_prefix("deps") {
            let key = key.strip_prefix('_').unwrap_or(key);
            pkg.depends.0.insert(key.to_string(), array.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Parser, Sandbox};
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    fn bindings_for(recipe: &str) -> Bindings {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let parser = Parser::new();
        let mut sandbox = Sandbox::new(dir.path()).unwrap();
        sandbox
            .evaluate(&ctx, &parser, Path::new("pkg/lure.sh"), recipe)
            .unwrap()
    }

    #[test]
    fn test_decode_base_fields() {
        let bindings = bindings_for(
            "name=foo\nversion=1.0\nrelease=2\nepoch=1\n\
             architectures=(amd64)\nlicense=('GPL-3.0')\nprovides=(foo-bin)\n",
        );

        let mut pkg = Package::default();
        decode(&bindings, &mut pkg).unwrap();

        assert_eq!(pkg.name, "foo");
        assert_eq!(pkg.version, "1.0");
        assert_eq!(pkg.release, 2);
        assert_eq!(pkg.epoch, 1);
        assert_eq!(pkg.architectures.0.as_deref(), Some(&["amd64".to_string()][..]));
        assert_eq!(pkg.licenses.0.as_deref(), Some(&["GPL-3.0".to_string()][..]));
    }

    #[test]
    fn test_decode_missing_required_field() {
        let bindings = bindings_for("name=foo\nversion=1.0\n");
        let err = decode(&bindings, &mut Package::default()).unwrap_err();
        assert!(err.to_string().contains("release"));
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let bindings = bindings_for("name=foo\nversion=1.0\nrelease=1\nlicense=GPL\n");
        let err = decode(&bindings, &mut Package::default()).unwrap_err();
        assert!(err.to_string().contains("license"));
    }

    #[test]
    fn test_decode_bad_release() {
        let bindings = bindings_for("name=foo\nversion=1.0\nrelease=one\n");
        assert!(decode(&bindings, &mut Package::default()).is_err());
    }

    #[test]
    fn test_overrides_default_and_keyed() {
        let bindings = bindings_for(
            "name=foo\nversion=1.0\nrelease=1\n\
             deps=(base)\ndeps_amd64=(bar baz)\nbuild_deps_arm64=(gcc)\n",
        );

        let mut pkg = Package::default();
        resolve_overrides(&bindings, &mut pkg);

        assert_eq!(pkg.depends.0.get(""), Some(&vec!["base".to_string()]));
        assert_eq!(
            pkg.depends.0.get("amd64"),
            Some(&vec!["bar".to_string(), "baz".to_string()])
        );
        assert_eq!(pkg.build_depends.0.get("arm64"), Some(&vec!["gcc".to_string()]));
    }

    #[test]
    fn test_override_scalar_bindings_ignored() {
        let bindings = bindings_for("name=foo\nversion=1.0\nrelease=1\ndeps_amd64=notarray\n");

        let mut pkg = Package::default();
        resolve_overrides(&bindings, &mut pkg);
        assert!(pkg.depends.0.is_empty());
    }

    #[test]
    fn test_build_deps_not_swallowed_by_deps_prefix() {
        let bindings = bindings_for("name=foo\nversion=1.0\nrelease=1\nbuild_deps=(make)\n");

        let mut pkg = Package::default();
        resolve_overrides(&bindings, &mut pkg);

        assert_eq!(pkg.build_depends.0.get(""), Some(&vec!["make".to_string()]));
        assert!(pkg.depends.0.is_empty());
    }
}
