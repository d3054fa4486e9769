//! The variable environment: named scopes, literal interpolation, and
//! late-bound cross-scope references.

use std::collections::BTreeMap;

use crate::system::Error;

/// The reserved scope that configuration `export`s and the synthesized
/// `$__build`/`$__name` variables are written into.
pub const CONFIGURATION_SCOPE: &str = "__configuration";

/// A reference to another variable, either local (`$name`) or qualified
/// (`$scope.name`). Resolution is always late: the same `Ref` can mean
/// different things depending on which scope is "current" when it's reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub scope: Option<String>,
    pub name: String,
}

impl Ref {
    /// Parse a variable token's content (e.g. `$foo` or `$mod.foo`) into a reference.
    pub fn parse(content: &str) -> Ref {
        let body = content.strip_prefix('$').unwrap_or(content);
        match body.split_once('.') {
            Some((scope, name)) => Ref {
                scope: Some(scope.to_string()),
                name: name.to_string(),
            },
            None => Ref {
                scope: None,
                name: body.to_string(),
            },
        }
    }
}

/// One element of a variable's value: either a literal (which may itself
/// contain `${...}` interpolations) or a reference to another variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Literal(String),
    Ref(Ref),
}

/// An ordered, append-only list of value fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variable {
    pub fragments: Vec<Fragment>,
}

impl Variable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            fragments: vec![Fragment::Literal(value.into())],
        }
    }

    pub fn set(&mut self, fragment: Fragment) {
        self.fragments = vec![fragment];
    }

    pub fn append(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    pub name: String,
    pub variables: BTreeMap<String, Variable>,
}

impl Scope {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: BTreeMap::new(),
        }
    }
}

/// Holds every scope discovered across the build tree. Frozen after parsing;
/// read concurrently by the orchestrator thereafter.
#[derive(Debug, Default)]
pub struct Environment {
    scopes: BTreeMap<String, Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_scope(&mut self, name: &str) -> &mut Scope {
        self.scopes
            .entry(name.to_string())
            .or_insert_with(|| Scope::new(name))
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(|s| s.as_str())
    }

    pub fn set(&mut self, scope: &str, name: &str, fragment: Fragment) {
        self.ensure_scope(scope)
            .variables
            .entry(name.to_string())
            .or_default()
            .set(fragment);
    }

    pub fn append(&mut self, scope: &str, name: &str, fragment: Fragment) {
        self.ensure_scope(scope)
            .variables
            .entry(name.to_string())
            .or_default()
            .append(fragment);
    }

    /// Install an empty variable, e.g. the reserved `$__null`.
    pub fn set_empty(&mut self, scope: &str, name: &str) {
        self.ensure_scope(scope)
            .variables
            .insert(name.to_string(), Variable::empty());
    }

    fn lookup(&self, scope: &str, name: &str) -> Result<&Variable, Error> {
        let s = self
            .scopes
            .get(scope)
            .ok_or_else(|| Error::UnknownScope(scope.to_string()))?;
        s.variables
            .get(name)
            .ok_or_else(|| Error::UnknownVariable(scope.to_string(), name.to_string()))
    }

    /// Flatten `variable`, which is owned by `scope`, into a list of strings.
    pub fn eval(&self, scope: &str, variable: &Variable) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        for fragment in &variable.fragments {
            match fragment {
                Fragment::Literal(text) => out.push(self.eval_literal(scope, text)?),
                Fragment::Ref(r) => {
                    let (target_scope, target_name) = self.resolve_ref(scope, r)?;
                    let referenced = self.lookup(&target_scope, &target_name)?;
                    out.extend(self.eval(&target_scope, referenced)?);
                }
            }
        }
        Ok(out)
    }

    /// Evaluate a variable named directly, by scope and name, returning its
    /// flattened list of strings. Convenience wrapper over `eval`.
    pub fn eval_named(&self, scope: &str, name: &str) -> Result<Vec<String>, Error> {
        let variable = self.lookup(scope, name)?;
        self.eval(scope, variable)
    }

    fn resolve_ref(&self, current_scope: &str, r: &Ref) -> Result<(String, String), Error> {
        match &r.scope {
            Some(s) => Ok((s.clone(), r.name.clone())),
            None => Ok((current_scope.to_string(), r.name.clone())),
        }
    }

    /// Resolve `${name}` interpolations within a literal, in the context of `scope`.
    fn eval_literal(&self, scope: &str, text: &str) -> Result<String, Error> {
        let mut out = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('{') => {
                    let mut name = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        name.push(c);
                    }
                    let r = Ref::parse(&format!("${name}"));
                    let (target_scope, target_name) = self.resolve_ref(scope, &r)?;
                    let referenced = self.lookup(&target_scope, &target_name)?;
                    let values = self.eval(&target_scope, referenced)?;
                    out.push_str(&values.join(" "));
                }
                _ => {
                    return Err(Error::ParseError(
                        scope.to_string(),
                        0,
                        0,
                        "expecting { after $ in literal interpolation".to_string(),
                    ));
                }
            }
        }

        Ok(out)
    }

    /// Inject `$__build`, `$__path`, `$__null` for every scope and promote a
    /// configuration's `export` list into the reserved configuration scope.
    pub fn apply_configuration(
        &mut self,
        config_name: &str,
        exports: &[(Fragment, String)],
        build_dir_of: impl Fn(&str) -> String,
    ) {
        self.set(
            CONFIGURATION_SCOPE,
            "__null",
            Fragment::Literal(String::new()),
        );
        self.set(
            CONFIGURATION_SCOPE,
            "__name",
            Fragment::Literal(config_name.to_string()),
        );
        for (value, name) in exports {
            self.set(CONFIGURATION_SCOPE, name, value.clone());
        }

        let names: Vec<String> = self.scope_names().map(|s| s.to_string()).collect();
        for name in names {
            let build_dir = build_dir_of(&name);
            self.set(&name, "__build", Fragment::Literal(build_dir));
        }
    }

    /// Export every variable into the process environment: fully qualified as
    /// `SCOPE_VAR`, and unqualified as `VAR` for variables owned by `current_scope`.
    pub fn pollute_environment(&self, current_scope: &str) -> Result<(), Error> {
        for (scope_name, scope) in &self.scopes {
            for (name, variable) in &scope.variables {
                let evaluated = self.eval(scope_name, variable)?;
                let joined = evaluated.join(" ");
                std::env::set_var(format!("{scope_name}_{name}"), &joined);
                if scope_name == current_scope {
                    std::env::set_var(name, &joined);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_parse_local() {
        let r = Ref::parse("$foo");
        assert_eq!(r.scope, None);
        assert_eq!(r.name, "foo");
    }

    #[test]
    fn test_ref_parse_qualified() {
        let r = Ref::parse("$mod.foo");
        assert_eq!(r.scope.as_deref(), Some("mod"));
        assert_eq!(r.name, "foo");
    }

    #[test]
    fn test_eval_pure_literal() {
        let mut env = Environment::new();
        env.set("m", "x", Fragment::Literal("hello".into()));
        let v = env.eval_named("m", "x").unwrap();
        assert_eq!(v, vec!["hello".to_string()]);
    }

    #[test]
    fn test_eval_local_ref() {
        let mut env = Environment::new();
        env.set("m", "a", Fragment::Literal("1".into()));
        env.set("m", "b", Fragment::Ref(Ref::parse("$a")));
        assert_eq!(env.eval_named("m", "b").unwrap(), vec!["1".to_string()]);
    }

    #[test]
    fn test_eval_qualified_ref_across_scopes() {
        let mut env = Environment::new();
        env.append("flags", "warn", Fragment::Literal("-Wall".into()));
        env.append("flags", "warn", Fragment::Literal("-Wextra".into()));
        env.set("app", "cflags", Fragment::Ref(Ref::parse("$flags.warn")));
        assert_eq!(
            env.eval_named("app", "cflags").unwrap(),
            vec!["-Wall".to_string(), "-Wextra".to_string()]
        );
    }

    #[test]
    fn test_interpolation_inside_literal() {
        let mut env = Environment::new();
        env.set("m", "name", Fragment::Literal("world".into()));
        env.set("m", "greeting", Fragment::Literal("hello ${name}!".into()));
        assert_eq!(
            env.eval_named("m", "greeting").unwrap(),
            vec!["hello world!".to_string()]
        );
    }

    #[test]
    fn test_unknown_scope_is_error() {
        let env = Environment::new();
        let err = env.eval_named("nope", "x").unwrap_err();
        assert!(matches!(err, Error::UnknownScope(s) if s == "nope"));
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let mut env = Environment::new();
        env.ensure_scope("m");
        let err = env.eval_named("m", "missing").unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(s, n) if s == "m" && n == "missing"));
    }

    #[test]
    fn test_eval_is_pure_across_calls() {
        let mut env = Environment::new();
        env.append("m", "x", Fragment::Literal("a".into()));
        env.append("m", "x", Fragment::Literal("b".into()));
        let first = env.eval_named("m", "x").unwrap();
        let second = env.eval_named("m", "x").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_apply_configuration_exports() {
        let mut env = Environment::new();
        env.ensure_scope("m");
        env.apply_configuration(
            "debug",
            &[(Fragment::Literal("1".into()), "DEBUG".into())],
            |_| "/tmp/build".to_string(),
        );
        assert_eq!(
            env.eval_named(CONFIGURATION_SCOPE, "__name").unwrap(),
            vec!["debug".to_string()]
        );
        assert_eq!(
            env.eval_named(CONFIGURATION_SCOPE, "DEBUG").unwrap(),
            vec!["1".to_string()]
        );
        assert_eq!(
            env.eval_named("m", "__build").unwrap(),
            vec!["/tmp/build".to_string()]
        );
    }
}
