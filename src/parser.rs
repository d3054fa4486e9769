//! Token stream → directives, populating the variable environment and the
//! target/configuration registries. A straightforward LL parser over an
//! owned token slice with an index cursor; value lists and colon lists are
//! helper productions shared by every directive that needs them.

use std::path::Path;

use crate::env::{Environment, Fragment, Ref, Variable};
use crate::lexer::{self, Token, TokenKind};
use crate::model::{
    CommonFields, Configuration, ConfigurationRegistry, CxxFields, Target, TargetKind,
    TargetRegistry,
};
use crate::system::{self, Error};

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    file: String,
}

impl<'t> Cursor<'t> {
    fn new(file: String, tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            file,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Pull the next token, failing with a located `ParseError` on EOF.
    fn next(&mut self, expected: &str) -> Result<&'t Token, Error> {
        self.advance()
            .ok_or_else(|| self.error_at(0, 0, format!("expected {expected}, found end of file")))
    }

    fn error_at(&self, line: usize, column: usize, msg: impl Into<String>) -> Error {
        Error::ParseError(self.file.clone(), line, column, msg.into())
    }

    fn unexpected(&self, token: &Token, expected: &str) -> Error {
        self.error_at(
            token.line,
            token.column,
            format!("expected {expected}, found `{}`", token.content),
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<&'t Token, Error> {
        let token = self.next(expected)?;
        if token.kind != kind {
            return Err(self.unexpected(token, expected));
        }
        Ok(token)
    }
}

fn is_value_token(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Literal
            | TokenKind::QuotedLiteral
            | TokenKind::MultilineLiteral
            | TokenKind::Variable
    )
}

fn token_to_fragment(token: &Token) -> Fragment {
    if token.kind == TokenKind::Variable {
        Fragment::Ref(Ref::parse(&token.content))
    } else {
        Fragment::Literal(token.content.clone())
    }
}

/// Parse one build file, adding its directives to `env`, `targets`, and
/// `configurations`. The module name is the file's basename without extension.
pub fn parse_file(
    path: &Path,
    env: &mut Environment,
    targets: &mut TargetRegistry,
    configurations: &mut ConfigurationRegistry,
) -> Result<(), Error> {
    let file = path.display().to_string();
    let source = system::read_file(path)?;
    let tokens = lexer::tokenize(&file, &source)?;

    let module = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    env.ensure_scope(&module);

    let mut cur = Cursor::new(file, &tokens);
    loop {
        let token = match cur.peek() {
            None => break,
            Some(t) => t,
        };
        match token.kind {
            TokenKind::Newline => {
                cur.advance();
            }
            TokenKind::Literal => match token.content.as_str() {
                "set" => {
                    cur.advance();
                    parse_set_or_append(&mut cur, env, &module, false)?;
                }
                "append" => {
                    cur.advance();
                    parse_set_or_append(&mut cur, env, &module, true)?;
                }
                "target" => {
                    cur.advance();
                    parse_target(&mut cur, &module, path, targets)?;
                }
                "configuration" => {
                    cur.advance();
                    parse_configuration(&mut cur, configurations)?;
                }
                other => {
                    return Err(cur.error_at(
                        token.line,
                        token.column,
                        format!("expected a directive (set, append, target, configuration), found `{other}`"),
                    ));
                }
            },
            _ => return Err(cur.unexpected(token, "a directive")),
        }
    }

    let dir = path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    env.set(&module, "__path", Fragment::Literal(dir));
    env.set_empty(&module, "__null");

    Ok(())
}

/// `set $NAME value...` / `append $NAME value...`. Per the normative reading
/// of the name-shadowing open question: `set` installs the first value and
/// treats any further values on the same line as appends, warning once since
/// that's almost always a migration mistake; `append` always appends.
fn parse_set_or_append(
    cur: &mut Cursor,
    env: &mut Environment,
    module: &str,
    is_append: bool,
) -> Result<(), Error> {
    let name_token = cur.expect(TokenKind::Variable, "a variable name")?;
    let var_name = Ref::parse(&name_token.content).name;
    let (name_line, name_column) = (name_token.line, name_token.column);

    let mut count = 0usize;
    loop {
        let token = match cur.peek() {
            None => break,
            Some(t) => t,
        };
        if is_value_token(token.kind) {
            let token = cur.advance().unwrap();
            let fragment = token_to_fragment(token);
            if is_append || count > 0 {
                env.append(module, &var_name, fragment);
            } else {
                env.set(module, &var_name, fragment);
            }
            count += 1;
        } else if token.kind == TokenKind::Newline {
            cur.advance();
            break;
        } else {
            return Err(cur.unexpected(token, "a value or end of line"));
        }
    }

    if count == 0 {
        return Err(cur.error_at(
            name_line,
            name_column,
            format!(
                "`{}` needs at least one value",
                if is_append { "append" } else { "set" }
            ),
        ));
    }
    if !is_append && count > 1 {
        system::hintln!(
            "Warn",
            "`set ${var_name}` in `{module}` was given {count} values; treating the extras as `append`"
        );
    }
    Ok(())
}

/// `(fragment fragment ...)`.
fn parse_value_list(cur: &mut Cursor) -> Result<Variable, Error> {
    cur.expect(TokenKind::OpenParen, "`(`")?;
    let mut variable = Variable::empty();
    loop {
        let token = cur.next("a value or `)`")?;
        match token.kind {
            TokenKind::CloseParen => break,
            _ if is_value_token(token.kind) => {
                variable.fragments.push(token_to_fragment(token));
            }
            _ => return Err(cur.unexpected(token, "a value or `)`")),
        }
    }
    Ok(variable)
}

/// `(first:second first:second ...)`, used by `export`.
fn parse_colon_list(cur: &mut Cursor) -> Result<Vec<(Fragment, String)>, Error> {
    cur.expect(TokenKind::OpenParen, "`(`")?;
    let mut pairs = Vec::new();
    loop {
        let token = cur.next("a value or `)`")?;
        match token.kind {
            TokenKind::CloseParen => break,
            _ if is_value_token(token.kind) => {
                let first = token_to_fragment(token);
                cur.expect(TokenKind::Colon, "`:`")?;
                let second = cur.expect(TokenKind::Variable, "a variable")?;
                let name = Ref::parse(&second.content).name;
                pairs.push((first, name));
            }
            _ => return Err(cur.unexpected(token, "a value or `)`")),
        }
    }
    Ok(pairs)
}

fn empty_common(module: &str, root_path: std::path::PathBuf, name: String) -> CommonFields {
    CommonFields {
        name,
        scope: module.to_string(),
        root_path,
        depends_on: Variable::empty(),
        run_before: Variable::empty(),
        run_after: Variable::empty(),
        artefacts: Variable::empty(),
        prerequisites: Variable::empty(),
        resources: Variable::empty(),
        visible_in: Variable::empty(),
    }
}

/// Try to parse one of the keys common to every target type. Returns
/// `Ok(true)` if `key` was recognised and consumed its value list.
fn try_common_key(
    cur: &mut Cursor,
    common: &mut CommonFields,
    key: &str,
) -> Result<bool, Error> {
    match key {
        "depends_on" => common.depends_on = parse_value_list(cur)?,
        "run_before" => common.run_before = parse_value_list(cur)?,
        "run_after" => common.run_after = parse_value_list(cur)?,
        "resources" => common.resources = parse_value_list(cur)?,
        "visible_in" => common.visible_in = parse_value_list(cur)?,
        "artefacts" => common.artefacts = parse_value_list(cur)?,
        "prerequisites" => common.prerequisites = parse_value_list(cur)?,
        _ => return Ok(false),
    }
    Ok(true)
}

fn try_cxx_key(cur: &mut Cursor, cxx: &mut CxxFields, key: &str) -> Result<bool, Error> {
    match key {
        "sources" => cxx.sources = parse_value_list(cur)?,
        "include_dirs" => cxx.include_dirs = parse_value_list(cur)?,
        "compiler_flags" => cxx.compiler_flags = parse_value_list(cur)?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Run the key/value loop of a `target`/`configuration` directive, calling
/// `handle_key` for each literal key encountered, until the terminating
/// Newline (or end of file).
fn parse_key_value_directive(
    cur: &mut Cursor,
    mut handle_key: impl FnMut(&mut Cursor, &str, usize, usize) -> Result<(), Error>,
) -> Result<(), Error> {
    loop {
        let token = match cur.peek() {
            None => break,
            Some(t) => t,
        };
        match token.kind {
            TokenKind::Newline => {
                cur.advance();
                break;
            }
            TokenKind::Literal => {
                let key = token.content.clone();
                let (line, column) = (token.line, token.column);
                cur.advance();
                handle_key(cur, &key, line, column)?;
            }
            _ => return Err(cur.unexpected(token, "a key or end of line")),
        }
    }
    Ok(())
}

fn parse_application_target(
    cur: &mut Cursor,
    mut common: CommonFields,
    targets: &mut TargetRegistry,
) -> Result<(), Error> {
    let mut cxx = CxxFields::default();
    let mut link_with = Variable::empty();
    let mut library_dirs = Variable::empty();

    parse_key_value_directive(cur, |cur, key, line, column| {
        if try_common_key(cur, &mut common, key)? {
            return Ok(());
        }
        if try_cxx_key(cur, &mut cxx, key)? {
            return Ok(());
        }
        match key {
            "link_with" => link_with = parse_value_list(cur)?,
            "library_dirs" => library_dirs = parse_value_list(cur)?,
            other => {
                return Err(cur.error_at(
                    line,
                    column,
                    format!("unknown key `{other}` for target type `application`"),
                ))
            }
        }
        Ok(())
    })?;

    targets.add(Target {
        common,
        kind: TargetKind::Application {
            cxx,
            link_with,
            library_dirs,
        },
    })
}

fn parse_static_library_target(
    cur: &mut Cursor,
    mut common: CommonFields,
    targets: &mut TargetRegistry,
) -> Result<(), Error> {
    let mut cxx = CxxFields::default();

    parse_key_value_directive(cur, |cur, key, line, column| {
        if try_common_key(cur, &mut common, key)? {
            return Ok(());
        }
        if try_cxx_key(cur, &mut cxx, key)? {
            return Ok(());
        }
        Err(cur.error_at(
            line,
            column,
            format!("unknown key `{key}` for target type `static_library`"),
        ))
    })?;

    targets.add(Target {
        common,
        kind: TargetKind::StaticLibrary { cxx },
    })
}

fn parse_phony_target(
    cur: &mut Cursor,
    mut common: CommonFields,
    targets: &mut TargetRegistry,
) -> Result<(), Error> {
    parse_key_value_directive(cur, |cur, key, line, column| {
        if try_common_key(cur, &mut common, key)? {
            return Ok(());
        }
        Err(cur.error_at(
            line,
            column,
            format!("unknown key `{key}` for target type `phony`"),
        ))
    })?;

    targets.add(Target {
        common,
        kind: TargetKind::Phony,
    })
}

fn parse_target(
    cur: &mut Cursor,
    module: &str,
    file_path: &Path,
    targets: &mut TargetRegistry,
) -> Result<(), Error> {
    let type_token = cur.expect(TokenKind::Literal, "a target type")?;
    let target_type = type_token.content.clone();
    let (type_line, type_column) = (type_token.line, type_token.column);

    let name_token = cur.expect(TokenKind::Literal, "a target name")?;
    let target_name = name_token.content.clone();

    let root_path = file_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let common = empty_common(module, root_path, target_name);

    match target_type.as_str() {
        "application" => parse_application_target(cur, common, targets),
        "static_library" => parse_static_library_target(cur, common, targets),
        "phony" => parse_phony_target(cur, common, targets),
        other => Err(cur.error_at(
            type_line,
            type_column,
            format!("unknown target type `{other}`"),
        )),
    }
}

fn parse_configuration(
    cur: &mut Cursor,
    configurations: &mut ConfigurationRegistry,
) -> Result<(), Error> {
    let name_token = cur.expect(TokenKind::Literal, "a configuration name")?;
    let mut configuration = Configuration::with_defaults(name_token.content.clone());

    parse_key_value_directive(cur, |cur, key, line, column| {
        match key {
            "compiler" => configuration.compiler = parse_value_list(cur)?,
            "archiver" => configuration.archiver = parse_value_list(cur)?,
            "application_suffix" => configuration.application_suffix = parse_value_list(cur)?,
            "compiler_flags" => configuration.compiler_flags = parse_value_list(cur)?,
            "linker_flags" => configuration.linker_flags = parse_value_list(cur)?,
            "export" => configuration.export = parse_colon_list(cur)?,
            other => {
                return Err(cur.error_at(
                    line,
                    column,
                    format!("unknown configuration key `{other}`"),
                ))
            }
        }
        Ok(())
    })?;

    configurations.add(configuration);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CONFIGURATION_SCOPE;

    fn parse_str(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_empty_file_parses_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(&dir, "empty.pake", "");
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap();
        assert!(targets.is_empty());
        assert_eq!(env.eval_named("empty", "__null").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_set_then_extra_value_becomes_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(&dir, "flags.pake", "set $warn -Wall -Wextra\n");
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap();
        assert_eq!(
            env.eval_named("flags", "warn").unwrap(),
            vec!["-Wall".to_string(), "-Wextra".to_string()]
        );
    }

    #[test]
    fn test_append_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(&dir, "flags.pake", "set $warn -Wall\nappend $warn -Wextra\n");
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap();
        assert_eq!(
            env.eval_named("flags", "warn").unwrap(),
            vec!["-Wall".to_string(), "-Wextra".to_string()]
        );
    }

    #[test]
    fn test_application_target_with_continuations() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(
            &dir,
            "app.pake",
            "target application hello \\\n    sources (main.cpp) \\\n    link_with (util)\n",
        );
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap();
        let target = targets.get("hello").unwrap();
        match &target.kind {
            TargetKind::Application { cxx, link_with, .. } => {
                assert_eq!(env.eval("app", &cxx.sources).unwrap(), vec!["main.cpp".to_string()]);
                assert_eq!(env.eval("app", link_with).unwrap(), vec!["util".to_string()]);
            }
            other => panic!("expected Application, got {other:?}"),
        }
    }

    #[test]
    fn test_phony_rejects_sources_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(&dir, "p.pake", "target phony clean sources (a.cpp)\n");
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        let err = parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap_err();
        assert!(matches!(err, Error::ParseError(..)));
    }

    #[test]
    fn test_duplicate_target_across_directives_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(
            &dir,
            "dup.pake",
            "target phony a\ntarget phony a\n",
        );
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        let err = parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap_err();
        assert!(matches!(err, Error::DuplicateTarget(n) if n == "a"));
    }

    #[test]
    fn test_configuration_export_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(
            &dir,
            "conf.pake",
            "configuration debug \\\n    compiler_flags (-g) \\\n    export (release:$RELEASE)\n",
        );
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap();
        let debug = configurations.get("debug").unwrap();
        assert_eq!(env.eval(CONFIGURATION_SCOPE, &debug.compiler_flags).unwrap(), vec!["-g".to_string()]);
        // unset fields keep the defaults
        assert_eq!(env.eval(CONFIGURATION_SCOPE, &debug.compiler).unwrap(), vec!["c++".to_string()]);
        assert_eq!(debug.export.len(), 1);
        assert_eq!(debug.export[0].1, "RELEASE");
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = parse_str(&dir, "bad.pake", "target phony a bogus (1)\n");
        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();
        let err = parse_file(&path, &mut env, &mut targets, &mut configurations).unwrap_err();
        assert!(matches!(err, Error::ParseError(..)));
    }
}
