//! Build script and error page templates.
//!
//! Both templates are Handlebars documents. Built-in defaults are compiled
//! into the binary; either can be replaced by a file named in
//! [`BuildConfig`]. Templates are loaded once, when settings are applied,
//! and shared read-only by every project.
//!
//! # Script context
//!
//! | field        | value |
//! |--------------|-------|
//! | `name`       | project name |
//! | `root`       | absolute project root |
//! | `src_dir`    | `<root>/src` |
//! | `bin_dir`    | `<root>/bin` |
//! | `strategy`   | `run`, `build` or `install` |
//! | `is_run`, `is_build`, `is_install` | strategy flags for `{{#if}}` |
//! | `main`       | what to compile: `src/<main>` or the install package |
//! | `output`     | executable relative to the root, when one is produced |
//! | `options`    | extra toolchain flags (`-o bin/<name>` for build) |
//! | `sentinel`   | what the script must print on success |
//! | `depends`    | `[{name, root}]`, `root` set for declared projects |
//! | `args`       | runtime arguments |
//!
//! # Error page context
//!
//! `name`, `strategy`, `reason` (`syntax error` or `build timed out`), and
//! `output`, the build output with the success sentinel removed. The page
//! template HTML-escapes its values; the script template does not.

use ab_core::{BuildConfig, BuildStrategy, FxHashMap, ProjectDecl, ProjectLayout};
use camino::{Utf8Path, Utf8PathBuf};
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::TemplateError;

const SCRIPT: &str = "script";
const ERROR_PAGE: &str = "error page";

/// Built-in build script template.
#[cfg(windows)]
pub const DEFAULT_SCRIPT_TEMPLATE: &str = include_str!("../templates/install.bat.hbs");

/// Built-in build script template.
#[cfg(not(windows))]
pub const DEFAULT_SCRIPT_TEMPLATE: &str = include_str!("../templates/install.sh.hbs");

/// Built-in error page template.
pub const DEFAULT_ERROR_TEMPLATE: &str = include_str!("../templates/error.html.hbs");

/// The compiled build script and error page templates.
///
/// # Examples
///
/// ```
/// use ab_project::{ErrorPageContext, Templates};
///
/// let templates = Templates::from_strings("echo {{name}}", "<pre>{{output}}</pre>")?;
/// let page = templates.render_error_page(&ErrorPageContext {
///     name: "api",
///     strategy: "build",
///     reason: "syntax error",
///     output: "main.go:3: x < y",
/// })?;
/// assert_eq!(page, "<pre>main.go:3: x &lt; y</pre>");
/// # Ok::<(), ab_project::TemplateError>(())
/// ```
pub struct Templates {
    scripts: Handlebars<'static>,
    pages: Handlebars<'static>,
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templates").finish_non_exhaustive()
    }
}

impl Templates {
    /// Compiles the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Parse`] if a built-in template is invalid.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_strings(DEFAULT_SCRIPT_TEMPLATE, DEFAULT_ERROR_TEMPLATE)
    }

    /// Compiles the templates named in `config`, falling back to the
    /// built-in ones.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Load`] if an override file cannot be read
    /// and [`TemplateError::Parse`] if a template is invalid.
    pub fn from_config(config: &BuildConfig) -> Result<Self, TemplateError> {
        let script = load_or(config.script_template.as_deref(), DEFAULT_SCRIPT_TEMPLATE)?;
        let page = load_or(config.error_template.as_deref(), DEFAULT_ERROR_TEMPLATE)?;
        Self::from_strings(&script, &page)
    }

    /// Compiles templates from source text.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Parse`] if either template is invalid.
    pub fn from_strings(script: &str, page: &str) -> Result<Self, TemplateError> {
        let mut scripts = Handlebars::new();
        scripts.register_escape_fn(handlebars::no_escape);
        scripts
            .register_template_string(SCRIPT, script)
            .map_err(|e| TemplateError::Parse {
                name: SCRIPT,
                source: Box::new(e),
            })?;

        let mut pages = Handlebars::new();
        pages
            .register_template_string(ERROR_PAGE, page)
            .map_err(|e| TemplateError::Parse {
                name: ERROR_PAGE,
                source: Box::new(e),
            })?;

        Ok(Self { scripts, pages })
    }

    /// Renders the build script.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Render`] if rendering fails.
    pub fn render_script(&self, context: &ScriptContext) -> Result<String, TemplateError> {
        self.scripts
            .render(SCRIPT, context)
            .map_err(|e| TemplateError::Render {
                name: SCRIPT,
                source: Box::new(e),
            })
    }

    /// Renders the error page.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Render`] if rendering fails.
    pub fn render_error_page(&self, context: &ErrorPageContext<'_>) -> Result<String, TemplateError> {
        self.pages
            .render(ERROR_PAGE, context)
            .map_err(|e| TemplateError::Render {
                name: ERROR_PAGE,
                source: Box::new(e),
            })
    }
}

fn load_or(path: Option<&Utf8Path>, builtin: &str) -> Result<String, TemplateError> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| TemplateError::Load {
            path: path.to_owned(),
            source,
        }),
        None => Ok(builtin.to_owned()),
    }
}

/// Values available to the build script template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptContext {
    /// Project name.
    pub name: String,
    /// Absolute project root.
    pub root: Utf8PathBuf,
    /// Watched source tree.
    pub src_dir: Utf8PathBuf,
    /// Output directory.
    pub bin_dir: Utf8PathBuf,
    /// Strategy label.
    pub strategy: &'static str,
    /// `true` for the run strategy.
    pub is_run: bool,
    /// `true` for the build strategy.
    pub is_build: bool,
    /// `true` for the install strategy.
    pub is_install: bool,
    /// What the script compiles.
    pub main: String,
    /// Produced executable, relative to the root.
    pub output: Option<Utf8PathBuf>,
    /// Extra toolchain flags.
    pub options: String,
    /// Success sentinel.
    pub sentinel: String,
    /// Declared dependencies.
    pub depends: Vec<DependencyContext>,
    /// Runtime arguments.
    pub args: Vec<String>,
}

/// One dependency in a [`ScriptContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyContext {
    /// Dependency name as declared.
    pub name: String,
    /// Root of the dependency, when it is a declared project.
    pub root: Option<Utf8PathBuf>,
}

impl ScriptContext {
    /// Builds the context for `decl`.
    ///
    /// `known_roots` maps declared project names to their roots; dependencies
    /// not found there are passed through with no root.
    #[must_use]
    pub fn new(
        decl: &ProjectDecl,
        layout: &ProjectLayout,
        sentinel: &str,
        known_roots: &FxHashMap<String, Utf8PathBuf>,
    ) -> Self {
        let output = layout.relative_executable();
        let options = match (decl.strategy, &output) {
            (BuildStrategy::Build, Some(output)) => format!("-o {output}"),
            _ => String::new(),
        };
        let depends = decl
            .depends
            .iter()
            .map(|name| DependencyContext {
                name: name.clone(),
                root: known_roots.get(name).cloned(),
            })
            .collect();

        Self {
            name: decl.name.clone(),
            root: layout.root.clone(),
            src_dir: layout.src_dir.clone(),
            bin_dir: layout.bin_dir.clone(),
            strategy: decl.strategy.label(),
            is_run: decl.strategy == BuildStrategy::Run,
            is_build: decl.strategy == BuildStrategy::Build,
            is_install: decl.strategy == BuildStrategy::Install,
            main: layout.main_target.clone(),
            output,
            options,
            sentinel: sentinel.to_owned(),
            depends,
            args: decl.args.clone(),
        }
    }
}

/// Values available to the error page template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorPageContext<'a> {
    /// Project name.
    pub name: &'a str,
    /// Strategy label.
    pub strategy: &'a str,
    /// Short description of the failure.
    pub reason: &'a str,
    /// Build output with the success sentinel removed.
    pub output: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(strategy: BuildStrategy, main: &str) -> (TempDir, ProjectDecl, ProjectLayout) {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let decl = ProjectDecl::new("api", root)
            .with_strategy(strategy)
            .with_main(main)
            .with_depends(["tools", "github.com/acme/log"])
            .with_args(["-port", "8080"]);
        let layout = ProjectLayout::resolve(&decl).unwrap();
        (dir, decl, layout)
    }

    fn known_tools() -> FxHashMap<String, Utf8PathBuf> {
        let mut roots = FxHashMap::default();
        roots.insert("tools".to_owned(), Utf8PathBuf::from("/srv/tools"));
        roots
    }

    #[test]
    fn test_build_context() {
        let (_dir, decl, layout) = project(BuildStrategy::Build, "main.go");
        let context = ScriptContext::new(&decl, &layout, "finished", &known_tools());

        assert_eq!(context.strategy, "build");
        assert!(context.is_build && !context.is_run && !context.is_install);
        assert_eq!(context.options, format!("-o {}", layout.relative_executable().unwrap()));
        assert_eq!(context.depends[0].root.as_deref(), Some(Utf8Path::new("/srv/tools")));
        assert_eq!(context.depends[1].root, None);
        assert_eq!(context.args, vec!["-port", "8080"]);
    }

    #[test]
    fn test_install_context_has_no_options() {
        let (_dir, decl, layout) = project(BuildStrategy::Install, "cmd/api/main.go");
        let context = ScriptContext::new(&decl, &layout, "finished", &FxHashMap::default());

        assert_eq!(context.main, "cmd/api");
        assert!(context.options.is_empty());
        assert!(context.output.is_some());
    }

    #[test]
    fn test_script_is_not_html_escaped() {
        let templates = Templates::from_strings(
            "{{name}}|{{strategy}}|{{options}}|{{#each args}}{{this}} {{/each}}|{{sentinel}}",
            "",
        )
        .unwrap();
        let (_dir, mut decl, layout) = project(BuildStrategy::Run, "main.go");
        decl.args = vec!["-addr=<host>&".to_owned()];
        let context = ScriptContext::new(&decl, &layout, "finished", &FxHashMap::default());

        insta::assert_snapshot!(
            templates.render_script(&context).unwrap(),
            @"api|run||-addr=<host>& |finished"
        );
    }

    #[test]
    fn test_builtin_posix_script() {
        if cfg!(windows) {
            return;
        }
        let templates = Templates::builtin().unwrap();
        let (_dir, decl, layout) = project(BuildStrategy::Build, "main.go");
        let context = ScriptContext::new(&decl, &layout, "finished", &known_tools());
        let script = templates.render_script(&context).unwrap();

        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains(&format!("GOPATH=\"{}:/srv/tools\"", layout.root)));
        assert!(script.contains("go build -o bin/api src/main.go 2>&1 && echo \"finished\""));
        assert!(!script.contains("go run"));
    }

    #[test]
    fn test_builtin_posix_run_script() {
        if cfg!(windows) {
            return;
        }
        let templates = Templates::builtin().unwrap();
        let (_dir, decl, layout) = project(BuildStrategy::Run, "main.go");
        let context = ScriptContext::new(&decl, &layout, "finished", &FxHashMap::default());
        let script = templates.render_script(&context).unwrap();

        assert!(script.contains("exec go run src/main.go \"-port\" \"8080\""));
        assert!(!script.contains("echo \"finished\""));
    }

    #[test]
    fn test_error_page_escapes_output() {
        let templates = Templates::builtin().unwrap();
        let page = templates
            .render_error_page(&ErrorPageContext {
                name: "api",
                strategy: "build",
                reason: "syntax error",
                output: "src/main.go:4: expected '}', found <EOF>",
            })
            .unwrap();

        assert!(page.contains("<title>api: syntax error</title>"));
        assert!(page.contains("found &lt;EOF&gt;"));
    }

    #[test]
    fn test_invalid_template_is_parse_error() {
        let err = Templates::from_strings("{{#if}}", "").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { name: "script", .. }));
    }

    #[test]
    fn test_override_file_missing() {
        let config = BuildConfig {
            error_template: Some("/nonexistent/error.hbs".into()),
            ..BuildConfig::default()
        };
        let err = Templates::from_config(&config).unwrap_err();
        assert!(matches!(err, TemplateError::Load { .. }));
    }

    #[test]
    fn test_override_file_is_used() {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("script.hbs");
        std::fs::write(&path, "make {{name}}").unwrap();
        let config = BuildConfig {
            script_template: Some(path),
            ..BuildConfig::default()
        };
        let templates = Templates::from_config(&config).unwrap();

        let (_dir, decl, layout) = project(BuildStrategy::Install, "");
        let context = ScriptContext::new(&decl, &layout, "finished", &FxHashMap::default());
        assert_eq!(templates.render_script(&context).unwrap(), "make api");
    }
}
