//! # Project Context
//!
//! Snapshot of the project a workflow runs against, consumed through
//! [`ContextProvider`]. The core never inspects the filesystem itself; the
//! manifest provider here is a thin default collaborator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the workflow knows about the project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub root: PathBuf,
    #[serde(default)]
    pub language: Option<String>,
    /// Main framework (first entry of `frameworks`)
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub test_framework: Option<String>,
    #[serde(default)]
    pub build_system: Option<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ProjectContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        let framework = framework.into();
        if self.framework.is_none() {
            self.framework = Some(framework.clone());
        }
        if !self.frameworks.contains(&framework) {
            self.frameworks.push(framework);
        }
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Supplies the project snapshot at workflow start
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn detect(&self) -> Result<ProjectContext>;
}

/// Returns a fixed snapshot
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    context: ProjectContext,
}

impl StaticContextProvider {
    pub fn new(context: ProjectContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn detect(&self) -> Result<ProjectContext> {
        Ok(self.context.clone())
    }
}

const CARGO_FRAMEWORKS: &[&str] = &["axum", "actix-web", "rocket", "tauri", "leptos", "bevy", "tokio"];
const NODE_FRAMEWORKS: &[&str] = &["next", "react", "vue", "svelte", "express", "fastify", "nestjs"];
const NODE_TEST_FRAMEWORKS: &[&str] = &["vitest", "jest", "mocha", "playwright"];
const PYTHON_FRAMEWORKS: &[&str] = &["django", "fastapi", "flask"];

/// Detects language and tooling from `Cargo.toml`, `package.json` or
/// `pyproject.toml` at a root directory
#[derive(Debug, Clone)]
pub struct ManifestContextProvider {
    root: PathBuf,
}

impl ManifestContextProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(content))
    }

    fn parse_toml(manifest: &str, file: &str) -> Result<toml::Value> {
        toml::from_str(manifest).with_context(|| format!("Failed to parse {}", file))
    }

    /// Keys of the table at `path`, empty when absent
    fn table_keys<'a>(value: &'a toml::Value, path: &[&str]) -> Vec<&'a str> {
        path.iter()
            .try_fold(value, |v, key| v.get(*key))
            .and_then(|v| v.as_table())
            .map(|t| t.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn has_table(value: &toml::Value, path: &[&str]) -> bool {
        path.iter().try_fold(value, |v, key| v.get(*key)).is_some()
    }

    /// Distribution name of a PEP 508 requirement such as `fastapi[all]>=0.110`
    fn requirement_name(requirement: &str) -> String {
        requirement
            .trim()
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    fn apply_cargo(ctx: &mut ProjectContext, manifest: &str) -> Result<()> {
        let cargo = Self::parse_toml(manifest, "Cargo.toml")?;
        ctx.language = Some("rust".to_string());
        ctx.build_system = Some("cargo".to_string());
        ctx.test_framework = Some("cargo test".to_string());

        let mut deps = Self::table_keys(&cargo, &["dependencies"]);
        deps.extend(Self::table_keys(&cargo, &["workspace", "dependencies"]));
        ctx.frameworks.extend(
            CARGO_FRAMEWORKS
                .iter()
                .filter(|f| deps.contains(*f))
                .map(|f| f.to_string()),
        );
        if Self::has_table(&cargo, &["workspace"]) {
            ctx.extra.insert("workspace".to_string(), "true".to_string());
        }
        Ok(())
    }

    fn apply_package_json(ctx: &mut ProjectContext, manifest: &str, root: &Path) -> Result<()> {
        let json: serde_json::Value =
            serde_json::from_str(manifest).context("Failed to parse package.json")?;

        let mut deps: Vec<String> = Vec::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(map) = json.get(section).and_then(|v| v.as_object()) {
                deps.extend(map.keys().cloned());
            }
        }
        let has = |name: &str| deps.iter().any(|d| d == name);

        ctx.language = Some(if has("typescript") { "typescript" } else { "javascript" }.to_string());
        ctx.frameworks
            .extend(NODE_FRAMEWORKS.iter().filter(|f| has(f)).map(|f| f.to_string()));
        ctx.test_framework = NODE_TEST_FRAMEWORKS
            .iter()
            .find(|f| has(f))
            .map(|f| f.to_string());

        let build = if root.join("pnpm-lock.yaml").exists() {
            "pnpm"
        } else if root.join("yarn.lock").exists() {
            "yarn"
        } else if root.join("bun.lockb").exists() {
            "bun"
        } else {
            "npm"
        };
        ctx.build_system = Some(build.to_string());

        if let Some(name) = json.get("name").and_then(|v| v.as_str()) {
            ctx.extra.insert("package".to_string(), name.to_string());
        }
        Ok(())
    }

    fn apply_pyproject(ctx: &mut ProjectContext, manifest: &str) -> Result<()> {
        let pyproject = Self::parse_toml(manifest, "pyproject.toml")?;
        ctx.language = Some("python".to_string());

        let mut deps: Vec<String> = pyproject
            .get("project")
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_array())
            .map(|reqs| {
                reqs.iter()
                    .filter_map(|r| r.as_str())
                    .map(Self::requirement_name)
                    .collect()
            })
            .unwrap_or_default();
        deps.extend(
            Self::table_keys(&pyproject, &["tool", "poetry", "dependencies"])
                .into_iter()
                .map(str::to_ascii_lowercase),
        );
        ctx.frameworks.extend(
            PYTHON_FRAMEWORKS
                .iter()
                .filter(|f| deps.iter().any(|d| d == *f))
                .map(|f| f.to_string()),
        );

        // pytest is normally a dev-only requirement
        let optional_deps = pyproject
            .get("project")
            .and_then(|p| p.get("optional-dependencies"))
            .and_then(|o| o.as_table())
            .into_iter()
            .flat_map(|t| t.values())
            .filter_map(|group| group.as_array())
            .flatten()
            .filter_map(|r| r.as_str())
            .map(Self::requirement_name);
        let poetry_dev =
            Self::table_keys(&pyproject, &["tool", "poetry", "group", "dev", "dependencies"])
                .into_iter()
                .map(str::to_ascii_lowercase);
        let uses_pytest = Self::has_table(&pyproject, &["tool", "pytest"])
            || deps.iter().any(|d| d == "pytest")
            || optional_deps.chain(poetry_dev).any(|d| d == "pytest");
        if uses_pytest {
            ctx.test_framework = Some("pytest".to_string());
        }

        let build = if Self::has_table(&pyproject, &["tool", "poetry"]) {
            "poetry"
        } else if Self::has_table(&pyproject, &["tool", "hatch"]) {
            "hatch"
        } else if Self::has_table(&pyproject, &["tool", "uv"]) {
            "uv"
        } else {
            "pip"
        };
        ctx.build_system = Some(build.to_string());
        Ok(())
    }
}

#[async_trait]
impl ContextProvider for ManifestContextProvider {
    async fn detect(&self) -> Result<ProjectContext> {
        let mut ctx = ProjectContext::new(&self.root);

        if let Some(manifest) = Self::read_optional(&self.root.join("Cargo.toml")).await? {
            Self::apply_cargo(&mut ctx, &manifest)?;
        } else if let Some(manifest) = Self::read_optional(&self.root.join("package.json")).await? {
            Self::apply_package_json(&mut ctx, &manifest, &self.root)?;
        } else if let Some(manifest) = Self::read_optional(&self.root.join("pyproject.toml")).await? {
            Self::apply_pyproject(&mut ctx, &manifest)?;
        } else {
            tracing::debug!(root = %self.root.display(), "No known manifest found");
        }

        ctx.framework = ctx.frameworks.first().cloned();
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("conductor-ctx-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_detects_cargo_project() {
        let root = temp_root();
        std::fs::write(
            root.join("Cargo.toml"),
            "[package]\nname = \"demo\"\n\n[dependencies]\naxum = \"0.7\"\ntokio = { version = \"1\" }\n",
        )
        .unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.language.as_deref(), Some("rust"));
        assert_eq!(ctx.build_system.as_deref(), Some("cargo"));
        assert_eq!(ctx.framework.as_deref(), Some("axum"));
        assert!(ctx.frameworks.contains(&"tokio".to_string()));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_cargo_table_dependencies_and_dev_only() {
        let root = temp_root();
        std::fs::write(
            root.join("Cargo.toml"),
            "[package]\nname = \"demo\"\n\n[dependencies.axum]\nversion = \"0.7\"\n\n[dev-dependencies]\ntokio = \"1\"\n",
        )
        .unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.frameworks, vec!["axum".to_string()]);
        assert!(!ctx.extra.contains_key("workspace"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_cargo_workspace_dependencies() {
        let root = temp_root();
        std::fs::write(
            root.join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n\n[workspace.dependencies]\nleptos = \"0.6\"\n",
        )
        .unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.framework.as_deref(), Some("leptos"));
        assert_eq!(ctx.extra.get("workspace").map(String::as_str), Some("true"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_pyproject_reads_declared_dependencies_only() {
        let root = temp_root();
        std::fs::write(
            root.join("pyproject.toml"),
            r#"[project]
name = "api"
description = "not a flask app"
dependencies = ["FastAPI[all]>=0.110", "uvicorn"]

[project.optional-dependencies]
test = ["pytest>=8"]
"#,
        )
        .unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.language.as_deref(), Some("python"));
        assert_eq!(ctx.frameworks, vec!["fastapi".to_string()]);
        assert_eq!(ctx.test_framework.as_deref(), Some("pytest"));
        assert_eq!(ctx.build_system.as_deref(), Some("pip"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_poetry_project() {
        let root = temp_root();
        std::fs::write(
            root.join("pyproject.toml"),
            "[tool.poetry]\nname = \"site\"\n\n[tool.poetry.dependencies]\npython = \"^3.12\"\nDjango = \"^5.0\"\n",
        )
        .unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.framework.as_deref(), Some("django"));
        assert_eq!(ctx.build_system.as_deref(), Some("poetry"));
        assert!(ctx.test_framework.is_none());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_malformed_cargo_manifest_is_an_error() {
        let root = temp_root();
        std::fs::write(root.join("Cargo.toml"), "[package\nname = ").unwrap();
        assert!(ManifestContextProvider::new(&root).detect().await.is_err());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_detects_node_project() {
        let root = temp_root();
        std::fs::write(
            root.join("package.json"),
            r#"{ "name": "web", "dependencies": { "react": "18" }, "devDependencies": { "typescript": "5", "vitest": "1" } }"#,
        )
        .unwrap();
        std::fs::write(root.join("pnpm-lock.yaml"), "").unwrap();

        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.language.as_deref(), Some("typescript"));
        assert_eq!(ctx.framework.as_deref(), Some("react"));
        assert_eq!(ctx.test_framework.as_deref(), Some("vitest"));
        assert_eq!(ctx.build_system.as_deref(), Some("pnpm"));
        assert_eq!(ctx.extra.get("package").map(String::as_str), Some("web"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_empty_root_yields_bare_context() {
        let root = temp_root();
        let ctx = ManifestContextProvider::new(&root).detect().await.unwrap();
        assert_eq!(ctx.root, root);
        assert!(ctx.language.is_none());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let snapshot = ProjectContext::new("/srv/app")
            .with_language("python")
            .with_framework("fastapi");
        let ctx = StaticContextProvider::new(snapshot.clone())
            .detect()
            .await
            .unwrap();
        assert_eq!(ctx, snapshot);
        assert_eq!(ctx.framework.as_deref(), Some("fastapi"));
    }
}
