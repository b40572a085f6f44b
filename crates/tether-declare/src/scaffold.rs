//! Writes a runnable wrapper around the declared child: declaration,
//! manifest, dependency list, entry script and container build file.
//!
//! The container build file is only written, never built.

use crate::declaration::{DECLARATION_FILE, Declaration};
use crate::error::DeclareError;
use crate::runtime::{ChildRuntime, launched_package, split_npm_version};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tether_mcp::ChildCommand;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRYPOINT_FILE: &str = "entrypoint.sh";
pub const DOCKERFILE: &str = "Dockerfile";

const WRAPPER_VERSION: &str = "0.1.0";
const WRAPPER_PORT: u16 = 8931;
const WRAPPER_PATH: &str = "/mcp";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    manifest_version: u32,
    id: &'a str,
    name: &'a str,
    description: &'a str,
    author: &'a str,
    version: &'a str,
    runtime: &'a str,
    entrypoint: &'a str,
    transport: Transport<'a>,
    tools: Vec<&'a str>,
    permissions: Vec<String>,
    high_risk_tools: Vec<&'a str>,
}

#[derive(Serialize)]
struct Transport<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    port: u16,
    path: &'a str,
}

/// Write every scaffold file into `dir` (created if missing) and return the
/// paths written, in order.
pub fn write_scaffold(
    dir: &Path,
    declaration: &Declaration,
    runtime: ChildRuntime,
) -> Result<Vec<PathBuf>, DeclareError> {
    std::fs::create_dir_all(dir)?;

    let command = ChildCommand::parse(&declaration.command)?;
    let (deps_file, deps) = match runtime {
        ChildRuntime::Node => ("package.json", render_package_json(declaration, &command)?),
        ChildRuntime::Python => ("requirements.txt", render_requirements(&command)),
    };

    let files = [
        (DECLARATION_FILE, declaration.to_json_pretty()?),
        (MANIFEST_FILE, render_manifest(declaration, runtime)?),
        (deps_file, deps),
        (ENTRYPOINT_FILE, render_entrypoint(&declaration.command)),
        (DOCKERFILE, render_dockerfile(runtime, deps_file)),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        tracing::debug!("Wrote {}", path.display());
        written.push(path);
    }

    make_executable(&dir.join(ENTRYPOINT_FILE))?;
    Ok(written)
}

fn render_manifest(declaration: &Declaration, runtime: ChildRuntime) -> Result<String, DeclareError> {
    let meta = &declaration.meta;
    let manifest = Manifest {
        manifest_version: 1,
        id: &meta.id,
        name: &meta.name,
        description: &meta.description,
        author: &meta.author,
        version: WRAPPER_VERSION,
        runtime: runtime.as_str(),
        entrypoint: ENTRYPOINT_FILE,
        transport: Transport {
            kind: "http",
            port: WRAPPER_PORT,
            path: WRAPPER_PATH,
        },
        tools: declaration.tools.iter().map(|t| t.name()).collect(),
        permissions: declaration.scopes().into_iter().collect(),
        high_risk_tools: declaration.high_risk_tools(),
    };
    Ok(serde_json::to_string_pretty(&manifest)? + "\n")
}

fn render_package_json(declaration: &Declaration, command: &ChildCommand) -> Result<String, DeclareError> {
    let mut dependencies = serde_json::Map::new();
    if let Some(package) = launched_package(command) {
        let (name, version) = split_npm_version(&package);
        dependencies.insert(
            name.to_string(),
            serde_json::Value::String(version.unwrap_or("latest").to_string()),
        );
    }
    let package = serde_json::json!({
        "name": declaration.meta.id,
        "version": WRAPPER_VERSION,
        "private": true,
        "description": declaration.meta.description,
        "dependencies": dependencies,
    });
    Ok(serde_json::to_string_pretty(&package)? + "\n")
}

fn render_requirements(command: &ChildCommand) -> String {
    let mut lines = Vec::new();
    match command.program_name() {
        "uv" | "uvx" => lines.push("uv".to_string()),
        "pipx" => lines.push("pipx".to_string()),
        _ => {}
    }
    if let Some(package) = launched_package(command) {
        lines.push(package);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_entrypoint(command: &str) -> String {
    format!(
        "#!/bin/sh\nset -e\nexec tether serve --command {}\n",
        shell_quote(command)
    )
}

fn render_dockerfile(runtime: ChildRuntime, deps_file: &str) -> String {
    let install = match runtime {
        ChildRuntime::Node => "RUN npm install --omit=dev",
        ChildRuntime::Python => "RUN pip install --no-cache-dir -r requirements.txt",
    };
    format!(
        "FROM {image}
WORKDIR /app
COPY {deps_file} ./
{install}
COPY tether /usr/local/bin/tether
COPY {ENTRYPOINT_FILE} {DECLARATION_FILE} {MANIFEST_FILE} ./
RUN chmod +x {ENTRYPOINT_FILE}
ENV TETHER_LISTEN=0.0.0.0:{WRAPPER_PORT}
ENV TETHER_PATH={WRAPPER_PATH}
EXPOSE {WRAPPER_PORT}
ENTRYPOINT [\"./{ENTRYPOINT_FILE}\"]
",
        image = runtime.base_image(),
    )
}

/// Single-quote for POSIX sh.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
