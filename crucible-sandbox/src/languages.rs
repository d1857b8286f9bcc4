//! Immutable language runner registry
//!
//! Built once at startup and injected into both sandbox backends; there is
//! no global mutable language table.

use crate::error::SandboxError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Command template for one step of a language runner.
///
/// `{file}` expands to the source file path, `{dir}` to the scratch
/// directory, `{bin}` to the compiled artifact path, `{class}` to the file
/// stem (Java entry class).
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Expand template placeholders against concrete paths.
    pub fn render(&self, file: &str, dir: &str, bin: &str) -> (String, Vec<String>) {
        let class = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Main")
            .to_string();
        let subst = |s: &str| {
            s.replace("{file}", file)
                .replace("{dir}", dir)
                .replace("{bin}", bin)
                .replace("{class}", &class)
        };
        (
            subst(&self.program),
            self.args.iter().map(|a| subst(a)).collect(),
        )
    }
}

/// Per-language execution description
#[derive(Debug, Clone)]
pub struct LanguageRunner {
    /// Canonical language id ("python", "cpp", ...)
    pub id: String,
    /// Accepted aliases, lower-case
    pub aliases: Vec<String>,
    /// Canonical source file name written into the scratch dir
    pub source_file: String,
    /// File extensions (with dot) used for detection in execute_file
    pub extensions: Vec<String>,
    pub needs_compile: bool,
    /// Local compile step (process backend), None for interpreted languages
    pub compile: Option<CommandTemplate>,
    /// Local run step (process backend)
    pub run: CommandTemplate,
    /// Container image for the container backend
    pub image: String,
    /// Shell command executed inside the container, relative to /work
    pub container_command: Vec<String>,
    /// Whether the container /tmp tmpfs must allow exec (compiled artifacts)
    pub needs_executable_tmp: bool,
}

impl LanguageRunner {
    /// Prepare source text for execution, scaffolding bare snippets the way
    /// users paste them (missing `fn main`, missing `package main`, ...).
    pub fn scaffold(&self, code: &str) -> String {
        match self.id.as_str() {
            "go" if !code.contains("package ") => format!("package main\n\n{code}"),
            "rust" if !code.contains("fn main") => format!("fn main() {{\n{code}\n}}"),
            "c" if !code.contains("#include") => {
                format!("#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n\n{code}")
            }
            "cpp" if !code.contains("#include") => format!(
                "#include <iostream>\n#include <vector>\n#include <string>\n#include <algorithm>\nusing namespace std;\n\n{code}"
            ),
            _ => code.to_string(),
        }
    }

    /// Source file name for this snippet. Java insists the file name match
    /// the public class.
    pub fn file_name(&self, code: &str) -> String {
        if self.id == "java" {
            if let Some(class) = extract_java_class(code) {
                return format!("{class}.java");
            }
        }
        self.source_file.clone()
    }

    /// The host program this runner needs: the compiler when there is a
    /// compile step, otherwise the interpreter.
    pub fn toolchain_program(&self) -> &str {
        match &self.compile {
            Some(compile) => &compile.program,
            None => &self.run.program,
        }
    }
}

fn extract_java_class(code: &str) -> Option<String> {
    // Cheap scan instead of a regex dependency: "public class <Ident>"
    let mut rest = code;
    while let Some(pos) = rest.find("public") {
        let tail = rest[pos + "public".len()..].trim_start();
        if let Some(tail) = tail.strip_prefix("class") {
            let tail = tail.trim_start();
            let name: String = tail
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Some(name);
            }
        }
        rest = &rest[pos + "public".len()..];
    }
    None
}

/// Immutable mapping from language id (and aliases/extensions) to runners
#[derive(Debug)]
pub struct LanguageRegistry {
    runners: HashMap<String, Arc<LanguageRunner>>,
    by_extension: HashMap<String, Arc<LanguageRunner>>,
    ids: Vec<String>,
}

impl LanguageRegistry {
    /// The built-in language table.
    pub fn builtin() -> Arc<Self> {
        let runners = vec![
            LanguageRunner {
                id: "python".into(),
                aliases: vec!["py".into(), "python3".into()],
                source_file: "main.py".into(),
                extensions: vec![".py".into()],
                needs_compile: false,
                compile: None,
                run: CommandTemplate::new("python3", &["-u", "{file}"]),
                image: "python:3.12-slim".into(),
                container_command: vec!["python3".into(), "-u".into(), "{file}".into()],
                needs_executable_tmp: false,
            },
            LanguageRunner {
                id: "javascript".into(),
                aliases: vec!["js".into(), "node".into(), "nodejs".into()],
                source_file: "main.js".into(),
                extensions: vec![".js".into(), ".mjs".into()],
                needs_compile: false,
                compile: None,
                run: CommandTemplate::new("node", &["{file}"]),
                image: "node:20-slim".into(),
                // --jitless avoids executable-memory denials under the seccomp profile
                container_command: vec!["node".into(), "--jitless".into(), "{file}".into()],
                needs_executable_tmp: false,
            },
            LanguageRunner {
                id: "typescript".into(),
                aliases: vec!["ts".into()],
                source_file: "main.ts".into(),
                extensions: vec![".ts".into()],
                needs_compile: false,
                compile: None,
                run: CommandTemplate::new("npx", &["ts-node", "--transpile-only", "{file}"]),
                image: "node:20-slim".into(),
                container_command: vec![
                    "npx".into(),
                    "ts-node".into(),
                    "--transpile-only".into(),
                    "{file}".into(),
                ],
                needs_executable_tmp: false,
            },
            LanguageRunner {
                id: "go".into(),
                aliases: vec!["golang".into()],
                source_file: "main.go".into(),
                extensions: vec![".go".into()],
                needs_compile: true,
                compile: Some(CommandTemplate::new("go", &["build", "-o", "{bin}", "{file}"])),
                run: CommandTemplate::new("{bin}", &[]),
                image: "golang:1.22".into(),
                container_command: vec!["sh".into(), "-c".into(), "go run {file}".into()],
                needs_executable_tmp: true,
            },
            LanguageRunner {
                id: "rust".into(),
                aliases: vec!["rs".into()],
                source_file: "main.rs".into(),
                extensions: vec![".rs".into()],
                needs_compile: true,
                compile: Some(CommandTemplate::new("rustc", &["-o", "{bin}", "{file}"])),
                run: CommandTemplate::new("{bin}", &[]),
                image: "rust:1.75-slim".into(),
                container_command: vec![
                    "sh".into(),
                    "-c".into(),
                    "rustc -o /tmp/main {file} && /tmp/main".into(),
                ],
                needs_executable_tmp: true,
            },
            LanguageRunner {
                id: "c".into(),
                aliases: vec![],
                source_file: "main.c".into(),
                extensions: vec![".c".into()],
                needs_compile: true,
                compile: Some(CommandTemplate::new("gcc", &["-o", "{bin}", "{file}", "-lm"])),
                run: CommandTemplate::new("{bin}", &[]),
                image: "gcc:13".into(),
                container_command: vec![
                    "sh".into(),
                    "-c".into(),
                    "gcc -o /tmp/main {file} -lm && /tmp/main".into(),
                ],
                needs_executable_tmp: true,
            },
            LanguageRunner {
                id: "cpp".into(),
                aliases: vec!["c++".into(), "cplusplus".into()],
                source_file: "main.cpp".into(),
                extensions: vec![".cpp".into(), ".cc".into(), ".cxx".into()],
                needs_compile: true,
                compile: Some(CommandTemplate::new(
                    "g++",
                    &["-o", "{bin}", "-std=c++17", "{file}"],
                )),
                run: CommandTemplate::new("{bin}", &[]),
                image: "gcc:13".into(),
                container_command: vec![
                    "sh".into(),
                    "-c".into(),
                    "g++ -o /tmp/main -std=c++17 {file} && /tmp/main".into(),
                ],
                needs_executable_tmp: true,
            },
            LanguageRunner {
                id: "java".into(),
                aliases: vec![],
                source_file: "Main.java".into(),
                extensions: vec![".java".into()],
                needs_compile: true,
                compile: Some(CommandTemplate::new("javac", &["-d", "{dir}", "{file}"])),
                run: CommandTemplate::new("java", &["-cp", "{dir}", "{class}"]),
                image: "eclipse-temurin:21-jdk".into(),
                container_command: vec![
                    "sh".into(),
                    "-c".into(),
                    "javac -d /tmp {file} && java -cp /tmp $(basename {file} .java)".into(),
                ],
                needs_executable_tmp: true,
            },
            LanguageRunner {
                id: "ruby".into(),
                aliases: vec!["rb".into()],
                source_file: "main.rb".into(),
                extensions: vec![".rb".into()],
                needs_compile: false,
                compile: None,
                run: CommandTemplate::new("ruby", &["{file}"]),
                image: "ruby:3.3-slim".into(),
                container_command: vec!["ruby".into(), "{file}".into()],
                needs_executable_tmp: false,
            },
            LanguageRunner {
                id: "php".into(),
                aliases: vec![],
                source_file: "main.php".into(),
                extensions: vec![".php".into()],
                needs_compile: false,
                compile: None,
                run: CommandTemplate::new("php", &["{file}"]),
                image: "php:8.3-cli".into(),
                container_command: vec!["php".into(), "{file}".into()],
                needs_executable_tmp: false,
            },
        ];
        Self::custom(runners)
    }

    /// Build a registry from an explicit runner table. Deployments with
    /// their own language set (and tests) use this instead of `builtin`.
    pub fn custom(runners: Vec<LanguageRunner>) -> Arc<Self> {
        let mut by_id = HashMap::new();
        let mut by_extension = HashMap::new();
        let mut ids = Vec::new();
        for runner in runners {
            let runner = Arc::new(runner);
            ids.push(runner.id.clone());
            by_id.insert(runner.id.clone(), Arc::clone(&runner));
            for alias in &runner.aliases {
                by_id.insert(alias.clone(), Arc::clone(&runner));
            }
            for ext in &runner.extensions {
                by_extension.insert(ext.clone(), Arc::clone(&runner));
            }
        }

        Arc::new(Self {
            runners: by_id,
            by_extension,
            ids,
        })
    }

    /// Resolve a language id or alias.
    pub fn get(&self, language: &str) -> Result<Arc<LanguageRunner>, SandboxError> {
        let key = language.trim().to_lowercase();
        self.runners
            .get(&key)
            .cloned()
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language.to_string()))
    }

    /// Detect a runner from a file path's extension.
    pub fn detect(&self, path: &Path) -> Result<Arc<LanguageRunner>, SandboxError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        self.by_extension
            .get(&ext)
            .cloned()
            .ok_or_else(|| SandboxError::UnsupportedLanguage(path.display().to_string()))
    }

    /// Canonical language ids, in registration order.
    pub fn language_ids(&self) -> Vec<String> {
        self.ids.clone()
    }

    /// Language ids whose toolchain is present on this host's PATH. Used by
    /// the process backend; containers carry their own toolchains.
    pub fn host_available_ids(&self) -> Vec<String> {
        self.ids
            .iter()
            .filter(|id| {
                self.runners
                    .get(*id)
                    .is_some_and(|r| program_on_path(r.toolchain_program()))
            })
            .cloned()
            .collect()
    }
}

fn program_on_path(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).exists();
    }
    std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
        })
        .unwrap_or(false)
}
