//! Shared test utilities for modsmith integration tests.
//!
//! - [`ScriptedModel`] replays canned replies and records every request.
//! - [`FakeSandbox`] provisions in-memory environments that understand
//!   just enough of the `dagger` CLI (`init`, `functions`) to verify a
//!   module without docker.
//! - [`docs_fixture`] and [`module_fixture`] lay out document trees on disk
//!   for [`LocalDocumentSource`](modsmith_core::reference::LocalDocumentSource).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};

use modsmith_core::llm::{ContentBlock, LlmError, Model, ModelReply, TurnRequest};
use modsmith_core::sandbox::{Environment, ExecOutput, Expect, RunOptions, Sandbox};
use modsmith_core::Convention;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A model that replays a fixed script of replies.
///
/// Running past the end of the script is a model error, so a test that
/// under-scripts a session fails loudly.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Text of the opening user message of the first request.
    pub fn first_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let first = requests.first().expect("model was never called");
        match &first.messages[0].content[0] {
            ContentBlock::Text { text } => text.clone(),
            other => panic!("expected a text prompt, got {other:?}"),
        }
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &TurnRequest) -> Result<ModelReply, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".into()))
    }
}

/// A reply that calls one tool.
pub fn tool_use(id: &str, name: &str, input: Value) -> ModelReply {
    ModelReply {
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        stop_reason: Some("tool_use".to_string()),
    }
}

/// A `write` call.
pub fn write_call(id: &str, content: &str) -> ModelReply {
    tool_use(id, "write", json!({ "content": content }))
}

/// A `test` call.
pub fn test_call(id: &str) -> ModelReply {
    tool_use(id, "test", json!({}))
}

/// A `read` call.
pub fn read_call(id: &str) -> ModelReply {
    tool_use(id, "read", json!({}))
}

/// The tool results carried by the last message of `request`.
pub fn tool_results(request: &TurnRequest) -> Vec<(String, bool)> {
    request
        .messages
        .last()
        .map(|m| {
            m.content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult {
                        content, is_error, ..
                    } => Some((content.clone(), *is_error)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// A Go module that exports one function.
pub const REVERSE_GO: &str = r#"package main

type Reverser struct{}

// Reverse returns s with its characters in reverse order
func (m *Reverser) Reverse(s string) string {
	r := []rune(s)
	for i, j := 0, len(r)-1; i < j; i, j = i+1, j-1 {
		r[i], r[j] = r[j], r[i]
	}
	return string(r)
}
"#;

/// A Go module that does not parse.
pub const BROKEN_GO: &str = "package main\n\nfunc (m *Reverser) Reverse(s string) string {\n\treturn s\n";

/// One thing done to a fake environment, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `set_env(key, value)`.
    Env(String, String),
    /// A command run, space-joined.
    Command(String),
}

/// Shared record of everything the fake sandbox did.
#[derive(Debug, Default)]
pub struct SandboxLog {
    pub provisioned: AtomicUsize,
    pub discarded: AtomicUsize,
    steps: Mutex<Vec<Step>>,
}

impl SandboxLog {
    /// Every env change and command across all environments.
    pub fn steps(&self) -> Vec<Step> {
        self.steps.lock().unwrap().clone()
    }

    /// Every command run, space-joined, across all environments.
    pub fn commands(&self) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter_map(|step| match step {
                Step::Command(c) => Some(c),
                Step::Env(..) => None,
            })
            .collect()
    }

    fn record(&self, step: Step) {
        self.steps.lock().unwrap().push(step);
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

/// In-memory [`Sandbox`].
#[derive(Debug, Default)]
pub struct FakeSandbox {
    log: Arc<SandboxLog>,
    fail_provision: bool,
}

impl FakeSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sandbox whose every provision fails.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            fail_provision: true,
            ..Self::default()
        })
    }

    pub fn log(&self) -> Arc<SandboxLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn name(&self) -> &str {
        "fake"
    }

    async fn provision(&self, base_image: &str) -> Result<Box<dyn Environment>> {
        if self.fail_provision {
            bail!("cannot provision {base_image}: sandbox unavailable");
        }
        let n = self.log.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEnvironment {
            id: format!("fake-{n}"),
            workdir: "/".to_string(),
            dirs: Mutex::new(BTreeSet::from(["/".to_string()])),
            files: Mutex::new(BTreeMap::new()),
            module: Mutex::new(None),
            discarded: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        }))
    }
}

/// An environment backed by a map of absolute paths.
#[derive(Debug)]
pub struct FakeEnvironment {
    id: String,
    workdir: String,
    /// Directories that exist. Commands cannot start in any other workdir.
    dirs: Mutex<BTreeSet<String>>,
    files: Mutex<BTreeMap<String, String>>,
    /// `(name, convention, module dir)` recorded by `dagger init`.
    module: Mutex<Option<(String, Convention, String)>>,
    discarded: AtomicBool,
    log: Arc<SandboxLog>,
}

impl FakeEnvironment {
    fn absolute(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.workdir.trim_end_matches('/'), path)
        }
    }

    /// Create `dir` and every ancestor.
    fn mkdir_all(&self, dir: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            dirs.insert(current.clone());
        }
    }

    fn ok(stdout: impl Into<String>) -> ExecOutput {
        ExecOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn fail(stderr: impl Into<String>) -> ExecOutput {
        ExecOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn dagger(&self, args: &[String]) -> ExecOutput {
        match args.first().map(String::as_str) {
            Some("init") => {
                let flag = |name: &str| {
                    args.iter()
                        .position(|a| a == name)
                        .and_then(|i| args.get(i + 1))
                        .cloned()
                };
                let (Some(name), Some(sdk)) = (flag("--name"), flag("--sdk")) else {
                    return Self::fail("dagger init: --name and --sdk are required");
                };
                let Ok(convention) = sdk.parse::<Convention>() else {
                    return Self::fail(format!("unknown sdk {sdk:?}"));
                };
                *self.module.lock().unwrap() = Some((name, convention, self.workdir.clone()));
                Self::ok("Initialized module\n")
            }
            Some("functions") => self.functions(),
            _ => Self::fail(format!("unsupported dagger command: {}", args.join(" "))),
        }
    }

    /// List the functions of the initialised module.
    fn functions(&self) -> ExecOutput {
        let Some((name, convention, dir)) = self.module.lock().unwrap().clone() else {
            return Self::fail("no module found; run dagger init first");
        };
        let path = format!("{dir}/{}", convention.module_file_path(&name));
        let Some(source) = self.files.lock().unwrap().get(&path).cloned() else {
            return Self::fail(format!("{path}: no such file"));
        };
        match introspect(convention, &source) {
            Ok(functions) => {
                let mut out = String::from("Name\n");
                for f in functions {
                    out.push_str(&f);
                    out.push('\n');
                }
                Self::ok(out)
            }
            Err(e) => Self::fail(format!("{path}: {e}")),
        }
    }
}

/// Function names declared in `source`, or why the module does not load.
fn introspect(convention: Convention, source: &str) -> std::result::Result<Vec<String>, String> {
    let opens = source.matches('{').count();
    let closes = source.matches('}').count();
    if opens != closes {
        return Err(format!("syntax error: {opens} '{{' but {closes} '}}'"));
    }

    let marker = match convention {
        Convention::Go => "func ",
        Convention::Python => "def ",
        Convention::Typescript => "@func()",
        Convention::Php => "function ",
        Convention::Java => "@Function",
    };
    let functions: Vec<String> = source
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let idx = line.find(marker)?;
            let rest = &line[idx + marker.len()..];
            // Go methods: skip the receiver.
            let rest = if rest.starts_with('(') {
                rest.split_once(") ").map(|(_, r)| r).unwrap_or(rest)
            } else {
                rest
            };
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            (!name.is_empty()).then(|| name.to_lowercase())
        })
        .collect();

    if functions.is_empty() {
        return Err("module declares no functions".to_string());
    }
    Ok(functions)
}

#[async_trait]
impl Environment for FakeEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_env(&mut self, key: &str, value: &str) {
        self.log.record(Step::Env(key.to_string(), value.to_string()));
    }

    fn set_workdir(&mut self, path: &str) {
        self.workdir = path.to_string();
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    async fn put_file(&self, path: &str, contents: &str) -> Result<()> {
        if self.discarded.load(Ordering::SeqCst) {
            bail!("environment {} has been discarded", self.id);
        }
        let path = self.absolute(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.mkdir_all(parent);
        }
        self.files.lock().unwrap().insert(path, contents.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let path = self.absolute(path);
        match self.files.lock().unwrap().get(&path) {
            Some(contents) => Ok(contents.clone()),
            None => bail!("{path}: no such file"),
        }
    }

    async fn run(&self, argv: &[String], options: RunOptions) -> Result<ExecOutput> {
        if self.discarded.load(Ordering::SeqCst) {
            bail!("environment {} has been discarded", self.id);
        }
        if !self.dirs.lock().unwrap().contains(&self.workdir) {
            bail!(
                "chdir to cwd ({:?}) set in config: no such file or directory",
                self.workdir
            );
        }
        self.log.record(Step::Command(argv.join(" ")));

        let output = match argv.first().map(String::as_str) {
            Some(bin) if bin.ends_with("dagger") => {
                if !options.privileged {
                    Self::fail("dagger needs a privileged environment")
                } else {
                    self.dagger(&argv[1..])
                }
            }
            Some("apk") | Some("sh") => Self::ok(""),
            Some("mkdir") => {
                for dir in argv[1..].iter().filter(|a| !a.starts_with('-')) {
                    let dir = self.absolute(dir);
                    self.mkdir_all(&dir);
                }
                Self::ok("")
            }
            Some("cat") => match argv.get(1) {
                Some(path) => match self.read_file(path).await {
                    Ok(contents) => Self::ok(contents),
                    Err(e) => Self::fail(e.to_string()),
                },
                None => Self::fail("cat: missing operand"),
            },
            _ => Self::fail(format!("{}: command not found", argv.join(" "))),
        };

        if options.expect == Expect::Success && !output.success() {
            bail!("`{}` failed: {}", argv.join(" "), output.stderr);
        }
        Ok(output)
    }

    async fn discard(&self) -> Result<()> {
        if !self.discarded.swap(true, Ordering::SeqCst) {
            self.log.discarded.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document fixtures
// ---------------------------------------------------------------------------

/// A docs tree with a `bind-services` snippet for every convention.
pub fn docs_fixture() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().expect("failed to create docs fixture");
    for convention in Convention::ALL {
        let snippet = dir
            .path()
            .join("docs/current_docs/api/snippets/services/bind-services")
            .join(convention.as_str())
            .join(convention.snippet_path());
        write(&snippet, &format!("// bind services in {convention}\n"));
    }
    dir
}

/// Lay out a module named `name` at `root/subpath`: a `dagger.json` and
/// the canonical source file for `convention`.
pub fn module_fixture(root: &Path, subpath: &str, name: &str, convention: Convention, code: &str) {
    let dir = root.join(subpath);
    write(
        &dir.join("dagger.json"),
        &json!({ "name": name, "sdk": { "source": convention.as_str() } }).to_string(),
    );
    write(&dir.join(convention.module_file_path(name)), code);
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create fixture directory");
    }
    std::fs::write(path, contents).expect("failed to write fixture file");
}
