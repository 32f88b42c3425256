//! Built-in tools: file read/write, directory listing, text search and
//! command execution, all confined to the project root.
//!
//! | Tool | Name | Mutating |
//! |------|------|----------|
//! | [`ReadFile`] | `read_file` | no |
//! | [`WriteFile`] | `write_file` | yes |
//! | [`ListDirectory`] | `list_directory` | no |
//! | [`SearchInFiles`] | `search_in_files` | no |
//! | [`ExecuteCommand`] | `execute_command` | yes, unless the command only reads |

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::core::{DEFAULT_MAX_RESULT_BYTES, Danger, Tool, ToolFuture, parse_tool_args};
use super::locks::PathLocks;
use super::policy::CommandPolicy;
use super::spec::ToolSpec;
use crate::ToolDef;
use crate::error::ToolExecutionError;

/// Default maximum search matches returned.
pub const DEFAULT_MAX_SEARCH_MATCHES: usize = 50;

/// Bytes of grep output kept before matches are counted.
const SEARCH_CAPTURE_BYTES: usize = 1 << 20;

/// Settings shared by the built-in tool set.
#[derive(Debug, Clone)]
pub struct BuiltinConfig {
    pub max_search_matches: usize,
    /// Bytes of each command stream kept in memory; the rest is discarded.
    pub max_output_bytes: usize,
    pub policy: CommandPolicy,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            max_search_matches: DEFAULT_MAX_SEARCH_MATCHES,
            max_output_bytes: DEFAULT_MAX_RESULT_BYTES,
            policy: CommandPolicy::default(),
        }
    }
}

/// The five built-in tools for `root`. Writes share one lock table.
pub fn builtin_tools(root: &Path, config: &BuiltinConfig) -> Vec<Box<dyn Tool>> {
    let root = canonical_root(root);
    let locks = PathLocks::new();
    vec![
        Box::new(ReadFile::new(root.clone())),
        Box::new(WriteFile::new(root.clone(), locks)),
        Box::new(ListDirectory::new(root.clone())),
        Box::new(SearchInFiles::new(root.clone()).max_matches(config.max_search_matches)),
        Box::new(
            ExecuteCommand::new(root)
                .policy(config.policy.clone())
                .max_output_bytes(config.max_output_bytes),
        ),
    ]
}

// ── Typed argument structs ──────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File path relative to the project root (e.g. 'src/main.rs').
    pub path: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// File path relative to the project root. Parent directories are created.
    pub path: String,
    /// Complete new file content.
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ListDirectoryArgs {
    /// Directory path relative to the project root (default '.').
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct SearchInFilesArgs {
    /// Extended regex to search for (e.g. 'fn\s+main').
    pub pattern: String,
    /// Directory or file to search, relative to the project root (default '.').
    #[serde(default)]
    pub scope: Option<String>,
    /// File glob filter (e.g. '*.rs').
    #[serde(default)]
    pub glob: Option<String>,
    /// Case-insensitive search (default false).
    #[serde(default)]
    pub case_insensitive: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ExecuteCommandArgs {
    /// Program to run, or a full shell command line when `args` is omitted.
    pub command: String,
    /// Arguments passed directly to the program, without a shell.
    #[serde(default)]
    pub args: Vec<String>,
}

// ── Path containment ────────────────────────────────────────────────

fn canonical_root(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Resolve `relative` against `root`, rejecting anything that lands
/// outside it, including through `..` or symlinks.
pub fn resolve_in_project(root: &Path, relative: &str) -> Result<PathBuf, ToolExecutionError> {
    let joined = root.join(relative);

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ToolExecutionError::OutsideProject(relative.to_string()));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    if !normalized.starts_with(root) {
        return Err(ToolExecutionError::OutsideProject(relative.to_string()));
    }

    // Follow symlinks on the longest existing prefix.
    let mut existing = normalized.as_path();
    let mut suffix = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = std::fs::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    if !resolved.starts_with(root) {
        return Err(ToolExecutionError::OutsideProject(relative.to_string()));
    }
    for name in suffix.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

// ── ReadFile ────────────────────────────────────────────────────────

pub struct ReadFile {
    root: PathBuf,
}

impl ReadFile {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for ReadFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("read_file")
            .purpose("Read a text file from the project")
            .when_to_use("When you need the contents of a file whose path you know")
            .when_not_to_use(
                "When looking for which files mention something, use search_in_files. \
                 When exploring a directory, use list_directory",
            )
            .parameters_for::<ReadFileArgs>()
            .example("read_file(path='src/main.rs')", "the full file text")
            .output_format("Raw file content")
            .to_tool_def()
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = parse_tool_args(args)?;
            let path = resolve_in_project(&self.root, &args.path)?;
            if let Ok(meta) = fs::metadata(&path).await
                && meta.is_dir()
            {
                return Err(ToolExecutionError::Failed(format!(
                    "'{}' is a directory, not a file. Use list_directory to browse it.",
                    args.path
                )));
            }
            fs::read_to_string(&path)
                .await
                .map_err(|e| ToolExecutionError::io(&args.path, e))
        })
    }
}

// ── WriteFile ───────────────────────────────────────────────────────

pub struct WriteFile {
    root: PathBuf,
    locks: PathLocks,
}

impl WriteFile {
    pub fn new(root: impl Into<PathBuf>, locks: PathLocks) -> Self {
        Self {
            root: root.into(),
            locks,
        }
    }
}

impl Tool for WriteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("write_file")
            .purpose("Create or overwrite a file in the project with the given content")
            .when_to_use("When you need to create a file or replace a file's contents")
            .when_not_to_use(
                "When you only need to read a file, use read_file. \
                 Always read an existing file before overwriting it",
            )
            .parameters_for::<WriteFileArgs>()
            .example(
                "write_file(path='notes/todo.md', content='- fix tests\\n')",
                "Wrote 12 bytes to notes/todo.md",
            )
            .output_format("Confirmation with byte count")
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn describe_effect<'a>(&'a self, args: &'a serde_json::Value) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let args: WriteFileArgs = match parse_tool_args(args) {
                Ok(a) => a,
                Err(e) => return format!("fail: {e}"),
            };
            let path = match resolve_in_project(&self.root, &args.path) {
                Ok(p) => p,
                Err(e) => return format!("fail: {e}"),
            };
            match fs::read_to_string(&path).await {
                Ok(old) if old == args.content => {
                    format!("leave {} unchanged (content is identical)", args.path)
                }
                Ok(old) => {
                    let diff = similar::TextDiff::from_lines(old.as_str(), args.content.as_str());
                    format!(
                        "modify {}:\n{}",
                        args.path,
                        diff.unified_diff()
                            .context_radius(3)
                            .header(&format!("a/{}", args.path), &format!("b/{}", args.path))
                    )
                }
                Err(_) => {
                    let diff = similar::TextDiff::from_lines("", args.content.as_str());
                    format!(
                        "create {} ({} bytes):\n{}",
                        args.path,
                        args.content.len(),
                        diff.unified_diff()
                            .header("/dev/null", &format!("b/{}", args.path))
                    )
                }
            }
        })
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: WriteFileArgs = parse_tool_args(args)?;
            let path = resolve_in_project(&self.root, &args.path)?;
            let _guard = self.locks.acquire(&path).await;

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolExecutionError::io(&args.path, e))?;
            }

            // Write to a sibling temp file and rename so readers never see a
            // partial file.
            let tmp = TempFile::new(path.with_extension(format!(
                "{}helm-tmp",
                path.extension()
                    .map(|e| format!("{}.", e.to_string_lossy()))
                    .unwrap_or_default()
            )));
            fs::write(tmp.path(), args.content.as_bytes())
                .await
                .map_err(|e| ToolExecutionError::io(&args.path, e))?;
            fs::rename(tmp.path(), &path)
                .await
                .map_err(|e| ToolExecutionError::io(&args.path, e))?;
            tmp.persisted();

            debug!("Wrote {} bytes to {}", args.content.len(), path.display());
            Ok(format!(
                "Wrote {} bytes to {}",
                args.content.len(),
                display_relative(&self.root, &path)
            ))
        })
    }
}

/// A temp file that is removed when dropped, unless it was renamed into
/// place. Covers writes abandoned by a timeout or cancellation.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ── ListDirectory ───────────────────────────────────────────────────

pub struct ListDirectory {
    root: PathBuf,
}

impl ListDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for ListDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("list_directory")
            .purpose("List the entries of a project directory")
            .when_to_use("When you need to discover which files exist in a directory")
            .when_not_to_use(
                "When searching file contents, use search_in_files. \
                 When you know the file path, use read_file",
            )
            .parameters_for::<ListDirectoryArgs>()
            .example("list_directory(path='src')", "one entry per line, sorted")
            .output_format("One entry per line, sorted by name. Directories end with '/'.")
            .to_tool_def()
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ListDirectoryArgs = parse_tool_args(args)?;
            let rel = args.path.as_deref().unwrap_or(".");
            let path = resolve_in_project(&self.root, rel)?;

            let mut dir = fs::read_dir(&path)
                .await
                .map_err(|e| ToolExecutionError::io(rel, e))?;
            let mut entries = Vec::new();
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| ToolExecutionError::io(rel, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                entries.push(if is_dir { format!("{name}/") } else { name });
            }
            entries.sort();

            if entries.is_empty() {
                Ok("(empty directory)".to_string())
            } else {
                Ok(entries.join("\n"))
            }
        })
    }
}

// ── SearchInFiles ───────────────────────────────────────────────────

pub struct SearchInFiles {
    root: PathBuf,
    max_matches: usize,
}

impl SearchInFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_matches: DEFAULT_MAX_SEARCH_MATCHES,
        }
    }

    pub fn max_matches(mut self, max: usize) -> Self {
        self.max_matches = max;
        self
    }
}

impl Tool for SearchInFiles {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("search_in_files")
            .purpose("Search project files for lines matching a regex")
            .when_to_use("When you need to find where something is defined or used")
            .when_not_to_use("When you already know the file, use read_file")
            .parameters_for::<SearchInFilesArgs>()
            .example(
                "search_in_files(pattern='TODO', glob='*.rs')",
                "matching lines as path:line:text",
            )
            .output_format(format!(
                "Matching lines as path:line_number:text, at most {} matches",
                self.max_matches
            ))
            .to_tool_def()
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: SearchInFilesArgs = parse_tool_args(args)?;
            let scope = args.scope.as_deref().unwrap_or(".");
            let path = resolve_in_project(&self.root, scope)?;

            let mut cmd_args = vec![
                "-rnIE".to_string(),
                "--color=never".to_string(),
                "--exclude-dir=.git".to_string(),
            ];
            if args.case_insensitive.unwrap_or(false) {
                cmd_args.push("-i".to_string());
            }
            if let Some(glob) = &args.glob {
                cmd_args.push(format!("--include={glob}"));
            }
            cmd_args.push("--".to_string());
            cmd_args.push(args.pattern);
            let target = display_relative(&self.root, &path);
            cmd_args.push(if target.is_empty() { ".".to_string() } else { target });

            // grep exits 1 for "no matches".
            let output =
                run_command("grep", &cmd_args, &self.root, &[1], SEARCH_CAPTURE_BYTES).await?;
            let lines: Vec<&str> = output.lines().filter(|l| !l.is_empty()).collect();
            if lines.is_empty() {
                return Ok("No matches found".to_string());
            }
            let mut result = lines
                .iter()
                .take(self.max_matches)
                .map(|l| l.strip_prefix("./").unwrap_or(l))
                .collect::<Vec<_>>()
                .join("\n");
            if lines.len() > self.max_matches {
                result.push_str(&format!(
                    "\n[... {} more matches not shown; narrow the pattern or scope]",
                    lines.len() - self.max_matches
                ));
            }
            Ok(result)
        })
    }
}

// ── ExecuteCommand ──────────────────────────────────────────────────

pub struct ExecuteCommand {
    root: PathBuf,
    policy: CommandPolicy,
    max_output_bytes: usize,
}

impl ExecuteCommand {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            policy: CommandPolicy::default(),
            max_output_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

impl Tool for ExecuteCommand {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("execute_command")
            .purpose("Run a command in the project root and return its output")
            .when_to_use(
                "When you need to build, test, run git, or do anything the file tools cannot",
            )
            .when_not_to_use(
                "When a dedicated tool exists: read_file to read, write_file to write, \
                 search_in_files to search",
            )
            .parameters_for::<ExecuteCommandArgs>()
            .example(
                "execute_command(command='cargo', args=['test'])",
                "test output; non-zero exit is reported as a failure",
            )
            .example(
                "execute_command(command='git log --oneline | head -5')",
                "runs through sh -c when args is omitted",
            )
            .output_format(
                "stdout, then [stderr] and stderr if non-empty. Commands that only read \
                 (ls, cat, grep, git status/log/diff and similar, without redirection) \
                 also run in ASK mode",
            )
            .to_tool_def()
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn mutates(&self, args: &serde_json::Value) -> bool {
        match parse_tool_args::<ExecuteCommandArgs>(args) {
            Ok(a) if a.args.is_empty() => !self.policy.is_read_only(&a.command),
            Ok(a) => !self.policy.is_read_only_argv(&a.command, &a.args),
            Err(_) => true,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Danger {
        match parse_tool_args::<ExecuteCommandArgs>(args) {
            Ok(a) if a.args.is_empty() => self.policy.classify(&a.command),
            Ok(a) => self.policy.classify_argv(&a.command, &a.args),
            Err(_) => Danger::Safe,
        }
    }

    fn describe_effect<'a>(&'a self, args: &'a serde_json::Value) -> BoxFuture<'a, String> {
        let text = match parse_tool_args::<ExecuteCommandArgs>(args) {
            Ok(a) if a.args.is_empty() => format!("run `{}` in the project root", a.command),
            Ok(a) => format!(
                "run `{} {}` in the project root",
                a.command,
                a.args.join(" ")
            ),
            Err(e) => format!("fail: {e}"),
        };
        Box::pin(async move { text })
    }

    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ExecuteCommandArgs = parse_tool_args(args)?;
            if args.command.trim().is_empty() {
                return Err(ToolExecutionError::Failed("no command provided".into()));
            }
            let limit = self.max_output_bytes;
            if args.args.is_empty() {
                let sh_args = vec!["-c".to_string(), args.command];
                run_command("sh", &sh_args, &self.root, &[], limit).await
            } else {
                run_command(&args.command, &args.args, &self.root, &[], limit).await
            }
        })
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

fn format_output(stdout: &Captured, stderr: &Captured) -> String {
    let out = stdout.text();
    let err = stderr.text();
    if err.trim().is_empty() {
        out
    } else if out.is_empty() {
        format!("[stderr]\n{err}")
    } else {
        format!("{out}\n[stderr]\n{err}")
    }
}

/// One output stream of a child, kept up to a byte limit.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    total: usize,
}

impl Captured {
    fn text(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        if self.total > self.bytes.len() {
            format!(
                "{text}\n[output truncated: kept {} of {} bytes]",
                self.bytes.len(),
                self.total
            )
        } else {
            text.into_owned()
        }
    }
}

/// Read `pipe` to the end, keeping at most `limit` bytes. The rest is read
/// and discarded so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    limit: usize,
) -> std::io::Result<Captured> {
    let mut captured = Captured::default();
    let Some(mut pipe) = pipe else {
        return Ok(captured);
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            return Ok(captured);
        }
        let room = limit.saturating_sub(captured.bytes.len());
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
        captured.total += n;
    }
}

/// Run a program in `cwd` and capture its output.
///
/// At most `limit` bytes of each of stdout and stderr are kept. Exit codes
/// in `lenient_exit_codes` count as success (e.g. `&[1]` for grep's "no
/// matches"). The child is killed if the future is dropped, so an executor
/// timeout does not leave it running.
pub async fn run_command(
    program: &str,
    args: &[String],
    cwd: &Path,
    lenient_exit_codes: &[i32],
    limit: usize,
) -> Result<String, ToolExecutionError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolExecutionError::io(program, e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) = tokio::join!(
        read_capped(stdout, limit),
        read_capped(stderr, limit),
        child.wait()
    );
    let io = |e| ToolExecutionError::io(program, e);
    let (stdout, stderr, status) = (stdout.map_err(io)?, stderr.map_err(io)?, status.map_err(io)?);

    let text = format_output(&stdout, &stderr);
    let ok = status.success()
        || status
            .code()
            .is_some_and(|c| lenient_exit_codes.contains(&c));
    if ok {
        Ok(text)
    } else {
        Err(ToolExecutionError::NonZeroExit {
            status: status.to_string(),
            output: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_root(dir.path());
        (dir, root)
    }

    #[test]
    fn containment_rejects_escapes() {
        let (_dir, root) = project();
        assert!(resolve_in_project(&root, "src/main.rs").is_ok());
        assert!(resolve_in_project(&root, "./a/../b.txt").is_ok());
        assert!(matches!(
            resolve_in_project(&root, "../outside.txt"),
            Err(ToolExecutionError::OutsideProject(_))
        ));
        assert!(matches!(
            resolve_in_project(&root, "/etc/passwd"),
            Err(ToolExecutionError::OutsideProject(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn containment_follows_symlinks() {
        let (_dir, root) = project();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        assert!(matches!(
            resolve_in_project(&root, "link/secret.txt"),
            Err(ToolExecutionError::OutsideProject(_))
        ));
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_dir, root) = project();
        let write = WriteFile::new(root.clone(), PathLocks::new());
        let out = write
            .execute(&json!({"path": "nested/dir/a.txt", "content": "hello\n"}))
            .await
            .unwrap();
        assert_eq!(out, "Wrote 6 bytes to nested/dir/a.txt");

        let read = ReadFile::new(root.clone());
        let content = read.execute(&json!({"path": "nested/dir/a.txt"})).await.unwrap();
        assert_eq!(content, "hello\n");

        let leftovers: Vec<_> = std::fs::read_dir(root.join("nested/dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp file left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn read_directory_is_an_error() {
        let (_dir, root) = project();
        std::fs::create_dir(root.join("src")).unwrap();
        let err = ReadFile::new(root).execute(&json!({"path": "src"})).await.unwrap_err();
        assert!(err.to_string().contains("list_directory"));
    }

    #[tokio::test]
    async fn describe_write_shows_diff_without_writing() {
        let (_dir, root) = project();
        std::fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();
        let write = WriteFile::new(root.clone(), PathLocks::new());

        let preview = write
            .describe_effect(&json!({"path": "a.txt", "content": "one\nthree\n"}))
            .await;
        assert!(preview.starts_with("modify a.txt:"));
        assert!(preview.contains("-two"));
        assert!(preview.contains("+three"));
        assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "one\ntwo\n");

        let preview = write
            .describe_effect(&json!({"path": "new.txt", "content": "x\n"}))
            .await;
        assert!(preview.starts_with("create new.txt (2 bytes)"));
        assert!(!root.join("new.txt").exists());
    }

    #[tokio::test]
    async fn list_directory_sorted_with_dir_markers() {
        let (_dir, root) = project();
        std::fs::create_dir(root.join("src")).unwrap();
        std::fs::write(root.join("b.txt"), "").unwrap();
        std::fs::write(root.join("a.txt"), "").unwrap();

        let out = ListDirectory::new(root).execute(&json!({})).await.unwrap();
        assert_eq!(out, "a.txt\nb.txt\nsrc/");
    }

    #[tokio::test]
    async fn search_caps_matches() {
        let (_dir, root) = project();
        let body: String = (0..10).map(|i| format!("needle {i}\n")).collect();
        std::fs::write(root.join("hay.txt"), body).unwrap();

        let search = SearchInFiles::new(root.clone()).max_matches(3);
        let out = search.execute(&json!({"pattern": "needle"})).await.unwrap();
        assert!(out.starts_with("hay.txt:1:needle 0"), "{out}");
        assert!(out.contains("[... 7 more matches"));

        let none = search.execute(&json!({"pattern": "absent"})).await.unwrap();
        assert_eq!(none, "No matches found");
    }

    #[tokio::test]
    async fn execute_command_shell_and_argv() {
        let (_dir, root) = project();
        let exec = ExecuteCommand::new(root.clone());

        let out = exec.execute(&json!({"command": "echo hi | tr a-z A-Z"})).await.unwrap();
        assert_eq!(out.trim(), "HI");

        let out = exec
            .execute(&json!({"command": "echo", "args": ["a; b"]}))
            .await
            .unwrap();
        assert_eq!(out.trim(), "a; b");

        let err = exec.execute(&json!({"command": "exit 3"})).await.unwrap_err();
        assert!(matches!(err, ToolExecutionError::NonZeroExit { .. }));
    }

    #[test]
    fn execute_command_classification() {
        let exec = ExecuteCommand::new("/tmp");
        assert_eq!(exec.classify(&json!({"command": "ls"})), Danger::Safe);
        assert!(exec.classify(&json!({"command": "rm -r build"})).requires_confirmation());
        assert!(
            exec.classify(&json!({"command": "sudo", "args": ["ls"]}))
                .requires_confirmation()
        );
        assert!(matches!(
            exec.classify(&json!({"command": "rm -rf /"})),
            Danger::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn command_output_is_bounded_while_reading() {
        let (_dir, root) = project();
        let exec = ExecuteCommand::new(root).max_output_bytes(1000);

        let out = exec
            .execute(&json!({"command": "head -c 5000000 /dev/zero | tr '\\0' x"}))
            .await
            .unwrap();
        assert!(out.len() < 1100, "kept {} bytes", out.len());
        assert!(out.starts_with("xxxx"));
        assert!(out.ends_with("[output truncated: kept 1000 of 5000000 bytes]"), "{out}");

        let out = exec.execute(&json!({"command": "echo small"})).await.unwrap();
        assert_eq!(out, "small\n");
    }

    #[tokio::test]
    async fn read_capped_drains_past_the_limit() {
        let data = vec![b'y'; 100_000];
        let captured = read_capped(Some(data.as_slice()), 10).await.unwrap();
        assert_eq!(captured.bytes, b"yyyyyyyyyy");
        assert_eq!(captured.total, 100_000);
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let (_dir, root) = project();
        std::fs::create_dir_all(root.join("taken/inner")).unwrap();
        let write = WriteFile::new(root.clone(), PathLocks::new());

        let err = write
            .execute(&json!({"path": "taken", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::Io { .. }), "{err}");
        assert!(!root.join("taken.helm-tmp").exists());
    }

    #[test]
    fn temp_file_removed_unless_persisted() {
        let (_dir, root) = project();
        let abandoned = root.join("a.helm-tmp");
        std::fs::write(&abandoned, "partial").unwrap();
        drop(TempFile::new(abandoned.clone()));
        assert!(!abandoned.exists());

        let kept = root.join("b.helm-tmp");
        std::fs::write(&kept, "done").unwrap();
        TempFile::new(kept.clone()).persisted();
        assert!(kept.exists());
    }

    #[test]
    fn read_only_commands_are_not_mutations() {
        let exec = ExecuteCommand::new("/tmp");
        for args in [
            json!({"command": "ls -la src"}),
            json!({"command": "git status"}),
            json!({"command": "git log --oneline | head -5"}),
            json!({"command": "grep", "args": ["-rn", "foo", "src"]}),
        ] {
            assert!(!exec.mutates(&args), "{args}");
        }
        for args in [
            json!({"command": "cargo build"}),
            json!({"command": "ls > listing.txt"}),
            json!({"command": "git commit -am wip"}),
            json!({"command": "cat a && touch b"}),
            json!({"command": "find . -delete"}),
            json!({"command": "sh", "args": ["-c", "ls"]}),
        ] {
            assert!(exec.mutates(&args), "{args}");
        }
    }

    #[test]
    fn builtin_set_has_five_tools() {
        let (_dir, root) = project();
        let names: Vec<_> = builtin_tools(&root, &BuiltinConfig::default())
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(
            names,
            vec!["read_file", "write_file", "list_directory", "search_in_files", "execute_command"]
        );
    }
}
