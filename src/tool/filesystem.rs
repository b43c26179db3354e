// dtsflow — Filesystem operations (list_files, read_file, write_file)

use super::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

fn validate_path(path: &str, workspace: &str, restrict: bool) -> Result<PathBuf, String> {
    if workspace.is_empty() {
        return Ok(PathBuf::from(path));
    }

    let abs_workspace =
        std::fs::canonicalize(workspace).unwrap_or_else(|_| normalize(Path::new(workspace)));

    let abs_path = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        abs_workspace.join(path)
    };

    let abs_path = resolve_existing(&normalize(&abs_path));

    if restrict && !abs_path.starts_with(&abs_workspace) {
        return Err("access denied: path is outside the workspace".into());
    }

    Ok(abs_path)
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix of `path` (following symlinks)
/// and re-append the components that do not exist yet.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn required_str<'a>(args: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolResult::error(format!("{} is required", key)))
}

fn flag(args: &HashMap<String, Value>, key: &str) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ListFilesTool
// ---------------------------------------------------------------------------

/// Lists files under a directory as `{"files": [...]}`, sorted, so the
/// result can drive a loop directly.
pub struct ListFilesTool {
    workspace: String,
    restrict: bool,
}

impl ListFilesTool {
    pub fn new(workspace: String, restrict: bool) -> Self {
        Self {
            workspace,
            restrict,
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }
    fn description(&self) -> &str {
        "List files in a directory, optionally filtered by extension"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": { "type": "string", "description": "Directory to list" },
                "extension": { "type": "string", "description": "Only include files with this extension (e.g. dtsx)" },
                "recursive": { "type": "boolean", "description": "Descend into subdirectories" }
            },
            "required": ["directory"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        let directory = match required_str(&args, "directory") {
            Ok(d) => d,
            Err(e) => return e,
        };
        let extension = args
            .get("extension")
            .and_then(|v| v.as_str())
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty());
        let recursive = flag(&args, "recursive");

        let root = match validate_path(directory, &self.workspace, self.restrict) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let mut files = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) => {
                    return ToolResult::error(format!(
                        "failed to read directory {}: {}",
                        dir.display(),
                        e
                    ))
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_dir = entry.file_type().await.is_ok_and(|ft| ft.is_dir());
                if is_dir {
                    if recursive {
                        pending.push(path);
                    }
                    continue;
                }
                let matches = extension.as_ref().map_or(true, |want| {
                    path.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(want))
                });
                if matches {
                    files.push(path.to_string_lossy().to_string());
                }
            }
        }

        files.sort();
        ToolResult::success(json!({ "files": files }).to_string())
    }
}

// ---------------------------------------------------------------------------
// ReadFileTool
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    workspace: String,
    restrict: bool,
}

impl ReadFileTool {
    pub fn new(workspace: String, restrict: bool) -> Self {
        Self {
            workspace,
            restrict,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let resolved = match validate_path(path, &self.workspace, self.restrict) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(format!("failed to read file: {}", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// WriteFileTool
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    workspace: String,
    restrict: bool,
}

impl WriteFileTool {
    pub fn new(workspace: String, restrict: bool) -> Self {
        Self {
            workspace,
            restrict,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write content to a file (creates parent directories)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to write" },
                "content": { "type": "string", "description": "Content to write to the file" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("content is required"),
        };

        let resolved = match validate_path(path, &self.workspace, self.restrict) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("failed to create directory: {}", e));
            }
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(_) => ToolResult::success(resolved.to_string_lossy().to_string()),
            Err(e) => ToolResult::error(format!("failed to write file: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_validate_path_absolute() {
        let result = validate_path("/tmp/test.txt", "/tmp", true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_path_outside_workspace() {
        let result = validate_path("/etc/passwd", "/tmp", true);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_path_unrestricted() {
        let result = validate_path("/etc/passwd", "/tmp", false);
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_path_folds_parent_components() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let ws = ws.to_string_lossy().to_string();

        assert!(validate_path("../escaped.txt", &ws, true).is_err());
        assert!(validate_path("new/../../escaped.txt", &ws, true).is_err());

        let inside = validate_path("new/dir/../ok.txt", &ws, true).unwrap();
        assert!(inside.ends_with("ws/new/ok.txt"));
    }

    #[tokio::test]
    async fn test_write_outside_workspace_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let writer = WriteFileTool::new(ws.to_string_lossy().to_string(), true);

        let result = writer
            .execute(args(&[("path", json!("../escaped.txt")), ("content", json!("x"))]))
            .await;
        assert!(result.is_error, "{}", result.content);
        assert!(!tmp.path().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_list_files_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.dtsx"), "").unwrap();
        std::fs::write(tmp.path().join("a.DTSX"), "").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.dtsx"), "").unwrap();

        let tool = ListFilesTool::new(String::new(), false);
        let dir = tmp.path().to_string_lossy().to_string();

        let flat = tool
            .execute(args(&[("directory", json!(dir)), ("extension", json!(".dtsx"))]))
            .await;
        assert!(!flat.is_error, "{}", flat.content);
        let parsed: Value = serde_json::from_str(&flat.content).unwrap();
        let files: Vec<&str> = parsed["files"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.DTSX"));
        assert!(files[1].ends_with("b.dtsx"));

        let deep = tool
            .execute(args(&[
                ("directory", json!(dir)),
                ("extension", json!("dtsx")),
                ("recursive", json!("true")),
            ]))
            .await;
        let parsed: Value = serde_json::from_str(&deep.content).unwrap();
        assert_eq!(parsed["files"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_files_missing_directory() {
        let tool = ListFilesTool::new(String::new(), false);
        let result = tool.execute(HashMap::new()).await;
        assert!(result.is_error);
        assert_eq!(result.content, "directory is required");
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().to_string_lossy().to_string();
        let writer = WriteFileTool::new(ws.clone(), true);
        let reader = ReadFileTool::new(ws, true);

        let written = writer
            .execute(args(&[("path", json!("out/x.txt")), ("content", json!("hello"))]))
            .await;
        assert!(!written.is_error, "{}", written.content);

        let read = reader.execute(args(&[("path", json!("out/x.txt"))])).await;
        assert_eq!(read.content, "hello");
    }
}
