//! Language server configuration.

use crate::error::{LspError, LspResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How to run the language server for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspConfig {
    /// Language identifier (e.g., "rust", "python").
    pub language: String,

    /// File extensions handled by this server, without the dot.
    pub extensions: Vec<String>,

    /// Command to run the server.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Files marking a workspace root (e.g., ["Cargo.toml"]).
    #[serde(default)]
    pub root_patterns: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LspConfig {
    pub fn new(
        language: impl Into<String>,
        command: impl Into<String>,
        extensions: Vec<impl Into<String>>,
    ) -> Self {
        Self {
            language: language.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            root_patterns: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_root_patterns(mut self, patterns: Vec<impl Into<String>>) -> Self {
        self.root_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// rust-analyzer.
    pub fn rust() -> Self {
        Self::new("rust", "rust-analyzer", vec!["rs"]).with_root_patterns(vec!["Cargo.toml"])
    }

    /// pyright.
    pub fn python() -> Self {
        Self::new("python", "pyright-langserver", vec!["py", "pyi"])
            .with_args(vec!["--stdio"])
            .with_root_patterns(vec!["pyproject.toml", "setup.py", "requirements.txt"])
    }

    /// typescript-language-server.
    pub fn typescript() -> Self {
        Self::new(
            "typescript",
            "typescript-language-server",
            vec!["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        )
        .with_args(vec!["--stdio"])
        .with_root_patterns(vec!["tsconfig.json", "package.json"])
    }

    /// gopls.
    pub fn go() -> Self {
        Self::new("go", "gopls", vec!["go"]).with_root_patterns(vec!["go.mod"])
    }

    /// clangd.
    pub fn cpp() -> Self {
        Self::new(
            "cpp",
            "clangd",
            vec!["c", "h", "cpp", "hpp", "cc", "cxx"],
        )
        .with_root_patterns(vec!["compile_commands.json", "CMakeLists.txt", ".clangd"])
    }

    /// Check if this server handles the given file extension.
    pub fn handles_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Whether this server is enabled and handles `path`.
    pub fn handles_path(&self, path: &Path) -> bool {
        self.enabled
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.handles_extension(ext))
    }

    /// Walk up from `file_path` to the nearest directory holding a root
    /// pattern.
    pub fn find_workspace_root(&self, file_path: &Path) -> Option<PathBuf> {
        let mut current = file_path.parent()?;

        loop {
            if self
                .root_patterns
                .iter()
                .any(|pattern| current.join(pattern).exists())
            {
                return Some(current.to_path_buf());
            }
            current = current.parent()?;
        }
    }
}

/// Presets for the servers we know how to run.
pub fn default_configs() -> Vec<LspConfig> {
    vec![
        LspConfig::rust(),
        LspConfig::python(),
        LspConfig::typescript(),
        LspConfig::go(),
        LspConfig::cpp(),
    ]
}

/// Load a JSON array of server configurations. A missing file yields the
/// presets.
pub fn load_configs(path: &Path) -> LspResult<Vec<LspConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No server config file, using presets");
            return Ok(default_configs());
        }
        Err(e) => return Err(LspError::Io(e)),
    };
    let configs: Vec<LspConfig> = serde_json::from_str(&content)?;
    debug!(path = %path.display(), count = configs.len(), "Loaded server configs");
    Ok(configs)
}

/// Protocol `languageId` for a file, from its extension.
pub fn language_id_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    let id = match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "json" => "json",
        "toml" => "toml",
        "md" => "markdown",
        _ => return None,
    };
    Some(id)
}
