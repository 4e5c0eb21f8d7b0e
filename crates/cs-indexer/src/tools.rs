use std::collections::HashMap;
use std::path::Path;

/// External indexer configuration for one language.
#[derive(Debug, Clone)]
pub struct IndexerTool {
    /// Binary name, resolved on PATH.
    pub command: String,
    /// Argument template; `{output}` is replaced with the artifact path.
    pub args: Vec<String>,
    /// Whether the tool can be reused as the incremental re-scanner.
    pub supports_incremental: bool,
    /// Suggested install command, surfaced when the binary is missing.
    pub install_hint: String,
}

impl IndexerTool {
    /// Render the argument template against a concrete output path.
    pub fn render_args(&self, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{output}", &output))
            .collect()
    }
}

/// Default language → indexer registry.
pub fn default_tools() -> HashMap<String, IndexerTool> {
    let mut tools = HashMap::new();
    tools.insert(
        "go".to_string(),
        IndexerTool {
            command: "scip-go".to_string(),
            args: vec!["--output".to_string(), "{output}".to_string()],
            supports_incremental: true,
            install_hint: "go install github.com/sourcegraph/scip-go/cmd/scip-go@latest"
                .to_string(),
        },
    );
    tools
}
