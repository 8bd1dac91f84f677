use std::path::Path;

/// Converts an absolute path to one relative to `base_path`, falling back to
/// canonicalized comparison so symlinked workspace roots still resolve.
pub fn make_path_relative(path: &str, base_path: &str) -> String {
    let path_obj = Path::new(path);
    let base_path_obj = Path::new(base_path);

    if path_obj.is_relative() {
        return path.to_string();
    }

    match path_obj.strip_prefix(base_path_obj) {
        Ok(relative_path) => relative_path.to_string_lossy().to_string(),
        Err(_) => {
            let canonical_path = std::fs::canonicalize(path);
            let canonical_base = std::fs::canonicalize(base_path);

            match (canonical_path, canonical_base) {
                (Ok(canon_path), Ok(canon_base)) => match canon_path.strip_prefix(&canon_base) {
                    Ok(relative_path) => relative_path.to_string_lossy().to_string(),
                    Err(e) => {
                        tracing::warn!(
                            "failed to make '{}' relative to '{}': {e}",
                            canon_path.display(),
                            canon_base.display()
                        );
                        path.to_string()
                    }
                },
                _ => path.to_string(),
            }
        }
    }
}

/// Default root directory for allocated Git workspaces when
/// `MCP_GIT_WORKSPACE_PATH` is unset. Linux lands in `/var/tmp` rather than
/// `/tmp` so cloned repositories survive a tmpfs-backed `/tmp` and don't
/// burn RAM for what can be gigabytes of checked-out trees.
pub fn default_workspace_root() -> std::path::PathBuf {
    let dir_name = if cfg!(debug_assertions) {
        "mcp-git-workspaces-dev"
    } else {
        "mcp-git-workspaces"
    };

    if cfg!(target_os = "linux") {
        std::path::PathBuf::from("/var/tmp").join(dir_name)
    } else {
        std::env::temp_dir().join(dir_name)
    }
}
