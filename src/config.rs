use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Client-side configuration for one sync pass (§6 CLI surface): a
/// MetaStore address, a base directory to reconcile, and the chunk size
/// used when splitting files into blocks.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub metastore_addr: String,
    pub base_dir: PathBuf,
    pub block_size: usize,
}

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

impl SyncConfig {
    /// Resolves final settings from CLI flags and environment variables,
    /// in that precedence order (CLI flag > env var > default), and
    /// normalizes `base_dir` to an absolute, lexically-cleaned path.
    pub fn resolve(
        metastore_addr_flag: Option<String>,
        base_dir_flag: Option<PathBuf>,
        block_size_flag: Option<usize>,
    ) -> anyhow::Result<Self> {
        let metastore_addr = metastore_addr_flag
            .or_else(|| std::env::var("SURFSTORE_METASTORE_ADDR").ok())
            .ok_or_else(|| anyhow::anyhow!("no metastore address given (--metastore or SURFSTORE_METASTORE_ADDR)"))?;

        let base_dir = base_dir_flag
            .or_else(|| std::env::var("SURFSTORE_BASE_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let base_dir = absolutize_path(&base_dir);

        let block_size = block_size_flag
            .or_else(|| {
                std::env::var("SURFSTORE_BLOCK_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        Ok(SyncConfig {
            metastore_addr,
            base_dir,
            block_size,
        })
    }
}

/// Server-side configuration shared by `serve-meta` and `serve-block`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub data_dir: Option<PathBuf>,
    pub block_store_addrs: Vec<String>,
}

impl ServerConfig {
    pub fn resolve(
        addr_flag: Option<String>,
        data_dir_flag: Option<PathBuf>,
        block_store_flags: Vec<String>,
    ) -> Self {
        let addr = addr_flag
            .or_else(|| std::env::var("SURFSTORE_ADDR").ok())
            .unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let data_dir = data_dir_flag.or_else(|| std::env::var("SURFSTORE_DATA_DIR").ok().map(PathBuf::from));

        let block_store_addrs = if !block_store_flags.is_empty() {
            block_store_flags
        } else {
            std::env::var("SURFSTORE_BLOCK_STORE_ADDRS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default()
        };

        ServerConfig {
            addr,
            data_dir,
            block_store_addrs,
        }
    }
}

pub fn default_log_file_path() -> PathBuf {
    home_dir().join(".surfstore").join("logs").join("surfstore.log")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn absolutize_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let abs = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };
    let cleaned = clean_lexical(&abs);
    std::fs::canonicalize(&cleaned).unwrap_or(cleaned)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(c)) if c == OsStr::new("~") => {
            let mut out = home_dir();
            for c in components {
                out.push(c.as_os_str());
            }
            out
        }
        _ => path.to_path_buf(),
    }
}

fn clean_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => {
                if !pop_normal_component(&mut out) && !out.as_os_str().is_empty() {
                    out.push("..");
                }
            }
            Component::Normal(p) => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

fn pop_normal_component(path: &mut PathBuf) -> bool {
    let mut comps = path.components().collect::<Vec<_>>();
    match comps.pop() {
        Some(Component::Normal(_)) => {
            *path = rebuild_components(&comps);
            true
        }
        Some(Component::Prefix(_)) | Some(Component::RootDir) | None => false,
        Some(Component::CurDir) => {
            *path = rebuild_components(&comps);
            false
        }
        Some(Component::ParentDir) => {
            *path = rebuild_components(&comps);
            false
        }
    }
}

fn rebuild_components(components: &[Component<'_>]) -> PathBuf {
    let mut out = PathBuf::new();
    for c in components {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => out.push(".."),
            Component::Normal(p) => out.push(p),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: once_cell::sync::Lazy<Mutex<()>> = once_cell::sync::Lazy::new(|| Mutex::new(()));

    struct EnvGuard {
        saved: HashMap<String, Option<String>>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let mut saved = HashMap::new();
            for k in keys {
                saved.insert((*k).to_string(), env::var(k).ok());
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain() {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn sync_config_prefers_flag_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(&["SURFSTORE_METASTORE_ADDR"]);
        env::set_var("SURFSTORE_METASTORE_ADDR", "env-addr:1");
        let cfg = SyncConfig::resolve(Some("flag-addr:2".to_string()), None, None).unwrap();
        assert_eq!(cfg.metastore_addr, "flag-addr:2");
    }

    #[test]
    fn sync_config_requires_a_metastore_address() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(&["SURFSTORE_METASTORE_ADDR"]);
        env::remove_var("SURFSTORE_METASTORE_ADDR");
        assert!(SyncConfig::resolve(None, None, None).is_err());
    }

    #[test]
    fn sync_config_defaults_block_size() {
        let _lock = ENV_LOCK.lock().unwrap();
        let cfg = SyncConfig::resolve(Some("a:1".to_string()), Some(PathBuf::from(".")), None).unwrap();
        assert_eq!(cfg.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn server_config_parses_comma_separated_env_addrs() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(&["SURFSTORE_BLOCK_STORE_ADDRS"]);
        env::set_var("SURFSTORE_BLOCK_STORE_ADDRS", "a:1, b:2");
        let cfg = ServerConfig::resolve(None, None, Vec::new());
        assert_eq!(cfg.block_store_addrs, vec!["a:1".to_string(), "b:2".to_string()]);
    }

    #[test]
    fn clean_lexical_collapses_dot_segments() {
        let cleaned = clean_lexical(Path::new("/a/./b/../c"));
        assert_eq!(cleaned, PathBuf::from("/a/c"));
    }
}
