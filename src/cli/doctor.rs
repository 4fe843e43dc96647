use anyhow::Result;

use crate::config::Config;
use crate::constants;
use crate::state::StateStore;

/// Create a managed root and its on-disk databases without starting a server.
pub async fn init(config: Config) -> Result<()> {
    let root = config
        .root_path
        .canonicalize()
        .or_else(|_| {
            std::fs::create_dir_all(&config.root_path)?;
            config.root_path.canonicalize()
        })
        .unwrap_or(config.root_path.clone());

    let db_dir = root.join(constants::DB_DIR_NAME);
    std::fs::create_dir_all(&db_dir)?;
    std::fs::create_dir_all(db_dir.join("vectors"))?;
    std::fs::create_dir_all(db_dir.join("fts"))?;

    StateStore::open(&db_dir.join(constants::STATE_DB_NAME))?;

    println!("Initialized managed root at {}", root.display());
    Ok(())
}

/// Sanity-check an existing installation: managed root exists, the state store
/// opens, and the global model cache directory is writable.
pub async fn run(config: Config) -> Result<()> {
    println!("Checking kbase installation...");

    let root = config
        .root_path
        .canonicalize()
        .unwrap_or(config.root_path.clone());
    let mut ok = true;

    if root.is_dir() {
        println!("  [ok] managed root: {}", root.display());
    } else {
        println!("  [fail] managed root does not exist: {}", root.display());
        ok = false;
    }

    let db_dir = root.join(constants::DB_DIR_NAME);
    match StateStore::open(&db_dir.join(constants::STATE_DB_NAME)) {
        Ok(state) => {
            let folders = state.list_folders().unwrap_or_default();
            println!("  [ok] state store opens ({} folder(s) tracked)", folders.len());
        }
        Err(e) => {
            println!("  [fail] state store failed to open: {e}");
            ok = false;
        }
    }

    match constants::get_global_models_cache_dir() {
        Ok(dir) => println!("  [ok] model cache dir: {}", dir.display()),
        Err(e) => {
            println!("  [fail] model cache dir unavailable: {e}");
            ok = false;
        }
    }

    if ok {
        println!("All checks passed.");
        Ok(())
    } else {
        anyhow::bail!("one or more checks failed")
    }
}
