use std::path::PathBuf;

pub fn repurpose_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("repurpose"),
        None => std::env::temp_dir().join("repurpose"),
    }
}
