use std::path::PathBuf;

pub fn app_data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("REELQUEUE_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|d| d.join("reelqueue"))
}

pub fn managed_bin_dir() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("bin"))
}

pub fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}
