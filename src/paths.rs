use std::path::PathBuf;

pub fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => {
            let path = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("screencal");
            let _ = std::fs::create_dir_all(&path);
            path
        }
        None => PathBuf::from("."),
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.toml")
}

pub fn default_events_dir() -> PathBuf {
    default_data_dir().join("events")
}

pub fn default_captures_dir() -> PathBuf {
    default_data_dir().join("captures")
}

pub fn default_logs_dir() -> PathBuf {
    default_data_dir().join("logs")
}
