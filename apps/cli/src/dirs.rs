use std::path::PathBuf;

const APP_DIR_NAME: &str = "usage-meter";

/// `$USAGE_METER_CONFIG_DIR`, else `$XDG_CONFIG_HOME/usage-meter`, else
/// `$HOME/.config/usage-meter`.
pub fn config_dir() -> Result<PathBuf, String> {
    if let Some(dir) = non_empty_var("USAGE_METER_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(base) = non_empty_var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(base).join(APP_DIR_NAME));
    }
    Ok(home_dir()?.join(".config").join(APP_DIR_NAME))
}

pub fn default_data_dir() -> Result<PathBuf, String> {
    if let Some(base) = non_empty_var("XDG_DATA_HOME") {
        return Ok(PathBuf::from(base).join(APP_DIR_NAME));
    }
    Ok(home_dir()?
        .join(".local")
        .join("share")
        .join(APP_DIR_NAME))
}

fn home_dir() -> Result<PathBuf, String> {
    let home = std::env::var("HOME").map_err(|err| format!("resolve HOME: {}", err))?;
    Ok(PathBuf::from(home))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
