use klangconfig::Config;
use serde_yaml::Value;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_load_defaults_into_fresh_directory() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = Config::load_config(dir.path().to_str().unwrap())?;

    assert_eq!(config.get_http_port(), 5002);
    assert_eq!(config.get_u64_or(&["stream", "url_ttl_secs"], 0), 10800);
    assert_eq!(
        config.get_u64_or(&["stream", "max_concurrent_extractions"], 0),
        2
    );
    assert_eq!(config.get_string_or(&["stream", "tool", "format"], ""), "251");
    assert!(dir.path().join("config.yaml").exists());
    Ok(())
}

#[test]
fn test_external_file_overrides_defaults() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("config.yaml"),
        "host:\n  http_port: 6000\nstream:\n  tool:\n    extra_args: [\"--no-playlist\"]\n",
    )?;

    let config = Config::load_config(dir.path().to_str().unwrap())?;

    assert_eq!(config.get_http_port(), 6000);
    // Les clés absentes du fichier gardent leur valeur par défaut
    assert_eq!(config.get_string_or(&["stream", "tool", "path"], ""), "yt-dlp");
    assert_eq!(
        config.get_string_list(&["stream", "tool", "extra_args"]),
        vec!["--no-playlist".to_string()]
    );
    Ok(())
}

#[test]
fn test_set_value_is_persisted() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().to_str().unwrap().to_string();

    let config = Config::load_config(&path)?;
    config.set_http_port(5010)?;
    config.set_value(&["stream", "prefetch", "window"], Value::from(4))?;

    let reloaded = Config::load_config(&path)?;
    assert_eq!(reloaded.get_http_port(), 5010);
    assert_eq!(reloaded.get_u64_or(&["stream", "prefetch", "window"], 0), 4);
    Ok(())
}

#[test]
fn test_managed_file_is_relative_to_config_dir() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = Config::load_config(dir.path().to_str().unwrap())?;

    let file = config.get_managed_file(&["stream", "cache", "file"], "url_cache.json")?;
    assert_eq!(file, dir.path().join("url_cache.json"));
    assert!(!file.exists());

    config.set_value(
        &["stream", "cache", "file"],
        Value::String("state/cache.json".to_string()),
    )?;
    let nested = config.get_managed_file(&["stream", "cache", "file"], "url_cache.json")?;
    assert_eq!(nested, dir.path().join("state").join("cache.json"));
    assert!(dir.path().join("state").is_dir());
    Ok(())
}

#[test]
fn test_missing_values_fall_back() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = Config::load_config(dir.path().to_str().unwrap())?;

    assert_eq!(config.get_u64_or(&["nope", "missing"], 7), 7);
    assert_eq!(config.get_string_or(&["nope"], "fallback"), "fallback");
    assert!(config.get_string_list(&["nope"]).is_empty());
    assert!(config.get_value(&["nope"]).is_err());
    Ok(())
}

#[test]
fn test_logger_settings() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = Config::load_config(dir.path().to_str().unwrap())?;

    assert_eq!(config.get_log_min_level()?, "INFO");

    config.set_log_min_level("DEBUG".to_string())?;
    assert_eq!(config.get_log_min_level()?, "DEBUG");
    Ok(())
}
