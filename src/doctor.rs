//! 実行環境の診断

use serde::Serialize;

use crate::config::ScraperConfig;
use crate::session::resolve_chrome_path;

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// 全チェックを実行
pub fn run_checks(config: &ScraperConfig) -> Vec<CheckResult> {
    vec![
        check_browser(config),
        check_download_dir(config),
        check_config(config),
    ]
}

fn check_browser(config: &ScraperConfig) -> CheckResult {
    match resolve_chrome_path(config) {
        Some(path) if path.exists() => CheckResult::pass("browser", path.display().to_string()),
        Some(path) => CheckResult::fail(
            "browser",
            format!("{} does not exist (check CHROME_PATH)", path.display()),
        ),
        None => CheckResult::fail(
            "browser",
            "no Chrome/Chromium found; install one or set CHROME_PATH",
        ),
    }
}

fn check_download_dir(config: &ScraperConfig) -> CheckResult {
    let dir = &config.download_dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::fail(
            "download_dir",
            format!("cannot create {}: {}", dir.display(), e),
        );
    }

    let test_file = dir.join(".write_test");
    match std::fs::write(&test_file, b"test").and_then(|_| std::fs::remove_file(&test_file)) {
        Ok(()) => CheckResult::pass("download_dir", format!("{} is writable", dir.display())),
        Err(e) => CheckResult::fail(
            "download_dir",
            format!("cannot write to {}: {}", dir.display(), e),
        ),
    }
}

fn check_config(config: &ScraperConfig) -> CheckResult {
    match config.validate() {
        Ok(()) => CheckResult::pass(
            "config",
            format!(
                "max_retries={}, timeout={:?}, slow_mo={:?}",
                config.max_retries, config.default_timeout, config.slow_mo
            ),
        ),
        Err(e) => CheckResult::fail("config", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_dir_check_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let config = ScraperConfig::default().with_download_dir(tmp.path().join("nested/svgs"));

        let result = check_download_dir(&config);
        assert!(result.passed, "{}", result.detail);
        assert!(tmp.path().join("nested/svgs").is_dir());
        assert!(!tmp.path().join("nested/svgs/.write_test").exists());
    }

    #[test]
    fn test_missing_browser_path_fails() {
        let config = ScraperConfig {
            chrome_path: Some("/definitely/not/here/chrome".into()),
            ..Default::default()
        };
        assert!(!check_browser(&config).passed);
    }

    #[test]
    fn test_check_results_serialize_to_json() {
        let tmp = TempDir::new().unwrap();
        let config = ScraperConfig::default().with_download_dir(tmp.path());

        let value = serde_json::to_value(run_checks(&config)).unwrap();
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["browser", "download_dir", "config"]);
        assert_eq!(value[1]["passed"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_invalid_config_fails() {
        let config = ScraperConfig::default().with_max_retries(0);
        assert!(!check_config(&config).passed);
    }
}
