//! Outil externe de résolution/extraction (yt-dlp)
//!
//! Le moteur ne dépend que du trait [`MediaTool`] : `resolve` convertit un
//! identifiant en URL directe de CDN, `extract_command` prépare le processus
//! qui écrit l'audio sur sa sortie standard.

use crate::error::ResolutionError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longueur maximale du message d'erreur conservé depuis stderr
const MAX_ERROR_LEN: usize = 300;

/// Outil capable de résoudre et d'extraire un média
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Nom court pour les logs
    fn name(&self) -> &str;

    /// Résout `id` en URL directe
    async fn resolve(&self, id: &str) -> Result<String, ResolutionError>;

    /// Commande d'extraction : les octets audio sortent sur stdout
    fn extract_command(&self, id: &str) -> Command;
}

/// Implémentation de [`MediaTool`] basée sur `yt-dlp`
#[derive(Debug, Clone)]
pub struct YtDlp {
    path: PathBuf,
    format: String,
    cookies: Option<PathBuf>,
    js_runtime: Option<String>,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self {
            path: PathBuf::from("yt-dlp"),
            format: "251".to_string(),
            cookies: None,
            js_runtime: None,
            extra_args: Vec::new(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl YtDlp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sélecteur de format (`251` = opus/webm)
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Fichier de cookies au format Netscape
    pub fn with_cookies(mut self, cookies: impl Into<PathBuf>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    /// Runtime JavaScript passé à `--js-runtimes` (ex: `deno:/usr/bin/deno`)
    pub fn with_js_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.js_runtime = Some(runtime.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", id)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-f").arg(&self.format);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(runtime) = &self.js_runtime {
            cmd.arg("--js-runtimes").arg(runtime);
        }
        cmd.args(["--no-warnings", "--no-check-certificate"]);
        cmd.args(&self.extra_args);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Arguments de la commande de résolution (pour les logs et les tests)
    pub fn resolve_command(&self, id: &str) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("--no-check-formats")
            .arg("-g")
            .arg(Self::watch_url(id))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Première ligne de la sortie qui ressemble à une URL
pub fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
}

fn error_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();
    line.chars().take(MAX_ERROR_LEN).collect()
}

#[async_trait]
impl MediaTool for YtDlp {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, id: &str) -> Result<String, ResolutionError> {
        debug!(id = %id, "Resolving direct URL with yt-dlp");
        let mut cmd = self.resolve_command(id);

        // kill_on_drop : le processus meurt avec le future en cas de timeout
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout))?
            .map_err(|e| ResolutionError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(ResolutionError::ToolFailed {
                tool: self.name().to_string(),
                code: output.status.code(),
                message: error_excerpt(&output.stderr),
            });
        }

        first_url(&String::from_utf8_lossy(&output.stdout)).ok_or(ResolutionError::NoUrl)
    }

    fn extract_command(&self, id: &str) -> Command {
        let mut cmd = self.base_command();
        cmd.args(["-o", "-", "--quiet", "--no-part"])
            .arg(Self::watch_url(id));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_first_url() {
        let out = "WARNING: something\nhttps://rr1.googlevideo.com/videoplayback?x=1\nhttps://other\n";
        assert_eq!(
            first_url(out).as_deref(),
            Some("https://rr1.googlevideo.com/videoplayback?x=1")
        );
        assert_eq!(first_url("nothing here\n"), None);
        assert_eq!(first_url(""), None);
    }

    #[test]
    fn test_resolve_command_arguments() {
        let tool = YtDlp::new("/opt/yt-dlp")
            .with_cookies("/tmp/cookies.txt")
            .with_js_runtime("deno:/usr/bin/deno");
        let cmd = tool.resolve_command("dQw4w9WgXcQ");
        let args = args(&cmd);

        assert_eq!(cmd.as_std().get_program(), "/opt/yt-dlp");
        assert!(args.windows(2).any(|w| w == ["-f", "251"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/cookies.txt"]));
        assert!(args.windows(2).any(|w| w == ["--js-runtimes", "deno:/usr/bin/deno"]));
        assert!(args.iter().any(|a| a == "-g"));
        assert_eq!(
            args.last().unwrap(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_extract_command_writes_to_stdout() {
        let tool = YtDlp::default().with_extra_args(vec!["--no-playlist".to_string()]);
        let args = args(&tool.extract_command("abc"));

        assert!(args.windows(2).any(|w| w == ["-o", "-"]));
        assert!(args.iter().any(|a| a == "--no-playlist"));
        assert!(!args.iter().any(|a| a == "--cookies"));
        assert!(!args.iter().any(|a| a == "-g"));
    }

    #[test]
    fn test_error_excerpt_keeps_last_line() {
        let stderr = b"first line\nERROR: Video unavailable\n\n";
        assert_eq!(error_excerpt(stderr), "ERROR: Video unavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_reports_spawn_failure() {
        let tool = YtDlp::new("/nonexistent/yt-dlp");
        assert!(matches!(
            tool.resolve("abc").await,
            Err(ResolutionError::Spawn(_))
        ));
    }
}
