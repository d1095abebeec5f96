use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use provision_core::{GitIdentity, RepoBootstrap};
use regex::Regex;

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn public_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(ssh-ed25519|ssh-rsa|ecdsa-sha2-nistp\d+) [A-Za-z0-9+/=]+( .*)?$").ok()
        })
        .as_ref()
}

/// Scripts run on a fresh instance during repository bootstrap.
pub struct SetupScripts;

impl SetupScripts {
    /// Create (or reuse) the login user's deploy key, trust the clone host
    /// and configure git. The public key is the last line printed.
    pub fn keygen(identity: &GitIdentity, clone_host: &str) -> String {
        format!(
            r#"set -e
mkdir -p "$HOME/.ssh"
chmod 700 "$HOME/.ssh"
if [ ! -f "$HOME/.ssh/id_ed25519" ]; then
  ssh-keygen -q -t ed25519 -N '' -C {email} -f "$HOME/.ssh/id_ed25519"
fi
ssh-keyscan -H {host} >> "$HOME/.ssh/known_hosts" 2>/dev/null || true
git config --global user.email {email}
git config --global user.name {username}
cat "$HOME/.ssh/id_ed25519.pub"
"#,
            email = shell_quote(&identity.email),
            username = shell_quote(&identity.username),
            host = shell_quote(clone_host),
        )
    }

    /// Clone `repo` into the login user's home. An existing checkout is
    /// left untouched.
    pub fn clone(repo: &RepoBootstrap, clone_host: &str) -> String {
        let url = format!("git@{}:{}.git", clone_host, repo.repository);
        let branch = repo
            .branch
            .as_deref()
            .map(|b| format!("--branch {} ", shell_quote(b)))
            .unwrap_or_default();
        let target = format!("\"$HOME\"/{}", shell_quote(repo.target_directory()));

        format!(
            r#"set -e
if [ -d {target}/.git ]; then
  echo "Repository already present at {display}"
  exit 0
fi
git clone --progress {branch}{url} {target}
echo "Cloned {repository} into {display}"
"#,
            target = target,
            display = repo.target_directory(),
            branch = branch,
            url = shell_quote(&url),
            repository = repo.repository,
        )
    }

    /// First line of `output` that looks like an OpenSSH public key.
    pub fn extract_public_key(output: &str) -> Option<String> {
        let pattern = public_key_pattern()?;
        output
            .lines()
            .map(str::trim)
            .find(|line| pattern.is_match(line))
            .map(str::to_string)
    }

    /// Title the deploy key is registered under at the source-control provider.
    pub fn key_title(instance_name: &str, now: DateTime<Utc>) -> String {
        format!("{}-{}", instance_name, now.format("%Y%m%d%H%M%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> GitIdentity {
        GitIdentity {
            email: "dev@example.com".to_string(),
            username: "O'Brien".to_string(),
        }
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_keygen_script_quotes_identity() {
        let script = SetupScripts::keygen(&identity(), "github.com");
        assert!(script.contains("ssh-keygen -q -t ed25519"));
        assert!(script.contains("git config --global user.email 'dev@example.com'"));
        assert!(script.contains(r#"git config --global user.name 'O'"'"'Brien'"#));
        assert!(script.contains("ssh-keyscan -H 'github.com'"));
        assert!(script.trim_end().ends_with("id_ed25519.pub\""));
    }

    #[test]
    fn test_clone_script_uses_branch_and_directory() {
        let repo = RepoBootstrap {
            repository: "acme/widgets".to_string(),
            directory: Some("src/w".to_string()),
            branch: Some("release".to_string()),
        };
        let script = SetupScripts::clone(&repo, "github.com");
        assert!(script.contains("git clone --progress --branch 'release' 'git@github.com:acme/widgets.git' \"$HOME\"/'src/w'"));
        assert!(script.contains("if [ -d \"$HOME\"/'src/w'/.git ]"));
    }

    #[test]
    fn test_clone_script_without_branch() {
        let repo = RepoBootstrap {
            repository: "acme/widgets".to_string(),
            directory: None,
            branch: None,
        };
        let script = SetupScripts::clone(&repo, "git.example.org");
        assert!(script.contains("git clone --progress 'git@git.example.org:acme/widgets.git' \"$HOME\"/'widgets'"));
    }

    #[test]
    fn test_extract_public_key() {
        let output = "Generating key\nssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB+x/y= dev@example.com\n";
        assert_eq!(
            SetupScripts::extract_public_key(output).as_deref(),
            Some("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB+x/y= dev@example.com")
        );

        let ecdsa = "ecdsa-sha2-nistp256 AAAAE2VjZHNh\n";
        assert!(SetupScripts::extract_public_key(ecdsa).is_some());
    }

    #[test]
    fn test_public_key_pattern_compiles() {
        assert!(public_key_pattern().is_some());
    }

    #[test]
    fn test_extract_public_key_rejects_noise() {
        assert_eq!(SetupScripts::extract_public_key(""), None);
        assert_eq!(
            SetupScripts::extract_public_key("ssh-ed25519\nkey: ssh-rsa AAAA\n"),
            None
        );
    }

    #[test]
    fn test_key_title() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(SetupScripts::key_title("box1", now), "box1-20240309140507");
    }
}
