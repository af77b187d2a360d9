// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential testing policy (hydra).
//!
//! The service is a positional token restricted to an allow-list. Username
//! and password sources are mandatory (`-l`/`-L`, `-p`/`-P`); list files
//! must live under the wordlist prefixes and stay under a size ceiling.
//! Form payload tokens carrying `^USER^` / `^PASS^` placeholders pass the
//! sanitizer byte-for-byte.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::application::tool::ToolPolicy;
use crate::domain::config::ServerConfig;
use crate::domain::descriptor::{BreakerParams, ToolDescriptor, ValueRule};
use crate::domain::errors::ValidationError;
use crate::domain::execution::ToolInput;
use crate::domain::target::TargetKind;

const SERVICES: &[&str] = &[
    "ssh",
    "ftp",
    "telnet",
    "smtp",
    "pop3",
    "imap",
    "mysql",
    "postgres",
    "vnc",
    "smb",
    "http-get",
    "http-post-form",
    "https-get",
    "https-post-form",
];

/// Ceiling for user/password list files.
const MAX_LIST_BYTES: u64 = 10 * 1024 * 1024;

pub struct HydraTool {
    descriptor: ToolDescriptor,
}

impl HydraTool {
    pub fn new(config: &ServerConfig) -> Self {
        let mut d = ToolDescriptor::new("hydra", "hydra");
        d.default_timeout = Duration::from_secs(1200);
        d.concurrency = 1;
        d.breaker = BreakerParams::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout,
            config.circuit_breaker.half_open_success_threshold,
        );
        d.wordlist_prefixes = config
            .tools
            .wordlist_prefixes
            .iter()
            .map(PathBuf::from)
            .collect();
        d.payload_pattern = Some(placeholder_regex().clone());

        d.extra_allowed_tokens = SERVICES.iter().map(|s| s.to_string()).collect();

        d.allowed_flags = [
            "-l", "-L", "-p", "-P", "-t", "-s", "-f", "-S", "-v", "-V", "-e", "-u", "-w", "-I",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        d.flags_require_value = ["-l", "-L", "-p", "-P", "-t", "-s", "-e", "-w"]
            .into_iter()
            .map(String::from)
            .collect();

        d.value_rules.insert(
            "-l".to_string(),
            ValueRule::Pattern {
                regex: username_regex().clone(),
                expected: "a plain username",
            },
        );
        d.value_rules.insert("-L".to_string(), ValueRule::WordlistPath);
        d.value_rules.insert("-P".to_string(), ValueRule::WordlistPath);
        d.value_rules
            .insert("-t".to_string(), ValueRule::IntRange { min: 1, max: 16 });
        d.value_rules
            .insert("-s".to_string(), ValueRule::IntRange { min: 1, max: 65_535 });
        d.value_rules
            .insert("-w".to_string(), ValueRule::IntRange { min: 1, max: 300 });
        d.value_rules.insert(
            "-e".to_string(),
            ValueRule::Pattern {
                regex: empty_checks_regex().clone(),
                expected: "a combination of n, s and r",
            },
        );

        Self { descriptor: d }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\^[A-Z]+\^").expect("placeholder regex"))
}

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._@\-]+$").expect("username regex"))
}

fn empty_checks_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[nsr]{1,3}$").expect("empty-checks regex"))
}

fn check_list_file(path: &str) -> Result<(), ValidationError> {
    let metadata = std::fs::metadata(Path::new(path)).map_err(|_| {
        ValidationError::Policy(format!("list file not found: {}", path))
    })?;
    if !metadata.is_file() {
        return Err(ValidationError::Policy(format!(
            "list path is not a regular file: {}",
            path
        )));
    }
    if metadata.len() > MAX_LIST_BYTES {
        return Err(ValidationError::Policy(format!(
            "list file too large: {} bytes exceeds {} byte limit",
            metadata.len(),
            MAX_LIST_BYTES
        )));
    }
    Ok(())
}

impl ToolPolicy for HydraTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn validate(
        &self,
        _input: &ToolInput,
        _target: &TargetKind,
        tokens: &[String],
    ) -> Result<(), ValidationError> {
        let services: Vec<&String> = tokens
            .iter()
            .filter(|t| SERVICES.contains(&t.as_str()))
            .collect();
        if services.len() != 1 {
            return Err(ValidationError::Policy(format!(
                "hydra requires exactly one service token, got {}",
                services.len()
            )));
        }

        let has_user = tokens.iter().any(|t| t == "-l" || t == "-L");
        if !has_user {
            return Err(ValidationError::Policy(
                "supply a username with -l or a user list with -L".to_string(),
            ));
        }
        let has_password = tokens.iter().any(|t| t == "-p" || t == "-P");
        if !has_password {
            return Err(ValidationError::Policy(
                "supply a password with -p or a password list with -P".to_string(),
            ));
        }

        // Size/existence checks on list files; the sanitizer already pinned
        // them under the wordlist prefixes.
        for window in tokens.windows(2) {
            if window[0] == "-L" || window[0] == "-P" {
                check_list_file(&window[1])?;
            }
        }
        Ok(())
    }

    fn optimize(&self, tokens: Vec<String>) -> Vec<String> {
        let has_tasks = tokens.iter().any(|t| t == "-t");
        let mut argv = Vec::with_capacity(tokens.len() + 2);
        if !has_tasks {
            argv.push("-t".to_string());
            argv.push("4".to_string());
        }
        argv.extend(tokens);
        argv
    }

    /// `hydra [options] <target> <service>`: the service token moves to the
    /// end, after the target.
    fn build_argv(&self, _target: &TargetKind, raw_target: &str, tokens: Vec<String>) -> Vec<String> {
        let mut service = None;
        let mut argv = Vec::with_capacity(tokens.len() + 1);
        for token in tokens {
            if service.is_none() && SERVICES.contains(&token.as_str()) {
                service = Some(token);
            } else {
                argv.push(token);
            }
        }
        argv.push(raw_target.to_string());
        if let Some(service) = service {
            argv.push(service);
        }
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sanitizer::sanitize;
    use crate::domain::target::{TargetPolicy, UrlTargets};
    use std::io::Write;

    fn tool() -> HydraTool {
        HydraTool::new(&ServerConfig::default())
    }

    fn tool_with_prefix(prefix: &Path) -> HydraTool {
        let mut config = ServerConfig::default();
        config.tools.wordlist_prefixes = vec![prefix.display().to_string()];
        HydraTool::new(&config)
    }

    fn target() -> TargetKind {
        TargetPolicy::new(1024, UrlTargets::Forbidden)
            .authorize("192.168.1.50")
            .unwrap()
    }

    #[test]
    fn test_service_allow_list() {
        let tool = tool();
        assert!(sanitize("ssh -l admin -p admin123", &tool.descriptor, 2048).is_ok());
        assert!(sanitize("rdp -l admin -p admin123", &tool.descriptor, 2048).is_err());
    }

    #[test]
    fn test_exactly_one_service() {
        let tool = tool();
        let input = ToolInput::new("192.168.1.50");
        let tokens = sanitize("-l admin -p x", &tool.descriptor, 2048).unwrap();
        assert!(tool.validate(&input, &target(), &tokens).is_err());

        let tokens = sanitize("ssh ftp -l admin -p x", &tool.descriptor, 2048).unwrap();
        let err = tool.validate(&input, &target(), &tokens).unwrap_err();
        assert!(err.to_string().contains("exactly one service"));
    }

    #[test]
    fn test_credentials_required() {
        let tool = tool();
        let input = ToolInput::new("192.168.1.50");
        let tokens = sanitize("ssh -l admin", &tool.descriptor, 2048).unwrap();
        let err = tool.validate(&input, &target(), &tokens).unwrap_err();
        assert!(err.to_string().contains("password"));

        let tokens = sanitize("ssh -p secret", &tool.descriptor, 2048).unwrap();
        let err = tool.validate(&input, &target(), &tokens).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_list_file_size_and_existence() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_with_prefix(dir.path());
        let input = ToolInput::new("192.168.1.50");

        let list = dir.path().join("users.txt");
        let mut f = std::fs::File::create(&list).unwrap();
        writeln!(f, "admin\nroot").unwrap();

        let args = format!("ssh -L {} -p x", list.display());
        let tokens = sanitize(&args, &tool.descriptor, 2048).unwrap();
        assert!(tool.validate(&input, &target(), &tokens).is_ok());

        let args = format!("ssh -L {} -p x", dir.path().join("missing.txt").display());
        let tokens = sanitize(&args, &tool.descriptor, 2048).unwrap();
        let err = tool.validate(&input, &target(), &tokens).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_placeholders_survive_sanitization() {
        let tool = tool();
        let args = "http-post-form /login:user=^USER^:F=incorrect -l admin -p test";
        let tokens = sanitize(args, &tool.descriptor, 2048).unwrap();
        assert!(tokens.contains(&"/login:user=^USER^:F=incorrect".to_string()));
    }

    #[test]
    fn test_thread_cap_is_sixteen() {
        let tool = tool();
        assert!(sanitize("ssh -t 16 -l a -p b", &tool.descriptor, 2048).is_ok());
        assert!(sanitize("ssh -t 17 -l a -p b", &tool.descriptor, 2048).is_err());
    }

    #[test]
    fn test_optimizer_injects_task_count() {
        let tool = tool();
        let argv = tool.optimize(vec!["ssh".to_string()]);
        assert_eq!(argv[..2], ["-t", "4"]);
        let argv = tool.optimize(vec!["-t".to_string(), "8".to_string(), "ssh".to_string()]);
        assert_eq!(argv[..2], ["-t", "8"]);
    }

    #[test]
    fn test_build_argv_target_then_service() {
        let tool = tool();
        let tokens = vec![
            "-l".to_string(),
            "admin".to_string(),
            "-p".to_string(),
            "secret".to_string(),
            "ssh".to_string(),
        ];
        let argv = tool.build_argv(&target(), "192.168.1.50", tokens);
        assert_eq!(argv, vec!["-l", "admin", "-p", "secret", "192.168.1.50", "ssh"]);
    }
}
