use anyhow::{bail, Context, Result};
use clap::Parser;
use regex::Regex;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use super::defaults::{DEFAULT_BACKSTOP_TIMEOUT, DEFAULT_SERVER, MAX_TOPIC_LEN};
use super::file::{default_config_path, FileConfig};
use super::{AppConfig, Settings};

impl AppConfig {
    /// Parse CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn logs_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }

    /// Load the config file (explicit path, else the default location) and
    /// resolve everything into [`Settings`].
    pub fn resolve(&self) -> Result<Settings> {
        let path = self.config.clone().or_else(|| {
            default_config_path(env::var_os("XDG_CONFIG_HOME"), env::var_os("HOME"))
        });
        let file = match path {
            Some(path) => FileConfig::load(&path)?,
            None => FileConfig::default(),
        };
        self.resolve_with(file)
    }

    /// Merge with an already loaded file config and validate the result.
    pub fn resolve_with(&self, file: FileConfig) -> Result<Settings> {
        let backstop_timeout = match (self.backstop_timeout, file.backstop_timeout.as_deref()) {
            (Some(timeout), _) => timeout,
            (None, Some(text)) => parse_duration(text)
                .map_err(anyhow::Error::msg)
                .context("invalid backstop_timeout in config file")?,
            (None, None) => DEFAULT_BACKSTOP_TIMEOUT,
        };

        let mut child_args: Vec<String> = match &self.default_args {
            Some(args) => args.clone(),
            None => file.default_args,
        };
        child_args.retain(|arg| !arg.trim().is_empty());
        for arg in &mut child_args {
            *arg = arg.trim().to_string();
        }
        child_args.extend(self.child_args.iter().cloned());

        let settings = Settings {
            command: self
                .command
                .clone()
                .or(file.command)
                .filter(|command| !command.trim().is_empty()),
            child_args,
            topic: self.topic.clone().or(file.ntfy_topic).unwrap_or_default(),
            server: self
                .server
                .clone()
                .or(file.ntfy_server)
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            backstop_timeout,
            quiet: self.quiet.or(file.quiet).unwrap_or(false),
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !self.quiet {
            if self.topic.is_empty() {
                bail!("an ntfy topic is required unless --quiet is set (use --topic or CLI_NTFY_TOPIC)");
            }
            validate_topic(&self.topic)?;
        }
        validate_server(&self.server)?;
        Ok(())
    }
}

fn topic_pattern() -> &'static Regex {
    static TOPIC: OnceLock<Regex> = OnceLock::new();
    TOPIC.get_or_init(|| {
        Regex::new(&format!("^[A-Za-z0-9_-]{{1,{MAX_TOPIC_LEN}}}$"))
            .expect("static topic pattern should compile")
    })
}

pub fn validate_topic(topic: &str) -> Result<()> {
    if !topic_pattern().is_match(topic) {
        bail!(
            "ntfy topic must be 1-{MAX_TOPIC_LEN} characters of letters, digits, '-' or '_', got {topic:?}"
        );
    }
    Ok(())
}

pub fn validate_server(server: &str) -> Result<()> {
    let rest = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"));
    match rest {
        Some(host) if !host.trim_matches('/').is_empty() && !host.contains(char::is_whitespace) => {
            Ok(())
        }
        _ => bail!("ntfy server must be an http:// or https:// URL, got {server:?}"),
    }
}

/// Parse Go-style durations: `0`, or a sequence of decimal numbers each
/// followed by a unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `1m30s`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text.starts_with('-') {
        return Err(format!("duration must be non-negative: {input:?}"));
    }
    let text = text.strip_prefix('+').unwrap_or(text);
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;

        let unit_len = tail
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {input:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total_nanos += value * scale;
        rest = tail;
    }
    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration out of range: {input:?}"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
