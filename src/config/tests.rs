use super::*;
use clap::Parser;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> AppConfig {
    let mut argv = vec!["cli-ntfy"];
    argv.extend_from_slice(args);
    AppConfig::parse_from(argv)
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cli_ntfy_config_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn parses_go_style_durations() {
    assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    assert_eq!(parse_duration(" 10us ").unwrap(), Duration::from_micros(10));
}

#[test]
fn rejects_malformed_durations() {
    for input in ["", "30", "-5s", "5x", "s", "1..s", "1m30"] {
        assert!(parse_duration(input).is_err(), "accepted {input:?}");
    }
}

#[test]
fn cli_flags_and_trailing_args() {
    let cfg = parse(&[
        "--topic",
        "alerts",
        "--backstop-timeout",
        "45s",
        "chat",
        "--model",
        "pro",
    ]);
    assert_eq!(cfg.topic.as_deref(), Some("alerts"));
    assert_eq!(cfg.backstop_timeout, Some(Duration::from_secs(45)));
    assert_eq!(cfg.child_args, vec!["chat", "--model", "pro"]);
}

#[test]
fn double_dash_passes_hyphen_args_through() {
    let cfg = parse(&["--quiet", "--", "--yolo", "-p", "hi"]);
    assert_eq!(cfg.quiet, Some(true));
    assert_eq!(cfg.child_args, vec!["--yolo", "-p", "hi"]);
}

#[test]
fn quiet_accepts_explicit_value() {
    assert_eq!(parse(&["--quiet=false"]).quiet, Some(false));
    assert_eq!(parse(&["--quiet=yes"]).quiet, Some(true));
    assert_eq!(parse(&[]).quiet, None);
}

#[test]
fn invalid_duration_flag_is_a_parse_error() {
    assert!(AppConfig::try_parse_from(["cli-ntfy", "--backstop-timeout", "soon"]).is_err());
}

#[test]
fn logs_flags_combine() {
    assert!(!parse(&[]).logs_enabled());
    assert!(parse(&["--logs"]).logs_enabled());
    assert!(!parse(&["--logs", "--no-logs"]).logs_enabled());
}

#[test]
fn defaults_apply_when_nothing_is_set() {
    let settings = parse(&["--topic", "t"])
        .resolve_with(FileConfig::default())
        .unwrap();
    assert_eq!(settings.command, None);
    assert_eq!(settings.server, DEFAULT_SERVER);
    assert_eq!(settings.backstop_timeout, DEFAULT_BACKSTOP_TIMEOUT);
    assert!(!settings.quiet);
    assert!(settings.notifications_enabled());
    assert!(settings.child_args.is_empty());
}

#[test]
fn cli_values_override_file_values() {
    let file = FileConfig::from_yaml(
        "command: /opt/gemini\nntfy_topic: from-file\nntfy_server: https://file.example\nbackstop_timeout: 2m\nquiet: false\n",
    )
    .unwrap();
    let settings = parse(&["--topic", "from-cli", "--backstop-timeout", "5s"])
        .resolve_with(file)
        .unwrap();
    assert_eq!(settings.topic, "from-cli");
    assert_eq!(settings.server, "https://file.example");
    assert_eq!(settings.backstop_timeout, Duration::from_secs(5));
    assert_eq!(settings.command.as_deref(), Some("/opt/gemini"));
}

#[test]
fn file_values_fill_gaps() {
    let file = FileConfig::from_yaml("ntfy_topic: desk\nbackstop_timeout: 1m30s\n").unwrap();
    let settings = parse(&[]).resolve_with(file).unwrap();
    assert_eq!(settings.topic, "desk");
    assert_eq!(settings.backstop_timeout, Duration::from_secs(90));
}

#[test]
fn default_args_come_before_trailing_args() {
    let file = FileConfig::from_yaml("default_args: [\"--sandbox\", \" \"]\n").unwrap();
    let settings = parse(&["--quiet", "chat"]).resolve_with(file).unwrap();
    assert_eq!(settings.child_args, vec!["--sandbox", "chat"]);

    let settings = parse(&["--quiet", "--default-args", " -a, ,-b ", "x"])
        .resolve_with(FileConfig::default())
        .unwrap();
    assert_eq!(settings.child_args, vec!["-a", "-b", "x"]);
}

#[test]
fn legacy_file_keys_are_accepted() {
    let file = FileConfig::from_yaml("gemini_path: /usr/bin/gemini\ndefault_gemini_args: [\"-y\"]\n")
        .unwrap();
    assert_eq!(file.command.as_deref(), Some("/usr/bin/gemini"));
    assert_eq!(file.default_args, vec!["-y"]);

    let file =
        FileConfig::from_yaml("ntfy_topic: alerts\nstartup_notify: true\nbackstop_timeout: 30s\n")
            .unwrap();
    assert_eq!(file.startup_notify, Some(true));
    let settings = parse(&[]).resolve_with(file).unwrap();
    assert_eq!(settings.topic, "alerts");
    assert_eq!(settings.backstop_timeout, Duration::from_secs(30));
}

#[test]
fn unknown_or_malformed_yaml_is_rejected() {
    assert!(FileConfig::from_yaml("ntfy_topicc: typo\n").is_err());
    assert!(FileConfig::from_yaml("quiet: [1, 2]\n").is_err());
    assert_eq!(FileConfig::from_yaml("   \n").unwrap(), FileConfig::default());
}

#[test]
fn bad_duration_in_file_is_reported() {
    let file = FileConfig::from_yaml("backstop_timeout: forever\n").unwrap();
    let err = parse(&["--quiet"]).resolve_with(file).unwrap_err();
    assert!(format!("{err:#}").contains("backstop_timeout"));
}

#[test]
fn topic_required_unless_quiet() {
    assert!(parse(&[]).resolve_with(FileConfig::default()).is_err());
    let settings = parse(&["--quiet"])
        .resolve_with(FileConfig::default())
        .unwrap();
    assert!(settings.quiet);
    assert!(!settings.notifications_enabled());
}

#[test]
fn zero_timeout_disables_notifications() {
    let settings = parse(&["--topic", "t", "--backstop-timeout", "0"])
        .resolve_with(FileConfig::default())
        .unwrap();
    assert!(!settings.notifications_enabled());
}

#[test]
fn topic_and_server_validation() {
    assert!(validate_topic("my_topic-1").is_ok());
    assert!(validate_topic("").is_err());
    assert!(validate_topic("has space").is_err());
    assert!(validate_topic(&"a".repeat(65)).is_err());
    assert!(validate_topic(&"a".repeat(64)).is_ok());

    assert!(validate_server("https://ntfy.sh").is_ok());
    assert!(validate_server("http://localhost:8080/").is_ok());
    assert!(validate_server("ftp://ntfy.sh").is_err());
    assert!(validate_server("https://").is_err());
    assert!(validate_server("ntfy.sh").is_err());

    assert!(parse(&["--topic", "bad topic"])
        .resolve_with(FileConfig::default())
        .is_err());
    assert!(parse(&["--quiet", "--server", "nope"])
        .resolve_with(FileConfig::default())
        .is_err());
}

#[test]
fn config_path_prefers_xdg() {
    assert_eq!(
        default_config_path(Some(OsString::from("/xdg")), Some(OsString::from("/home/u"))),
        Some(PathBuf::from("/xdg/cli-ntfy/config.yaml"))
    );
    assert_eq!(
        default_config_path(Some(OsString::new()), Some(OsString::from("/home/u"))),
        Some(PathBuf::from("/home/u/.config/cli-ntfy/config.yaml"))
    );
    assert_eq!(default_config_path(None, None), None);
}

#[test]
fn missing_config_file_is_not_an_error() {
    let path = std::env::temp_dir().join("cli_ntfy_definitely_missing.yaml");
    assert_eq!(FileConfig::load(&path).unwrap(), FileConfig::default());
}

#[test]
fn explicit_config_file_is_loaded() {
    let path = temp_file("explicit.yaml", "ntfy_topic: from-disk\nquiet: true\n");
    let cfg = parse(&["--config", path.to_str().unwrap()]);
    let settings = cfg.resolve().unwrap();
    assert_eq!(settings.topic, "from-disk");
    assert!(settings.quiet);

    let broken = temp_file("broken.yaml", "ntfy_topic: [unclosed\n");
    let cfg = parse(&["--config", broken.to_str().unwrap()]);
    assert!(cfg.resolve().is_err());
}
