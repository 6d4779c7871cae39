use std::process::Command;

fn help_text(args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_wavenet"))
        .args(args)
        .output()
        .expect("run wavenet");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn help_lists_every_subcommand() {
    let help = help_text(&["--help"]);
    for command in ["init", "mel", "vocode", "evaluate", "info"] {
        assert!(help.contains(command), "missing {command} in help:\n{help}");
    }
    assert!(help.contains("--backend"));
    assert!(help.contains("--log-format"));
}

#[test]
fn vocode_help_lists_generation_flags() {
    let help = help_text(&["vocode", "--help"]);
    for flag in ["--stream", "--progress", "--seed", "--max-samples", "--weights"] {
        assert!(help.contains(flag), "missing {flag} in help:\n{help}");
    }
}

#[test]
fn unknown_backend_is_rejected() {
    let status = Command::new(env!("CARGO_BIN_EXE_wavenet"))
        .args(["--backend", "tpu", "info", "--config", "x.yaml"])
        .status()
        .expect("run wavenet");
    assert!(!status.success());
}
