use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::{tempdir, TempDir};
use tokio::io::BufReader;
use tvshim_core::{
    load_shim_config_with, ControlStream, ExecutionPlan, GopAdjustment, Invocation, Mode,
    ShimConfig, Supervisor, TerminationCoordinator,
};

fn fixture() -> ShimConfig {
    load_shim_config_with(Some(Path::new("../configs/tvshim.toml")), |_| None).unwrap()
}

fn words(line: &str) -> Vec<String> {
    line.split_whitespace().map(String::from).collect()
}

fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn quiet_supervisor() -> Supervisor {
    Supervisor::new(TerminationCoordinator::new(Vec::new())).with_signal_forwarding(false)
}

#[test]
fn foreign_codec_is_forwarded_verbatim() {
    let config = fixture();
    let plan = ExecutionPlan::build(words("-i /rec/a.ts -vcodec libx264 -f mp4 out.mp4"), &config);
    assert_eq!(plan.mode, Mode::Passthrough);
    assert_eq!(plan.command.program(), "/usr/lib/dvr/ffmpeg.legacy");
    assert_eq!(
        plan.command.args(),
        words("-fflags +genpts -i /rec/a.ts -vcodec libx264 -f mp4 out.mp4")
    );
}

#[test]
fn dvd_copy_stays_on_legacy_backend() {
    let config = fixture();
    let plan = ExecutionPlan::build(
        words("-activefile -i /rec/live.ts -vcodec mpeg4 -f dvd -ss 12 -aspect 16:9"),
        &config,
    );
    assert_eq!(plan.mode, Mode::CopyOnly);
    assert!(plan.session.is_none());
    let args = plan.command.args();
    assert_eq!(plan.command.program(), "/usr/lib/dvr/ffmpeg.legacy");
    assert!(args.contains(&"-activefile".to_string()));
    assert!(args.contains(&"-stdin".to_string()));
    assert!(plan.command.contains_pair("-ss", "12"));
    assert!(plan.command.contains_pair("-aspect", "16:9"));
    assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
}

#[test]
fn live_transcode_runs_inside_indirection_with_derived_parameters() {
    let config = fixture();
    let plan = ExecutionPlan::build(
        words("-activefile -i /rec/live.ts -vcodec mpeg4 -f mpegts -s 1280x720 -b 3000k -g 300"),
        &config,
    );
    assert_eq!(plan.mode, Mode::Transcode);

    let derived = plan.derived.as_ref().unwrap();
    assert_eq!(derived.maxrate, "4500k");
    assert_eq!(derived.bufsize, "9000k");
    assert_eq!(derived.gop.value, "60");
    assert!(matches!(derived.gop.adjustment, GopAdjustment::Clamped { .. }));
    assert_eq!(
        derived.filter.as_deref(),
        Some("deinterlace_vaapi,scale_vaapi=w=1280:h=720")
    );

    let args = plan.command.args();
    assert_eq!(plan.command.program(), "docker");
    assert_eq!(
        &args[..3],
        ["exec", "jellyfin", "/usr/lib/jellyfin-ffmpeg/ffmpeg"]
    );
    assert!(plan.command.contains_pair("-follow", "1"));
    assert!(plan.command.contains_pair("-c:v", "h264_vaapi"));
    assert!(plan.command.contains_pair("-map", "0:a?"));
    let session = plan.session.as_ref().unwrap();
    assert!(session.is_isolated());
    assert!(plan
        .command
        .contains_pair("-metadata", &format!("comment={}", session.tag())));
}

#[test]
fn missing_input_uses_placeholder() {
    let config = fixture();
    let plan = ExecutionPlan::build(words("-vcodec mpeg4 -f mpegts"), &config);
    assert!(plan.command.contains_pair("-i", "/dev/null"));
}

#[tokio::test]
async fn copy_only_invocation_returns_backend_exit_code() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("args.txt");
    let backend = write_script(
        &dir,
        "legacy",
        &format!("printf '%s\\n' \"$@\" > '{}'\nexit 7", record.display()),
    );

    let mut config = fixture();
    config.backend.legacy_executable = backend.display().to_string();
    let invocation = Invocation::new(config).with_supervisor(quiet_supervisor());
    let code = invocation
        .run(words("-vcodec mpeg4 -f dvd -i /rec/a.ts"))
        .await
        .unwrap();
    assert_eq!(code, 7);

    let recorded = fs::read_to_string(&record).unwrap();
    let recorded: Vec<&str> = recorded.lines().collect();
    assert!(recorded.contains(&"-stdin"));
    assert!(recorded.windows(2).any(|pair| pair == ["-i", "/rec/a.ts"]));
    assert_eq!(recorded.last(), Some(&"pipe:1"));
}

#[tokio::test]
async fn local_transcode_stops_on_quit_command() {
    let dir = tempdir().unwrap();
    let backend = write_script(&dir, "encoder", "exec sleep 30");

    let mut config = fixture();
    config.backend.indirection.clear();
    config.backend.executable = backend.display().to_string();
    let plan = ExecutionPlan::build(words("-vcodec mpeg4 -f mpegts -i /rec/a.ts"), &config);
    assert_eq!(plan.command.program(), backend.display().to_string());

    let control: &[u8] = b"quit\n";
    let exit = quiet_supervisor()
        .run(
            &plan.command,
            plan.session.as_ref(),
            ControlStream::Emulated {
                reader: BufReader::new(control),
                hex_dump: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(exit.stop_requests, 1);
    assert_eq!(exit.code(), 143);
}
