use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_feed::{Frame, OutputStream, StreamConfig};
use tempfile::tempdir;

const WIDTH: usize = 4;
const HEIGHT: usize = 2;
const FRAME_BYTES: usize = WIDTH * HEIGHT * 3;

/// Writes a stand-in for ffmpeg that copies stdin to `video_path` and records
/// `terminated` in `status_path` when it receives SIGINT.
fn create_mock_ffmpeg_script(dir: &Path, video_path: &Path, status_path: &Path) -> PathBuf {
    let mock_ffmpeg_path = dir.join("mock_ffmpeg");
    let mut script = fs::File::create(&mock_ffmpeg_path).unwrap();
    writeln!(script, "#!/bin/sh").unwrap();
    writeln!(
        script,
        "handler() {{ echo terminated > {}; exit 0; }}",
        status_path.to_str().unwrap()
    )
    .unwrap();
    writeln!(script, "trap handler INT").unwrap();
    // background jobs get /dev/null as stdin unless it is redirected explicitly
    writeln!(script, "exec 3<&0").unwrap();
    writeln!(script, "cat <&3 > {} &", video_path.to_str().unwrap()).unwrap();
    writeln!(script, "wait").unwrap();
    drop(script);
    fs::set_permissions(&mock_ffmpeg_path, fs::Permissions::from_mode(0o755)).unwrap();
    mock_ffmpeg_path
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(contents) = fs::read_to_string(path) {
            if !contents.is_empty() {
                return contents;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} was never written", path.display());
}

#[tokio::test]
async fn test_frames_reach_ffmpeg_and_close_interrupts_it() {
    let temp_dir = tempdir().unwrap();
    let video_path = temp_dir.path().join("video.rgb24");
    let status_path = temp_dir.path().join("ffmpeg.status");
    let ffmpeg = create_mock_ffmpeg_script(temp_dir.path(), &video_path, &status_path);

    let config = StreamConfig::builder("live_test")
        .size(WIDTH, HEIGHT)
        .fps(30.0)
        .ffmpeg_path(ffmpeg.to_str().unwrap())
        .build()
        .unwrap();
    let stream = OutputStream::open(config).await.unwrap();

    // nothing submitted yet: the lane idles on white
    tokio::time::sleep(Duration::from_millis(100)).await;
    let red = Frame::filled(HEIGHT, WIDTH, [1.0, 0.0, 0.0]);
    for _ in 0..3 {
        stream.send_video_frame(&red, None).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stream.video_buffer_depth(), 0);
    // a mock that exited early would show up as restarts
    assert_eq!(stream.transport().restart_count(), 0);
    assert_eq!(stream.transport().generation(), 1);

    stream.close().await;
    assert_eq!(wait_for_file(&status_path).await.trim(), "terminated");

    let video = fs::read(&video_path).unwrap();
    assert!(video.len() >= FRAME_BYTES * 4, "only {} bytes", video.len());
    assert_eq!(video.len() % FRAME_BYTES, 0);

    let frames: Vec<&[u8]> = video.chunks(FRAME_BYTES).collect();
    assert!(frames[0].iter().all(|&b| b == 0xff));
    let red_bytes = red.to_rgb24();
    let red_at = frames
        .iter()
        .position(|f| *f == &red_bytes[..])
        .expect("red frame never written");
    // once the queue drains the last red frame repeats
    assert!(frames[red_at..].iter().all(|f| *f == &red_bytes[..]));
}
