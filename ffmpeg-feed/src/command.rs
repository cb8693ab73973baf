use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::StreamConfig;

/// Builds the encoder invocation for `config`.
///
/// Video comes in as raw `rgb24` on stdin. Audio comes from `audio_fifo` as
/// interleaved stereo `s16le`; without a fifo the encoder reads silence from
/// `/dev/zero`, since the ingest refuses streams without an audio track.
pub fn build_ffmpeg_command(config: &StreamConfig, audio_fifo: Option<&Path>) -> Command {
    let mut cmd = Command::new(&config.ffmpeg_path);
    let size = format!("{}x{}", config.width, config.height);
    let fps = config.fps.to_string();
    let video_bitrate = format!("{}k", config.video_bitrate_kbps);

    cmd.arg("-loglevel")
        .arg(if config.verbose { "verbose" } else { "error" });
    cmd.arg("-y");
    cmd.arg("-analyzeduration").arg("1");

    // Video input
    cmd.arg("-f").arg("rawvideo");
    cmd.arg("-r").arg(&fps);
    cmd.arg("-vcodec").arg("rawvideo");
    cmd.arg("-s").arg(&size);
    cmd.arg("-pix_fmt").arg("rgb24");
    cmd.arg("-i").arg("-");

    // Audio input
    match audio_fifo {
        Some(fifo) => {
            cmd.arg("-ar").arg(config.sample_rate.to_string());
            cmd.arg("-ac").arg("2");
            cmd.arg("-f").arg("s16le");
            cmd.arg("-i").arg(fifo);
        }
        None => {
            cmd.arg("-ar").arg("8000");
            cmd.arg("-ac").arg("1");
            cmd.arg("-f").arg("s16le");
            cmd.arg("-i").arg("/dev/zero");
        }
    }

    // Video encoding
    cmd.arg("-vcodec").arg("libx264");
    cmd.arg("-r").arg(&fps);
    cmd.arg("-b:v").arg(&video_bitrate);
    cmd.arg("-s").arg(&size);
    cmd.arg("-preset").arg(&config.preset);
    cmd.arg("-tune").arg("zerolatency");
    cmd.arg("-crf").arg("23");
    cmd.arg("-pix_fmt").arg("yuv420p");
    cmd.arg("-minrate").arg(&video_bitrate);
    cmd.arg("-maxrate").arg(&video_bitrate);
    cmd.arg("-bufsize")
        .arg(format!("{}k", config.video_bitrate_kbps * 4));
    cmd.arg("-g").arg(config.keyframe_interval.to_string());
    cmd.arg("-keyint_min").arg("1");

    // Audio encoding
    cmd.arg("-acodec").arg(&config.audio_codec);
    cmd.arg("-ar").arg(config.sample_rate.to_string());
    cmd.arg("-b:a").arg(format!("{}k", config.audio_bitrate_kbps));

    // first input's video, second input's audio
    cmd.arg("-map").arg("0:v");
    cmd.arg("-map").arg("1:a");
    cmd.arg("-threads").arg(config.threads.to_string());

    cmd.arg("-f").arg("flv").arg(config.destination.url());

    cmd.stdin(Stdio::piped()).stdout(Stdio::null());
    if config.verbose {
        cmd.stderr(Stdio::piped());
    } else {
        cmd.stderr(Stdio::null());
    }
    cmd.kill_on_drop(true);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use std::path::PathBuf;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into())
            .collect()
    }

    #[test]
    fn test_build_ffmpeg_command_minimal() {
        let config = StreamConfig::builder("live_abc")
            .ffmpeg_path("ffmpeg_test")
            .build()
            .unwrap();
        let cmd = build_ffmpeg_command(&config, None);
        let args = args(&cmd);

        assert_eq!(cmd.as_std().get_program().to_str().unwrap(), "ffmpeg_test");
        assert!(args.contains(&"-y".to_string()));
        assert!(args.windows(2).any(|w| w == ["-s", "640x480"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-i", "-"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/dev/zero"]));
        assert!(args.windows(2).any(|w| w == ["-vcodec", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-loglevel", "error"]));
        assert_eq!(
            args.last().unwrap(),
            "rtmp://live-ams.twitch.tv/app/live_abc"
        );
    }

    #[test]
    fn test_build_ffmpeg_command_with_audio_fifo() {
        let config = StreamConfig::builder("key")
            .size(320, 240)
            .fps(25.0)
            .audio(true)
            .verbose(true)
            .build()
            .unwrap();
        let fifo = PathBuf::from("/tmp/feed/audio.pcm");
        let cmd = build_ffmpeg_command(&config, Some(&fifo));
        let args = args(&cmd);

        assert!(args.windows(2).any(|w| w == ["-r", "25"]));
        assert!(args.windows(2).any(|w| w == ["-s", "320x240"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/tmp/feed/audio.pcm"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "2"]));
        assert!(!args.contains(&"/dev/zero".to_string()));
        assert!(args.windows(2).any(|w| w == ["-loglevel", "verbose"]));
    }

    #[test]
    fn test_build_ffmpeg_command_rate_control() {
        let mut config = StreamConfig::builder("key").build().unwrap();
        config.video_bitrate_kbps = 2500;
        config.preset = "ultrafast".into();
        config.keyframe_interval = 120;
        config.threads = 4;
        let args = args(&build_ffmpeg_command(&config, None));

        assert!(args.windows(2).any(|w| w == ["-b:v", "2500k"]));
        assert!(args.windows(2).any(|w| w == ["-maxrate", "2500k"]));
        assert!(args.windows(2).any(|w| w == ["-bufsize", "10000k"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(args.windows(2).any(|w| w == ["-g", "120"]));
        assert!(args.windows(2).any(|w| w == ["-threads", "4"]));
        assert!(args.windows(2).any(|w| w == ["-acodec", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "160k"]));
    }

    #[test]
    fn test_build_ffmpeg_command_maps_video_then_audio() {
        let config = StreamConfig::builder("key").build().unwrap();
        let args = args(&build_ffmpeg_command(&config, None));
        let maps: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["0:v", "1:a"]);
    }
}
