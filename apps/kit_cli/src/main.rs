//! kit-cli - 命令行播放器
//!
//! 用 mpv 播放媒体、列出音频设备、截图

use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::select;
use kit_mpv::{MpvEngine, MpvOptions};
use kit_player::{
    Media, Player, PlayerConfiguration, PlayerEvent, Playlist, PlaylistMode, ScreenshotFormat,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, PartialEq)]
struct PlayArgs {
    uris: Vec<String>,
    paused: bool,
    mode: PlaylistMode,
    shuffle: bool,
    volume: Option<f64>,
}

#[derive(Debug, PartialEq)]
struct ScreenshotArgs {
    uri: String,
    output: PathBuf,
    at: Duration,
    format: ScreenshotFormat,
}

#[derive(Debug, PartialEq)]
enum CliCommand {
    Play(PlayArgs),
    Devices,
    Screenshot(ScreenshotArgs),
}

fn usage(program: &str) -> String {
    format!(
        "Usage:\n  \
         {0} play <uri>... [--paused] [--mode none|single|loop|loop-playlist] [--shuffle] [--volume N]\n  \
         {0} devices\n  \
         {0} screenshot <uri> <output> [--at SECONDS] [--format jpeg|png]",
        program
    )
}

fn flag_value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> CliResult<&'a String> {
    args.next()
        .ok_or_else(|| format!("{} requires a value", flag).into())
}

fn parse_args(args: &[String]) -> CliResult<CliCommand> {
    let command = args.get(1).ok_or("missing command")?;
    let mut rest = args.iter().skip(2);

    match command.as_str() {
        "play" => {
            let mut play = PlayArgs {
                uris: Vec::new(),
                paused: false,
                mode: PlaylistMode::None,
                shuffle: false,
                volume: None,
            };
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--paused" => play.paused = true,
                    "--shuffle" => play.shuffle = true,
                    "--mode" => {
                        let name = flag_value(&mut rest, "--mode")?;
                        play.mode = PlaylistMode::parse(name)
                            .ok_or_else(|| format!("unknown playlist mode: {}", name))?;
                    }
                    "--volume" => play.volume = Some(flag_value(&mut rest, "--volume")?.parse()?),
                    flag if flag.starts_with("--") => {
                        return Err(format!("unknown option: {}", flag).into())
                    }
                    uri => play.uris.push(uri.to_string()),
                }
            }
            if play.uris.is_empty() {
                return Err("play needs at least one uri".into());
            }
            Ok(CliCommand::Play(play))
        }
        "devices" => Ok(CliCommand::Devices),
        "screenshot" => {
            let mut positional = Vec::new();
            let mut at = Duration::ZERO;
            let mut format = ScreenshotFormat::Jpeg;
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--at" => {
                        let seconds: f64 = flag_value(&mut rest, "--at")?.parse()?;
                        at = Duration::try_from_secs_f64(seconds)?;
                    }
                    "--format" => {
                        let name = flag_value(&mut rest, "--format")?;
                        format = match ScreenshotFormat::parse(name) {
                            Some(ScreenshotFormat::Raw) | None => {
                                return Err(format!("unsupported screenshot format: {}", name).into())
                            }
                            Some(format) => format,
                        };
                    }
                    _ => positional.push(arg.clone()),
                }
            }
            let [uri, output] = <[String; 2]>::try_from(positional)
                .map_err(|_| "screenshot needs <uri> and <output>")?;
            Ok(CliCommand::Screenshot(ScreenshotArgs {
                uri,
                output: PathBuf::from(output),
                at,
                format,
            }))
        }
        other => Err(format!("unknown command: {}", other).into()),
    }
}

fn new_player(options: MpvOptions) -> CliResult<Player> {
    let config = PlayerConfiguration {
        title: "kit-cli".to_string(),
        ..Default::default()
    };
    let player = Player::new(Box::new(MpvEngine::new(options)), config)?;
    player.wait_for_initialization()?;
    Ok(player)
}

fn format_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// 处理一行交互命令，返回 false 表示退出
fn handle_line(player: &Player, line: &str) -> CliResult<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    let value = parts.next();
    match command {
        "q" | "quit" => return Ok(false),
        "p" => player.play_or_pause()?,
        "n" => player.next()?,
        "b" => player.previous()?,
        "s" => {
            let seconds: f64 = value.ok_or("s <seconds>")?.parse()?;
            player.seek(Duration::try_from_secs_f64(seconds)?)?;
        }
        "v" => player.set_volume(value.ok_or("v <0-100>")?.parse()?)?,
        "r" => player.set_rate(value.ok_or("r <rate>")?.parse()?)?,
        "m" => {
            let name = value.ok_or("m <mode>")?;
            let mode = PlaylistMode::parse(name).ok_or_else(|| format!("unknown playlist mode: {}", name))?;
            player.set_playlist_mode(mode)?;
        }
        "j" => player.jump(value.ok_or("j <index>")?.parse()?)?,
        "i" => {
            let state = player.state();
            println!(
                "[{}/{}] {} {} / {}  volume {}  rate {}",
                state.playlist.index + 1,
                state.playlist.len(),
                state.playlist.current().map(|m| m.uri.as_str()).unwrap_or("-"),
                format_time(state.position),
                format_time(state.duration),
                state.volume,
                state.rate
            );
        }
        _ => println!("commands: p n b s <sec> v <vol> r <rate> m <mode> j <index> i q"),
    }
    Ok(true)
}

fn play(args: PlayArgs) -> CliResult<()> {
    let player = new_player(MpvOptions::default())?;
    let events = player.stream().events();

    if let Some(volume) = args.volume {
        player.set_volume(volume)?;
    }
    player.set_playlist_mode(args.mode)?;
    let medias = args.uris.into_iter().map(Media::new).collect();
    player.open(Playlist::new(medias), !args.paused)?;
    if args.shuffle {
        player.set_shuffle(true)?;
    }

    let (lines_tx, lines_rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("commands: p n b s <sec> v <vol> r <rate> m <mode> j <index> i q");
    loop {
        select! {
            recv(lines_rx) -> line => match line {
                Ok(line) => match handle_line(&player, &line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("error: {}", e),
                },
                Err(_) => break,
            },
            recv(events) -> event => match event {
                Ok(PlayerEvent::Playlist(playlist)) => {
                    if let Some(media) = playlist.current() {
                        println!("now playing [{}/{}] {}", playlist.index + 1, playlist.len(), media.uri);
                    }
                }
                Ok(PlayerEvent::Completed(true)) => println!("completed"),
                Ok(PlayerEvent::Error(message)) => eprintln!("error: {}", message),
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
    player.dispose();
    Ok(())
}

fn devices() -> CliResult<()> {
    let player = new_player(MpvOptions {
        vo: Some("null".to_string()),
        ..Default::default()
    })?;
    let updates = player.stream().audio_devices();
    // 设备列表在观察属性后异步到达
    let _ = updates.recv_timeout(Duration::from_secs(2));
    let state = player.state();
    for device in &state.audio_devices {
        let marker = if *device == state.audio_device { "*" } else { " " };
        println!("{} {:<40} {}", marker, device.name, device.description);
    }
    player.dispose();
    Ok(())
}

fn screenshot(args: ScreenshotArgs) -> CliResult<()> {
    let player = new_player(MpvOptions::default())?;
    let widths = player.stream().width();
    player.open(Media::new(args.uri), false)?;
    widths
        .recv_timeout(Duration::from_secs(10))
        .map_err(|_| "no video frame within 10s")?;
    if !args.at.is_zero() {
        let positions = player.stream().position();
        player.seek(args.at)?;
        let _ = positions.recv_timeout(Duration::from_secs(5));
    }

    let shot = player
        .screenshot(args.format, true)?
        .ok_or("no video output available")?;
    std::fs::write(&args.output, &shot.bytes)?;
    println!(
        "saved {}x{} screenshot to {}",
        shot.width,
        shot.height,
        args.output.display()
    );
    player.dispose();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("kit-cli");

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, usage(program));
            std::process::exit(1);
        }
    };

    let result = match command {
        CliCommand::Play(args) => play(args),
        CliCommand::Devices => devices(),
        CliCommand::Screenshot(args) => screenshot(args),
    };
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("kit-cli")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_play() {
        let command = parse_args(&args("play /a.mp3 https://x.org/b.m3u8 --mode loop-playlist --volume 40 --shuffle")).unwrap();
        assert_eq!(
            command,
            CliCommand::Play(PlayArgs {
                uris: vec!["/a.mp3".into(), "https://x.org/b.m3u8".into()],
                paused: false,
                mode: PlaylistMode::LoopPlaylist,
                shuffle: true,
                volume: Some(40.0),
            })
        );
        assert!(parse_args(&args("play")).is_err());
        assert!(parse_args(&args("play /a.mp3 --mode sometimes")).is_err());
        assert!(parse_args(&args("play /a.mp3 --volume")).is_err());
    }

    #[test]
    fn test_parse_screenshot() {
        let command = parse_args(&args("screenshot /v.mkv /tmp/out.png --at 12.5 --format png")).unwrap();
        assert_eq!(
            command,
            CliCommand::Screenshot(ScreenshotArgs {
                uri: "/v.mkv".into(),
                output: PathBuf::from("/tmp/out.png"),
                at: Duration::from_millis(12_500),
                format: ScreenshotFormat::Png,
            })
        );
        assert!(parse_args(&args("screenshot /v.mkv")).is_err());
        assert!(parse_args(&args("screenshot /v.mkv out --format raw")).is_err());
        assert!(parse_args(&args("screenshot /v.mkv out --at -1")).is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(3725)), "01:02:05");
    }
}
