use thiserror::Error;

use crate::config::MAX_VOLUME;

/// A text command addressed to the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(String),
    Pause,
    Resume,
    Stop,
    Skip,
    Queue(usize),
    /// `None` toggles.
    Loop(Option<bool>),
    /// `None` reports the current volume; otherwise a gain in 0.0..=2.0.
    Volume(Option<f32>),
    Shuffle,
    Clear,
    Leave,
    NowPlaying,
    Join,
    Help,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Unknown command `{0}`. Try `{1}help`.")]
    Unknown(String, String),
    #[error("Usage: `{0}`")]
    Usage(String),
}

/// Parses a chat message.
///
/// Returns `None` when the message is not addressed to the bot at all.
pub fn parse(prefix: &str, content: &str) -> Option<Result<Command, ParseError>> {
    let body = content.trim().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let name = words.next()?.to_lowercase();
    let rest: Vec<&str> = words.collect();

    Some(parse_command(prefix, &name, &rest))
}

fn parse_command(prefix: &str, name: &str, args: &[&str]) -> Result<Command, ParseError> {
    let usage = |text: &str| ParseError::Usage(format!("{}{}", prefix, text));

    let command = match name {
        "play" | "p" => {
            if args.is_empty() {
                return Err(usage("play <song name or URL>"));
            }
            Command::Play(args.join(" "))
        }
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "stop" => Command::Stop,
        "skip" | "s" => Command::Skip,
        "queue" | "q" => match args {
            [] => Command::Queue(1),
            [page] => match page.parse::<usize>() {
                Ok(page) if page > 0 => Command::Queue(page),
                _ => return Err(usage("queue [page]")),
            },
            _ => return Err(usage("queue [page]")),
        },
        "loop" => match args {
            [] => Command::Loop(None),
            [flag] => match flag.to_lowercase().as_str() {
                "on" | "true" | "enable" => Command::Loop(Some(true)),
                "off" | "false" | "disable" => Command::Loop(Some(false)),
                _ => return Err(usage("loop [on|off]")),
            },
            _ => return Err(usage("loop [on|off]")),
        },
        "volume" | "vol" => match args {
            [] => Command::Volume(None),
            [percent] => {
                let max = (MAX_VOLUME * 100.0) as u32;
                match percent.trim_end_matches('%').parse::<u32>() {
                    Ok(percent) if percent <= max => Command::Volume(Some(percent as f32 / 100.0)),
                    _ => return Err(usage(&format!("volume [0-{}]", max))),
                }
            }
            _ => return Err(usage("volume [0-200]")),
        },
        "shuffle" => Command::Shuffle,
        "clear" => Command::Clear,
        "leave" | "disconnect" => Command::Leave,
        "nowplaying" | "np" => Command::NowPlaying,
        "join" => Command::Join,
        "help" => Command::Help,
        "ping" => Command::Ping,
        other => return Err(ParseError::Unknown(other.to_string(), prefix.to_string())),
    };

    Ok(command)
}
