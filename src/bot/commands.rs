use std::fmt;

/// Prefijo de los comandos de texto
pub const PREFIX: char = '!';

/// Comandos que entiende el front-end de consola.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    Play(String),
    Playlist,
    Pause,
    Resume,
    Skip,
    /// ID de la caché o título exacto
    Replay(String),
    Stop,
    Volume(u32),
    CacheLimit(String),
    ClearCache,
    NowPlaying,
    Cache,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    NotACommand,
    Unknown(String),
    MissingArgument { command: &'static str, usage: &'static str },
    InvalidArgument { command: &'static str, usage: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotACommand => write!(f, "Los comandos empiezan con '{}'", PREFIX),
            ParseError::Unknown(name) => write!(f, "Comando desconocido: {}{}. Usa !help", PREFIX, name),
            ParseError::MissingArgument { command, usage } => {
                write!(f, "Falta un argumento para !{}. Uso: {}", command, usage)
            }
            ParseError::InvalidArgument { command, usage } => {
                write!(f, "Argumento inválido para !{}. Uso: {}", command, usage)
            }
        }
    }
}

/// Nombre, uso y descripción de cada comando, en el orden de `!help`.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("join", "!join", "Conecta el bot al canal de voz"),
    ("leave", "!leave", "Desconecta el bot del canal de voz"),
    ("play", "!play <url>", "Reproduce una canción de YouTube (o la agrega a la cola)"),
    ("playlist", "!playlist", "Muestra la cola actual"),
    ("pause", "!pause", "Pausa la canción actual"),
    ("resume", "!resume", "Reanuda la canción pausada"),
    ("skip", "!skip", "Salta a la siguiente canción"),
    ("replay", "!replay <id|título>", "Vuelve a reproducir una canción de la caché"),
    ("stop", "!stop", "Detiene la música y vacía la cola"),
    ("volume", "!volume <0-200>", "Ajusta el volumen"),
    ("cacheLimit", "!cacheLimit <tamaño>", "Fija el límite de la caché (ej: 5GB, 500MB)"),
    ("clearCache", "!clearCache", "Borra la caché y su índice"),
    ("nowplaying", "!nowplaying", "Muestra la canción actual"),
    ("cache", "!cache", "Muestra el uso de la caché"),
    ("help", "!help", "Muestra esta ayuda"),
];

fn usage(command: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|(name, _, _)| *name == command)
        .map_or("", |(_, usage, _)| usage)
}

impl Command {
    /// Interpreta una línea como `!play https://youtu.be/...`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let body = line.strip_prefix(PREFIX).ok_or(ParseError::NotACommand)?;

        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        let required = |command: &'static str| {
            if rest.is_empty() {
                Err(ParseError::MissingArgument {
                    command,
                    usage: usage(command),
                })
            } else {
                Ok(rest.to_string())
            }
        };

        // cacheLimit y clearCache se aceptan sin distinguir mayúsculas
        let command = match name.to_lowercase().as_str() {
            "join" => Command::Join,
            "leave" => Command::Leave,
            "play" => Command::Play(required("play")?),
            "playlist" | "queue" => Command::Playlist,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "skip" => Command::Skip,
            "replay" => Command::Replay(required("replay")?),
            "stop" => Command::Stop,
            "volume" => {
                let value = required("volume")?;
                let percent = value.parse().map_err(|_| ParseError::InvalidArgument {
                    command: "volume",
                    usage: usage("volume"),
                })?;
                Command::Volume(percent)
            }
            "cachelimit" => Command::CacheLimit(required("cacheLimit")?),
            "clearcache" => Command::ClearCache,
            "nowplaying" | "np" => Command::NowPlaying,
            "cache" => Command::Cache,
            "help" => Command::Help,
            _ => return Err(ParseError::Unknown(name.to_string())),
        };

        Ok(command)
    }
}

pub fn help_text() -> String {
    let mut text = String::from("🎵 Comandos disponibles:\n");
    for (_, usage, description) in COMMANDS {
        text.push_str(&format!("  {:<22} {}\n", usage, description));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands_with_arguments() {
        assert_eq!(
            Command::parse("!play https://youtu.be/dQw4w9WgXcQ").unwrap(),
            Command::Play("https://youtu.be/dQw4w9WgXcQ".to_string())
        );
        assert_eq!(Command::parse("  !volume 80 ").unwrap(), Command::Volume(80));
        assert_eq!(Command::parse("!cacheLimit 500MB").unwrap(), Command::CacheLimit("500MB".to_string()));
        assert_eq!(
            Command::parse("!replay Never Gonna Give You Up").unwrap(),
            Command::Replay("Never Gonna Give You Up".to_string())
        );
        assert_eq!(Command::parse("!clearCache").unwrap(), Command::ClearCache);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("play it"), Err(ParseError::NotACommand));
        assert_eq!(Command::parse("!nuke 5 days"), Err(ParseError::Unknown("nuke".to_string())));
        assert!(matches!(Command::parse("!play"), Err(ParseError::MissingArgument { command: "play", .. })));
        assert!(matches!(Command::parse("!volume loud"), Err(ParseError::InvalidArgument { .. })));
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for (_, usage, _) in COMMANDS {
            assert!(help.contains(usage));
        }
    }
}
