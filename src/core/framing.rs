//! Line-ending framing for outgoing commands
//!
//! A command is transmitted as its raw UTF-8 bytes followed by the terminator
//! of the selected line ending. Nothing inside the text is escaped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Line ending appended to every framed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// No terminator
    None,
    /// Line feed (`\n`)
    Lf,
    /// Carriage return (`\r`)
    Cr,
    /// Carriage return + line feed (`\r\n`)
    #[default]
    CrLf,
}

impl LineEnding {
    /// Terminator bytes for this mode
    pub fn terminator(self) -> &'static [u8] {
        match self {
            Self::None => b"",
            Self::Lf => b"\n",
            Self::Cr => b"\r",
            Self::CrLf => b"\r\n",
        }
    }

    /// All modes, in display order
    pub fn all() -> &'static [LineEnding] {
        &[Self::None, Self::Lf, Self::Cr, Self::CrLf]
    }

    /// Escaped label used in pickers (`\r\n`, ...)
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "No line end",
            Self::Lf => "\\n",
            Self::Cr => "\\r",
            Self::CrLf => "\\r\\n",
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lf => write!(f, "lf"),
            Self::Cr => write!(f, "cr"),
            Self::CrLf => write!(f, "crlf"),
        }
    }
}

/// Unknown line ending name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown line ending '{0}' (expected none, lf, cr or crlf)")]
pub struct FramingError(pub String);

impl FromStr for LineEnding {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "lf" | "\\n" => Ok(Self::Lf),
            "cr" | "\\r" => Ok(Self::Cr),
            "crlf" | "\\r\\n" => Ok(Self::CrLf),
            _ => Err(FramingError(s.to_string())),
        }
    }
}

/// Build the exact bytes transmitted for `text` under `ending`
pub fn frame(text: &str, ending: LineEnding) -> Vec<u8> {
    let terminator = ending.terminator();
    let mut out = Vec::with_capacity(text.len() + terminator.len());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(terminator);
    out
}

/// True when framing `text` would put nothing on the wire
pub fn is_empty_frame(text: &str, ending: LineEnding) -> bool {
    text.is_empty() && ending == LineEnding::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_terminator() {
        for &mode in LineEnding::all() {
            let framed = frame("AT+GMR", mode);
            assert!(framed.starts_with(b"AT+GMR"));
            assert!(framed.ends_with(mode.terminator()));
            assert_eq!(framed.len(), 6 + mode.terminator().len());
        }
    }

    #[test]
    fn test_frame_crlf() {
        assert_eq!(frame("AT", LineEnding::CrLf), b"AT\r\n");
    }

    #[test]
    fn test_embedded_newline_is_verbatim() {
        assert_eq!(frame("a\nb", LineEnding::Cr), b"a\nb\r");
    }

    #[test]
    fn test_utf8_payload() {
        assert_eq!(frame("µ", LineEnding::Lf), vec![0xC2, 0xB5, b'\n']);
    }

    #[test]
    fn test_empty_frame() {
        assert!(frame("", LineEnding::None).is_empty());
        assert!(is_empty_frame("", LineEnding::None));
        assert!(!is_empty_frame("", LineEnding::Lf));
        assert_eq!(frame("", LineEnding::Lf), b"\n");
    }

    #[test]
    fn test_parse() {
        assert_eq!("CRLF".parse::<LineEnding>().unwrap(), LineEnding::CrLf);
        assert_eq!("\\r".parse::<LineEnding>().unwrap(), LineEnding::Cr);
        assert!("tab".parse::<LineEnding>().is_err());
        for &mode in LineEnding::all() {
            assert_eq!(mode.to_string().parse::<LineEnding>().unwrap(), mode);
        }
    }
}
