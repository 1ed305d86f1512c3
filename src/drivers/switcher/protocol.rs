//! Kramer Protocol 3000 framing
//!
//! Requests are `#COMMAND params\r`; replies are `~NN@COMMAND params\r\n`
//! where `NN` is the machine number. Failures carry `ERR nnn`.

use crate::preset::VideoMuteMode;

/// Default video layer for `#ROUTE`
pub const LAYER_VIDEO: u16 = 1;

/// A request line sent to the switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Handshake,
    Route { layer: u16, dest: u16, source: u16 },
    VideoMute { output: u16, mode: VideoMuteMode },
}

impl Request {
    /// Wire form including the `\r` terminator
    pub fn line(&self) -> String {
        match self {
            Request::Handshake => "#\r".to_string(),
            other => format!("#{} {}\r", other.expected_reply(), other.params()),
        }
    }

    /// Parameters as the switcher echoes them back
    pub fn params(&self) -> String {
        match *self {
            Request::Handshake => String::new(),
            Request::Route { layer, dest, source } => format!("{},{},{}", layer, dest, source),
            Request::VideoMute { output, mode } => format!("{},{}", output, mode.flag()),
        }
    }

    /// Command name the reply must echo (empty for the handshake)
    pub fn expected_reply(&self) -> &'static str {
        match self {
            Request::Handshake => "",
            Request::Route { .. } => "ROUTE",
            Request::VideoMute { .. } => "VMUTE",
        }
    }
}

/// A parsed reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub machine: String,
    pub command: String,
    pub params: String,
}

impl Response {
    /// Parse a reply with the line terminator already stripped
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim_end_matches(['\r', '\n']).strip_prefix('~')?;
        let (machine, rest) = body.split_once('@')?;
        if machine.is_empty() || !machine.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));
        Some(Self {
            machine: machine.to_string(),
            command: command.trim().to_uppercase(),
            params: params.trim().to_string(),
        })
    }

    pub fn is_error(&self) -> bool {
        self.command == "ERR"
            || self
                .params
                .split([' ', ','])
                .any(|token| token.eq_ignore_ascii_case("ERR"))
    }

    /// Whether this line is the reply to `request`
    ///
    /// Front-panel changes make the switcher emit unsolicited notifications
    /// such as `~01@ROUTE 1,1,4`; those answer nothing and are skipped.
    pub fn answers(&self, request: &Request) -> bool {
        if self.command == "ERR" {
            return true;
        }
        if self.command != request.expected_reply() {
            return false;
        }
        match request {
            Request::Handshake => true,
            other => {
                self.is_error() || strip_spaces(&self.params) == strip_spaces(&other.params())
            }
        }
    }

    /// Whether this reply confirms `request`
    pub fn confirms(&self, request: &Request) -> bool {
        if self.is_error() {
            return false;
        }
        match request {
            Request::Handshake => self.command.is_empty() && self.params.eq_ignore_ascii_case("OK"),
            other => self.command == other.expected_reply(),
        }
    }
}

fn strip_spaces(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
