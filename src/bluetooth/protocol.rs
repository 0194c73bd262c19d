// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command protocol definitions and encoding.
//!
//! Commands are short CRLF-terminated ASCII lines:
//!
//! ```text
//! rt<kind>,<signal:2 hex>,<minutes:2 digits>,<device id>\r\n
//! ```
//!
//! The peripheral answers on the acknowledgement characteristic with
//! [`ACK_COUNTDOWN_START`] once a timed command has been accepted.

use std::fmt;
use std::str::FromStr;

use crate::error::{ControllerError, Result};

/// Command line prefix.
const COMMAND_PREFIX: &str = "rt";

/// Line terminator.
const LINE_END: &str = "\r\n";

/// Acknowledgement payload that (re)starts the countdown.
pub const ACK_COUNTDOWN_START: &[u8] = b"rt2,1\r\n";

/// Timer values the peripheral accepts, in minutes.
pub const TIMER_MINUTES: [u8; 4] = [0, 20, 40, 60];

/// Accepted device ids.
pub const DEVICE_IDS: std::ops::RangeInclusive<u8> = 1..=5;

/// Operating mode selected by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Mode1,
    Mode2,
    Mode3,
}

impl CommandKind {
    /// Numeric code used on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::Mode1 => 1,
            Self::Mode2 => 2,
            Self::Mode3 => 3,
        }
    }

    /// Parse from the numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Mode1),
            2 => Some(Self::Mode2),
            3 => Some(Self::Mode3),
            _ => None,
        }
    }
}

/// A single outbound command.
///
/// Fields are carried unchecked; [`Command::encode`] validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub signal_strength: u8,
    pub timer_minutes: u8,
    pub device_id: u8,
}

impl Command {
    pub fn new(kind: CommandKind, signal_strength: u8, timer_minutes: u8, device_id: u8) -> Self {
        Self {
            kind,
            signal_strength,
            timer_minutes,
            device_id,
        }
    }

    /// Same command with the timer set to `00`, which stops the remote action.
    pub fn stop(&self) -> Self {
        Self {
            timer_minutes: 0,
            ..*self
        }
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<()> {
        if !TIMER_MINUTES.contains(&self.timer_minutes) {
            return Err(ControllerError::InvalidCommand(format!(
                "timer minutes must be one of {:?}, got {}",
                TIMER_MINUTES, self.timer_minutes
            )));
        }
        if !DEVICE_IDS.contains(&self.device_id) {
            return Err(ControllerError::InvalidCommand(format!(
                "device id must be 1..=5, got {}",
                self.device_id
            )));
        }
        Ok(())
    }

    /// Encode to the wire string, including the trailing CRLF.
    pub fn encode(&self) -> Result<String> {
        self.validate()?;
        Ok(format!(
            "{}{},{:02X},{:02},{}{}",
            COMMAND_PREFIX,
            self.kind.code(),
            self.signal_strength,
            self.timer_minutes,
            self.device_id,
            LINE_END
        ))
    }

    /// Parse a wire string produced by [`Command::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        let invalid = |reason: &str| ControllerError::InvalidCommand(format!("{}: {:?}", reason, text));

        let body = text
            .strip_suffix(LINE_END)
            .ok_or_else(|| invalid("missing CRLF terminator"))?;
        let body = body
            .strip_prefix(COMMAND_PREFIX)
            .ok_or_else(|| invalid("missing rt prefix"))?;

        let fields: Vec<&str> = body.split(',').collect();
        let [kind, signal, minutes, device] = fields.as_slice() else {
            return Err(invalid("expected four fields"));
        };
        if signal.len() != 2 || minutes.len() != 2 || device.len() != 1 {
            return Err(invalid("field width mismatch"));
        }

        let kind = kind
            .parse::<u8>()
            .ok()
            .and_then(CommandKind::from_code)
            .ok_or_else(|| invalid("unknown kind"))?;
        let signal_strength =
            u8::from_str_radix(signal, 16).map_err(|_| invalid("bad signal strength"))?;
        let timer_minutes = minutes.parse::<u8>().map_err(|_| invalid("bad timer minutes"))?;
        let device_id = device.parse::<u8>().map_err(|_| invalid("bad device id"))?;

        let command = Self::new(kind, signal_strength, timer_minutes, device_id);
        command.validate()?;
        Ok(command)
    }
}

impl FromStr for Command {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// Known acknowledgement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Timed command accepted; the local countdown should start.
    CountdownStart,
}

/// An inbound notification after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Recognized(AckKind),
    Unrecognized(Vec<u8>),
}

impl Notification {
    /// Classify a raw notification payload. Unknown payloads are not errors.
    pub fn classify(payload: &[u8]) -> Self {
        if payload == ACK_COUNTDOWN_START {
            Self::Recognized(AckKind::CountdownStart)
        } else {
            Self::Unrecognized(payload.to_vec())
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recognized(kind) => write!(f, "{:?}", kind),
            Self::Unrecognized(raw) => write!(f, "{:?}", String::from_utf8_lossy(raw)),
        }
    }
}
