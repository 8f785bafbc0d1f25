//! Pseudo-terminal configuration negotiated by `pty-req` (RFC 4254 Section 6.2).
//!
//! Only the negotiated values are stored; nothing here emulates a terminal.
//!
//! # Encoded terminal modes (RFC 4254 Section 8)
//!
//! ```text
//! byte   opcode     (0 = TTY_OP_END)
//! uint32 argument   (opcodes 1..=159)
//! ```
//!
//! Opcodes 160 and above have no defined argument; parsing stops at the first one.

use crate::ssh::wire::{read_u32, read_u8};
use cssh_platform::{CsshError, CsshResult};
use std::collections::BTreeMap;
use tracing::debug;

const TTY_OP_END: u8 = 0;
const FIRST_UNDEFINED_OPCODE: u8 = 160;

/// Window dimensions. Character dimensions win when both pairs are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSize {
    /// Columns and rows
    Characters {
        /// Columns
        width: u32,
        /// Rows
        height: u32,
    },
    /// Pixel width and height
    Pixels {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
}

impl WindowSize {
    /// Picks character dims if both are nonzero, else pixel dims if both are nonzero.
    pub fn from_request(
        width_chars: u32,
        height_rows: u32,
        width_pixels: u32,
        height_pixels: u32,
    ) -> Option<Self> {
        if width_chars != 0 && height_rows != 0 {
            Some(WindowSize::Characters {
                width: width_chars,
                height: height_rows,
            })
        } else if width_pixels != 0 && height_pixels != 0 {
            Some(WindowSize::Pixels {
                width: width_pixels,
                height: height_pixels,
            })
        } else {
            None
        }
    }
}

/// Terminal modes decoded from the `pty-req` mode string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalModes {
    /// VINTR (1)
    pub intr: Option<u32>,
    /// VQUIT (2)
    pub quit: Option<u32>,
    /// VERASE (3)
    pub erase: Option<u32>,
    /// VKILL (4)
    pub kill: Option<u32>,
    /// VEOF (5)
    pub eof: Option<u32>,
    /// VEOL (6)
    pub eol: Option<u32>,
    /// VEOL2 (7)
    pub eol2: Option<u32>,
    /// VSTART (8)
    pub start: Option<u32>,
    /// VSTOP (9)
    pub stop: Option<u32>,
    /// VSUSP (10)
    pub susp: Option<u32>,
    /// VDSUSP (11)
    pub dsusp: Option<u32>,
    /// VREPRINT (12)
    pub reprint: Option<u32>,
    /// VWERASE (13)
    pub werase: Option<u32>,
    /// VLNEXT (14)
    pub lnext: Option<u32>,
    /// VSWTCH (16)
    pub swtch: Option<u32>,

    /// INLCR (34): map NL to CR on input
    pub inlcr: bool,
    /// IGNCR (35): ignore CR on input
    pub igncr: bool,
    /// ICRNL (36): map CR to NL on input
    pub icrnl: bool,

    /// ONLCR (72): map NL to CR-NL on output
    pub onlcr: bool,
    /// OCRNL (73): map CR to NL on output
    pub ocrnl: bool,
    /// ONOCR (74): no CR output at column 0
    pub onocr: bool,
    /// ONLRET (75): NL performs CR
    pub onlret: bool,

    /// TTY_OP_ISPEED (128), baud
    pub ispeed: Option<u32>,
    /// TTY_OP_OSPEED (129), baud
    pub ospeed: Option<u32>,

    /// Opcodes with a defined argument that are not stored above
    pub ignored: Vec<u8>,
}

impl TerminalModes {
    /// Decodes an encoded terminal-mode string. An empty string is valid.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Decode`] when an opcode's argument is truncated.
    pub fn parse(blob: &[u8]) -> CsshResult<Self> {
        let mut modes = Self::default();
        let mut offset = 0;

        while offset < blob.len() {
            let opcode = read_u8(blob, &mut offset)?;
            if opcode == TTY_OP_END {
                break;
            }
            if opcode >= FIRST_UNDEFINED_OPCODE {
                debug!(opcode, "stopping at undefined terminal mode opcode");
                break;
            }
            let value = read_u32(blob, &mut offset)?;
            modes.apply(opcode, value);
        }

        if !modes.ignored.is_empty() {
            debug!(opcodes = ?modes.ignored, "terminal modes not stored");
        }
        Ok(modes)
    }

    fn apply(&mut self, opcode: u8, value: u32) {
        let flag = value != 0;
        match opcode {
            1 => self.intr = Some(value),
            2 => self.quit = Some(value),
            3 => self.erase = Some(value),
            4 => self.kill = Some(value),
            5 => self.eof = Some(value),
            6 => self.eol = Some(value),
            7 => self.eol2 = Some(value),
            8 => self.start = Some(value),
            9 => self.stop = Some(value),
            10 => self.susp = Some(value),
            11 => self.dsusp = Some(value),
            12 => self.reprint = Some(value),
            13 => self.werase = Some(value),
            14 => self.lnext = Some(value),
            16 => self.swtch = Some(value),
            34 => self.inlcr = flag,
            35 => self.igncr = flag,
            36 => self.icrnl = flag,
            72 => self.onlcr = flag,
            73 => self.ocrnl = flag,
            74 => self.onocr = flag,
            75 => self.onlret = flag,
            128 => self.ispeed = Some(value),
            129 => self.ospeed = Some(value),
            other => self.ignored.push(other),
        }
    }
}

/// Per-channel terminal settings: environment, window size and modes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PseudoTerminalConfig {
    environment: BTreeMap<String, String>,
    window: Option<WindowSize>,
    modes: TerminalModes,
}

impl PseudoTerminalConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variables set by `env` and `pty-req`.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Current window size, if negotiated.
    pub fn window(&self) -> Option<WindowSize> {
        self.window
    }

    /// Decoded terminal modes.
    pub fn modes(&self) -> &TerminalModes {
        &self.modes
    }

    /// Sets one environment variable.
    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(name.into(), value.into());
    }

    /// Updates the window size (`window-change`).
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Protocol`] if neither dimension pair is complete;
    /// the previous size is kept.
    pub fn set_window_size(
        &mut self,
        width_chars: u32,
        height_rows: u32,
        width_pixels: u32,
        height_pixels: u32,
    ) -> CsshResult<WindowSize> {
        let size = WindowSize::from_request(width_chars, height_rows, width_pixels, height_pixels)
            .ok_or_else(|| {
                CsshError::Protocol("Window size has no nonzero dimension pair".to_string())
            })?;
        self.window = Some(size);
        Ok(size)
    }

    /// Applies a `pty-req`: window size, then modes, then `TERM`.
    ///
    /// On any failure the whole configuration is reset to empty.
    pub fn apply_pty_request(
        &mut self,
        term: &str,
        width_chars: u32,
        height_rows: u32,
        width_pixels: u32,
        height_pixels: u32,
        encoded_modes: &[u8],
    ) -> CsshResult<()> {
        let applied = self
            .set_window_size(width_chars, height_rows, width_pixels, height_pixels)
            .and_then(|_| TerminalModes::parse(encoded_modes));

        match applied {
            Ok(modes) => {
                self.modes = modes;
                self.set_env("TERM", term);
                Ok(())
            }
            Err(e) => {
                *self = Self::default();
                Err(e)
            }
        }
    }
}
