// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::seqc_generator::SeqCGenerator;
use std::fmt;

type VariableInternal = String;

/// Argument or value of a SeqC statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SeqCVariant {
    /// Emitted verbatim, e.g. a constant or an expression.
    String(String),
    Integer(i64),
}

impl fmt::Display for SeqCVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqCVariant::String(s) => write!(f, "{s}"),
            SeqCVariant::Integer(i) => write!(f, "{i}"),
        }
    }
}

/// Reference to an uploaded waveform, optionally combined with its marker wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveExpr {
    pub name: String,
    pub with_markers: bool,
}

impl WaveExpr {
    pub fn new(name: &str, with_markers: bool) -> Self {
        WaveExpr {
            name: name.to_string(),
            with_markers,
        }
    }

    /// Name under which the marker samples of `name` are stored.
    pub fn marker_name(name: &str) -> String {
        format!("{name}_m")
    }
}

impl fmt::Display for WaveExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.name)?;
        if self.with_markers {
            write!(f, " + \"{}\"", Self::marker_name(&self.name))?;
        }
        Ok(())
    }
}

/// Waves on the two outputs of a sequencer core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackWaves {
    Both(WaveExpr, WaveExpr),
    First(WaveExpr),
    Second(WaveExpr),
}

impl PlaybackWaves {
    pub fn from_pair(first: Option<WaveExpr>, second: Option<WaveExpr>) -> Option<Self> {
        match (first, second) {
            (Some(a), Some(b)) => Some(PlaybackWaves::Both(a, b)),
            (Some(a), None) => Some(PlaybackWaves::First(a)),
            (None, Some(b)) => Some(PlaybackWaves::Second(b)),
            (None, None) => None,
        }
    }

    /// Arguments with output selectors, as taken by `playWave` and `setWaveDIO`.
    pub fn channel_args(&self) -> String {
        match self {
            PlaybackWaves::Both(a, b) => format!("{a}, {b}"),
            PlaybackWaves::First(a) => format!("1, {a}"),
            PlaybackWaves::Second(b) => format!("2, {b}"),
        }
    }

    /// Arguments without output selectors, as taken by `prefetch`.
    pub fn wave_args(&self) -> String {
        match self {
            PlaybackWaves::Both(a, b) => format!("{a}, {b}"),
            PlaybackWaves::First(w) | PlaybackWaves::Second(w) => w.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqCStatement {
    Comment {
        text: String,
    },
    FunctionCall {
        name: String,
        args: Vec<SeqCVariant>,
        assign_to: Option<String>,
    },
    Constant {
        name: String,
        value: SeqCVariant,
        comment: Option<String>,
    },
    VariableDeclaration {
        variable_name: VariableInternal,
        initial_value: Option<SeqCVariant>,
    },
    VariableAssignment {
        variable_name: VariableInternal,
        value: SeqCVariant,
    },
    SetWaveDio {
        codeword: u32,
        waves: PlaybackWaves,
    },
    Prefetch {
        waves: PlaybackWaves,
    },
    PlayWave {
        waves: PlaybackWaves,
    },
    PlayWaveDio,
    Repeat {
        count: SeqCVariant,
        body: SeqCGenerator,
        complexity: u64,
    },
    WhileTrue {
        body: SeqCGenerator,
        complexity: u64,
    },
    If {
        conditions: Vec<String>,
        bodies: Vec<SeqCGenerator>,
        else_body: Option<SeqCGenerator>,
        complexity: u64,
    },
}

impl SeqCStatement {
    pub fn complexity(&self) -> u64 {
        match self {
            SeqCStatement::WhileTrue { complexity, .. } => *complexity,
            SeqCStatement::If { complexity, .. } => *complexity,
            SeqCStatement::Repeat { complexity, .. } => *complexity,
            SeqCStatement::Comment { .. } | SeqCStatement::Constant { .. } => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_expressions() {
        let a = WaveExpr::new("hd_0123", false);
        let b = WaveExpr::new("hd_4567", true);
        assert_eq!(b.to_string(), r#""hd_4567" + "hd_4567_m""#);

        let both = PlaybackWaves::from_pair(Some(a.clone()), Some(b.clone())).unwrap();
        assert_eq!(
            both.channel_args(),
            r#""hd_0123", "hd_4567" + "hd_4567_m""#
        );
        let second = PlaybackWaves::from_pair(None, Some(a.clone())).unwrap();
        assert_eq!(second.channel_args(), r#"2, "hd_0123""#);
        assert_eq!(second.wave_args(), r#""hd_0123""#);
        assert!(PlaybackWaves::from_pair(None, None).is_none());
    }

    #[test]
    fn test_complexity() {
        assert_eq!(
            SeqCStatement::Comment {
                text: "c".to_string()
            }
            .complexity(),
            0
        );
        assert_eq!(SeqCStatement::PlayWaveDio.complexity(), 1);
    }
}
