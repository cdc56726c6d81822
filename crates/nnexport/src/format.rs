//! Output formatting options: line endings and indentation

use std::str::FromStr;

use cow_utils::CowUtils;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Line ending written after every generated line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineBreak {
    #[default]
    Lf,
    Crlf,
}

impl LineBreak {
    pub const NAMES: [&'static str; 2] = ["lf", "crlf"];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Lf => "lf",
            Self::Crlf => "crlf",
        }
    }
}

impl FromStr for LineBreak {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.cow_to_ascii_lowercase().as_ref() {
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::Crlf),
            _ => Err(ExportError::unknown_option("line_break", s, Self::NAMES)),
        }
    }
}

/// One level of indentation in generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Indent {
    #[serde(rename = "tabs")]
    Tabs,
    #[serde(rename = "2_spaces")]
    TwoSpaces,
    #[default]
    #[serde(rename = "4_spaces")]
    FourSpaces,
    #[serde(rename = "8_spaces")]
    EightSpaces,
}

impl Indent {
    pub const NAMES: [&'static str; 4] = ["tabs", "2_spaces", "4_spaces", "8_spaces"];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tabs => "\t",
            Self::TwoSpaces => "  ",
            Self::FourSpaces => "    ",
            Self::EightSpaces => "        ",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Tabs => "tabs",
            Self::TwoSpaces => "2_spaces",
            Self::FourSpaces => "4_spaces",
            Self::EightSpaces => "8_spaces",
        }
    }
}

impl FromStr for Indent {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.cow_to_ascii_lowercase().as_ref() {
            "tabs" => Ok(Self::Tabs),
            "2_spaces" => Ok(Self::TwoSpaces),
            "4_spaces" => Ok(Self::FourSpaces),
            "8_spaces" => Ok(Self::EightSpaces),
            _ => Err(ExportError::unknown_option("indent", s, Self::NAMES)),
        }
    }
}

/// Formatting applied by [`crate::code_builder::CodeBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatOptions {
    pub line_break: LineBreak,
    pub indent: Indent,
}
