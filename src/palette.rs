// Theme/option resolver: user colour and sizing choices -> ThemeConfig

use crate::colours::{css_rgb, parse_hex};
use crate::error::{DashboardError, Result};
use crate::ir::{DiscreteColour, Rgb, ThemeConfig};
use crate::scale::{ColourScale, DEFAULT_SCALE};
use std::fs;
use std::path::Path;
use tracing::warn;

const EMBEDDED_COLOUR_NAMES: &str = include_str!("../data/colours.txt");

pub const DEFAULT_DISCRETE_HEX: &str = "#1F77B4";
pub const DEFAULT_HEIGHT: u32 = 500;
pub const MIN_HEIGHT: u32 = 400;
pub const MAX_HEIGHT: u32 = 800;
pub const HEIGHT_STEP: u32 = 50;

/// How the user picked the plot colour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourChoice {
    Css(String),
    Hex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserChoices {
    pub colour: Option<ColourChoice>,
    pub continuous_scale: Option<String>,
    pub figure_height: Option<u32>,
}

/// Holds the allowed CSS colour names, read once from a plain-text list
#[derive(Debug, Clone)]
pub struct ThemeResolver {
    allowed: Vec<String>,
}

impl ThemeResolver {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        ThemeResolver { allowed }
    }

    /// One colour name per line
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DashboardError::DataUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_names(text.lines()))
    }

    pub fn embedded() -> Self {
        Self::from_names(EMBEDDED_COLOUR_NAMES.lines())
    }

    pub fn allowed_colours(&self) -> &[String] {
        &self.allowed
    }

    /// Strict resolution: any choice outside the allowed sets is an error
    pub fn try_resolve(&self, choices: &UserChoices) -> Result<ThemeConfig> {
        let discrete_colour = match &choices.colour {
            None => default_colour(),
            Some(choice) => self.resolve_colour(choice)?,
        };
        let continuous_scale = match &choices.continuous_scale {
            None => DEFAULT_SCALE.to_string(),
            Some(name) => ColourScale::by_name(name)
                .map(|s| s.name.to_string())
                .ok_or_else(|| DashboardError::InvalidColourName(name.clone()))?,
        };
        Ok(ThemeConfig {
            discrete_colour,
            continuous_scale,
            figure_height: snap_height(choices.figure_height),
        })
    }

    /// Lenient resolution: invalid choices fall back to the defaults
    pub fn resolve(&self, choices: &UserChoices) -> ThemeConfig {
        let discrete_colour = match &choices.colour {
            None => default_colour(),
            Some(choice) => self.resolve_colour(choice).unwrap_or_else(|err| {
                warn!(error = %err, fallback = DEFAULT_DISCRETE_HEX, "using default plot colour");
                default_colour()
            }),
        };
        let continuous_scale = choices
            .continuous_scale
            .as_deref()
            .and_then(|name| {
                let scale = ColourScale::by_name(name);
                if scale.is_none() {
                    warn!(scale = name, fallback = DEFAULT_SCALE, "unknown colour scale");
                }
                scale
            })
            .map_or(DEFAULT_SCALE, |s| s.name)
            .to_string();
        ThemeConfig {
            discrete_colour,
            continuous_scale,
            figure_height: snap_height(choices.figure_height),
        }
    }

    fn resolve_colour(&self, choice: &ColourChoice) -> Result<DiscreteColour> {
        match choice {
            ColourChoice::Hex(hex) => parse_hex(hex)
                .map(|rgb| DiscreteColour { label: rgb.to_hex(), rgb })
                .ok_or_else(|| DashboardError::InvalidColourName(hex.clone())),
            ColourChoice::Css(name) => {
                let allowed = self.allowed.iter().any(|n| n.eq_ignore_ascii_case(name.trim()));
                match (allowed, css_rgb(name)) {
                    (true, Some(rgb)) => Ok(DiscreteColour { label: name.trim().to_lowercase(), rgb }),
                    _ => Err(DashboardError::InvalidColourName(name.clone())),
                }
            }
        }
    }
}

fn default_colour() -> DiscreteColour {
    DiscreteColour {
        label: DEFAULT_DISCRETE_HEX.to_string(),
        rgb: parse_hex(DEFAULT_DISCRETE_HEX).unwrap_or(Rgb(0x1F, 0x77, 0xB4)),
    }
}

/// Clamp to the slider range and snap to its step
fn snap_height(height: Option<u32>) -> u32 {
    let h = height.unwrap_or(DEFAULT_HEIGHT).clamp(MIN_HEIGHT, MAX_HEIGHT);
    let steps = (h - MIN_HEIGHT + HEIGHT_STEP / 2) / HEIGHT_STEP;
    MIN_HEIGHT + steps * HEIGHT_STEP
}
