//! Deterministic per-source colors.
//!
//! Every source gets a primary color, used for the path suffix of its header,
//! and a foreground/background pair for its name badge. Unless configured
//! explicitly, the primary color is derived from a SHA-256 digest of the
//! source path and the foreground is picked for contrast against it.

use std::collections::HashMap;

use crossterm::style::Color;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::{Source, SourceId};

/// Lightness at or above which a background is paired with black text.
const LIGHTNESS_THRESHOLD: f64 = 50.0;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(from = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Rgb::new(r, g, b)
    }
}

impl From<Rgb> for Color {
    fn from(rgb: Rgb) -> Self {
        Color::Rgb {
            r: rgb.r,
            g: rgb.g,
            b: rgb.b,
        }
    }
}

/// Colors used to render the header of one source.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ColorStyle {
    /// Color of the path suffix. Same as `bg`.
    pub primary: Rgb,
    pub fg: Rgb,
    pub bg: Rgb,
}

/// Derives a color from the first three bytes of the SHA-256 digest of `path`.
pub fn path_color(path: &str) -> Rgb {
    let digest = Sha256::digest(path.as_bytes());

    Rgb::new(digest[0], digest[1], digest[2])
}

/// Perceived lightness (CIE L*, `0.0..=100.0`) of an sRGB color.
///
/// See https://stackoverflow.com/a/56678483.
pub fn perceived_lightness(color: Rgb) -> f64 {
    fn linearize(channel: u8) -> f64 {
        let c = f64::from(channel) / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }

    let luminance =
        0.2126 * linearize(color.r) + 0.7152 * linearize(color.g) + 0.0722 * linearize(color.b);

    if luminance <= 0.008856 {
        luminance * 903.3
    } else {
        luminance.cbrt() * 116.0 - 16.0
    }
}

/// Black on light backgrounds, white on dark ones.
pub fn contrasting_foreground(bg: Rgb) -> Rgb {
    if perceived_lightness(bg) >= LIGHTNESS_THRESHOLD {
        Rgb::BLACK
    } else {
        Rgb::WHITE
    }
}

/// Computes the style of `source` from scratch. Pure; see [`Palette`] for the
/// memoized version.
pub fn derive_style(source: &Source) -> ColorStyle {
    let primary = source
        .background()
        .unwrap_or_else(|| path_color(source.path()));
    let fg = source
        .foreground()
        .unwrap_or_else(|| contrasting_foreground(primary));

    ColorStyle {
        primary,
        fg,
        bg: primary,
    }
}

/// Per-renderer cache of source styles.
///
/// Entries are keyed by [`SourceId`] and never invalidated.
#[derive(Debug, Default)]
pub struct Palette {
    styles: HashMap<SourceId, ColorStyle>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn style(&mut self, source: &Source) -> ColorStyle {
        *self
            .styles
            .entry(source.id())
            .or_insert_with(|| derive_style(source))
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}
