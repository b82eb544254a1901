//! Resolution tiers and the scale → tier lookup table.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::Size;

// =============================================================================
// Tier
// =============================================================================

/// Discriminant of one decoded resolution of the displayed image.
///
/// Ordered from lowest to highest resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    /// All tiers, lowest resolution first.
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::Medium, Tier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }

    fn index(self) -> usize {
        match self {
            Tier::Low => 0,
            Tier::Medium => 1,
            Tier::High => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Tier::Low),
            "medium" => Ok(Tier::Medium),
            "high" => Ok(Tier::High),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

// =============================================================================
// Tier Table
// =============================================================================

/// One band of the tier table: scales up to and including `max_scale` use `tier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBand {
    pub max_scale: f64,
    pub tier: Tier,
}

/// Ordered `(upper-bound scale → tier)` table consulted by a single lookup.
///
/// The last band is unbounded (`max_scale = f64::INFINITY`).
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    bands: Vec<TierBand>,
}

impl TierTable {
    /// Build a table from ascending thresholds.
    ///
    /// `thresholds[i]` is the inclusive upper bound of `Tier::ALL[i]`; the
    /// tier after the last threshold covers every larger scale. At most two
    /// thresholds are accepted since there are three tiers.
    pub fn from_thresholds(thresholds: &[f64]) -> Result<Self, String> {
        if thresholds.len() >= Tier::ALL.len() {
            return Err(format!(
                "at most {} tier thresholds are allowed, got {}",
                Tier::ALL.len() - 1,
                thresholds.len()
            ));
        }

        let mut bands: Vec<TierBand> = thresholds
            .iter()
            .zip(Tier::ALL)
            .map(|(&max_scale, tier)| TierBand { max_scale, tier })
            .collect();
        bands.push(TierBand {
            max_scale: f64::INFINITY,
            tier: Tier::ALL[thresholds.len()],
        });

        let table = Self { bands };
        table.validate()?;
        Ok(table)
    }

    pub fn bands(&self) -> &[TierBand] {
        &self.bands
    }

    /// Check that thresholds are positive and strictly increasing.
    pub fn validate(&self) -> Result<(), String> {
        let mut previous = 0.0;
        for band in &self.bands {
            if band.max_scale.is_nan() || band.max_scale <= previous {
                return Err(format!(
                    "tier thresholds must be positive and strictly increasing, got {} after {}",
                    band.max_scale, previous
                ));
            }
            previous = band.max_scale;
        }
        Ok(())
    }

    /// The ideal tier for `scale`, ignoring availability.
    pub fn ideal(&self, scale: f64) -> Tier {
        self.bands
            .iter()
            .find(|band| scale <= band.max_scale)
            .or(self.bands.last())
            .map(|band| band.tier)
            .unwrap_or(Tier::Low)
    }
}

impl Default for TierTable {
    /// `≤1.0× → low`, `≤2.0× → medium`, `>2.0× → high`.
    fn default() -> Self {
        Self {
            bands: vec![
                TierBand {
                    max_scale: 1.0,
                    tier: Tier::Low,
                },
                TierBand {
                    max_scale: 2.0,
                    tier: Tier::Medium,
                },
                TierBand {
                    max_scale: f64::INFINITY,
                    tier: Tier::High,
                },
            ],
        }
    }
}

impl FromStr for TierTable {
    type Err = String;

    /// Parse comma-separated thresholds, e.g. `"1.0,2.0"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let thresholds = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<f64>()
                    .map_err(|e| format!("invalid tier threshold '{}': {}", part, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_thresholds(&thresholds)
    }
}

// =============================================================================
// Resolution Tier
// =============================================================================

/// A decoded source image for one tier.
///
/// The pixel buffer is shared; cloning a `ResolutionTier` is cheap.
#[derive(Debug, Clone)]
pub struct ResolutionTier {
    tier: Tier,
    image: Arc<RgbaImage>,
}

impl ResolutionTier {
    pub fn new(tier: Tier, image: impl Into<Arc<RgbaImage>>) -> Self {
        Self {
            tier,
            image: image.into(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel dimensions as a [`Size`].
    pub fn size(&self) -> Size {
        Size::new(self.width() as f64, self.height() as f64)
    }
}

// =============================================================================
// Source Set
// =============================================================================

/// The tiers available for the displayed image. Any tier may be absent.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    tiers: [Option<ResolutionTier>; 3],
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tier, builder style.
    pub fn with(mut self, source: ResolutionTier) -> Self {
        self.insert(source);
        self
    }

    /// Add or replace a tier.
    pub fn insert(&mut self, source: ResolutionTier) {
        let slot = source.tier().index();
        self.tiers[slot] = Some(source);
    }

    pub fn get(&self, tier: Tier) -> Option<&ResolutionTier> {
        self.tiers[tier.index()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(Option::is_none)
    }

    /// Present tiers, lowest resolution first.
    pub fn available(&self) -> impl Iterator<Item = &ResolutionTier> {
        self.tiers.iter().flatten()
    }

    /// Pixel size of the lowest present tier, used as the logical display size.
    pub fn logical_size(&self) -> Option<Size> {
        self.available().next().map(ResolutionTier::size)
    }

    /// Pick the tier to synthesize from at `scale`.
    ///
    /// Returns the ideal tier when present, else the nearest lower present
    /// tier, else the nearest higher present tier. `None` only when the set is
    /// empty.
    pub fn select(&self, scale: f64, table: &TierTable) -> Option<&ResolutionTier> {
        let ideal = table.ideal(scale).index();

        self.tiers[..=ideal]
            .iter()
            .rev()
            .flatten()
            .next()
            .or_else(|| self.tiers[ideal + 1..].iter().flatten().next())
    }
}
