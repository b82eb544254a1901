//! Source images for the displayed picture.
//!
//! A displayed picture is backed by up to three decoded resolutions of the
//! same logical image ([`Tier::Low`], [`Tier::Medium`], [`Tier::High`]). The
//! [`TierTable`] maps a viewing scale to the ideal tier, and [`SourceSet`]
//! degrades to the best tier actually present.
//!
//! ```text
//!  scale ──► TierTable::ideal ──► Tier ──► SourceSet::select ──► ResolutionTier
//!                                             (fallback to the next
//!                                              lower present tier)
//! ```

mod identity;
mod loader;
mod tier;

pub use identity::ImageIdentity;
pub use loader::{identity_for_file, load_tier};
pub use tier::{ResolutionTier, SourceSet, Tier, TierBand, TierTable};
