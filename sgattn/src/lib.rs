//! Self-guided attention anomaly scorer
//!
//! Pure `ndarray` implementation of the attention head that turns a video
//! backbone's feature map into an anomaly probability. Weights are loaded
//! from safetensors and shared read-only across threads.
//!
//! # Unified Interface
//!
//! ```rust,ignore
//! use sgattn::{ArchVariant, AttentionScorer, BranchFusion, Scorer};
//!
//! let variant = ArchVariant::UcfI3d;
//! let scorer = AttentionScorer::from_file("ucf_i3d.safetensors", variant.spec(), BranchFusion::Main)?;
//!
//! // features: Array5<f32> [1, 832, 4, 14, 14] from the backbone
//! let scores = scorer.score(features.view())?;
//! println!("p(anomaly) = {:.3}", scores[0].probability);
//! ```

pub mod branch;
pub mod error;
pub mod ops;
pub mod scorer;
pub mod variant;
pub mod weights;

pub use branch::{BranchOutput, SelfGuidedAttention};
pub use error::{Result, ScoreError};
pub use scorer::{AttentionScorer, BranchFusion, ScoreOutput, Scorer};
pub use variant::{ArchSpec, ArchVariant, Backbone};
pub use weights::AttentionWeights;
