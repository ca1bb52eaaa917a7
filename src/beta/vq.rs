//! VQ (visual-quality) threshold table: the fraction of a
//! segment's bytes past which further download yields negligible quality
//! gain. Injected as a trait so a real per-representation model can replace
//! the constant default without touching the controller.

/// Supplies `vq_threshold(index)` — the ratio past which BETA treats extra
/// bytes for that segment index as not worth waiting for.
pub trait VqThresholdTable: Send + Sync {
    fn threshold(&self, index: usize) -> f64;
}

/// The default: every index uses the same constant threshold. Stands in for
/// a trained per-segment VQ model.
pub struct ConstantVqThreshold(f64);

impl ConstantVqThreshold {
    pub fn new(threshold: f64) -> Self {
        Self(threshold)
    }
}

impl Default for ConstantVqThreshold {
    fn default() -> Self {
        Self(0.9)
    }
}

impl VqThresholdTable for ConstantVqThreshold {
    fn threshold(&self, _index: usize) -> f64 {
        self.0
    }
}
