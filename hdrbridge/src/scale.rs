/// Output dimensions after applying the maximum-dimension cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    pub target_width: u32,
    pub target_height: u32,
    pub scaled: bool,
}

impl ScalePlan {
    /// Fit `width`x`height` under `max_dimension`.
    ///
    /// The longer side (width on ties) becomes exactly `max_dimension`; the
    /// other is rounded to nearest and bumped up to the next even value.
    /// Callers pass an even `max_dimension` (see `RunConfig::validate`).
    pub fn plan(width: u32, height: u32, max_dimension: u32) -> Self {
        if width <= max_dimension && height <= max_dimension {
            return Self {
                target_width: width,
                target_height: height,
                scaled: false,
            };
        }
        if width >= height {
            Self {
                target_width: max_dimension,
                target_height: proportional_even(height, width, max_dimension),
                scaled: true,
            }
        } else {
            Self {
                target_width: proportional_even(width, height, max_dimension),
                target_height: max_dimension,
                scaled: true,
            }
        }
    }

    /// Size for an image paired with the planned one (e.g. a lower-resolution
    /// gain map), scaled by the same ratio.
    pub fn companion(&self, original: (u32, u32), companion: (u32, u32)) -> (u32, u32) {
        if !self.scaled {
            return companion;
        }
        let (ow, oh) = original;
        let (cw, ch) = companion;
        (
            proportional_even(cw, ow, self.target_width),
            proportional_even(ch, oh, self.target_height),
        )
    }
}

/// `side * target / reference`, rounded half-up, at least 1, then made even
/// by incrementing.
fn proportional_even(side: u32, reference: u32, target: u32) -> u32 {
    let reference = u64::from(reference.max(1));
    let scaled = (u64::from(side) * u64::from(target) + reference / 2) / reference;
    let scaled = u32::try_from(scaled).unwrap_or(u32::MAX - 1).max(1);
    if scaled % 2 == 1 { scaled + 1 } else { scaled }
}
