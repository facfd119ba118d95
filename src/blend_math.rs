//! Scalar reference formulas for the per-layer mask and microblend normal
//! wiring. The layer builder emits node chains computing exactly these
//! expressions; keeping them here makes the math checkable without a host.

/// Added to the microblend contrast so a contrast of exactly 0 never
/// collapses the mask remap range.
pub const CONTRAST_EPSILON: f32 = 1e-4;

/// Scale applied to the incoming layer mask, weighted by contrast.
pub const MASK_CONTRAST_SCALE: f32 = 2.0;

pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

pub fn effective_contrast(contrast: f32) -> f32 {
    contrast + CONTRAST_EPSILON
}

/// Factor given to the linear-burn composite in the mask mix.
pub fn burn_weight(contrast: f32) -> f32 {
    clamp01(1.0 - effective_contrast(contrast))
}

/// Linear burn of the layer mask against the microblend alpha, built from
/// add, subtract-from-one and invert because the host has no such blend mode:
/// `clamp(1 - (1 - (a + b)))`.
pub fn linear_burn(mask: f32, alpha: f32) -> f32 {
    let add = mask + alpha;
    let sub = 1.0 - add;
    clamp01(1.0 - sub)
}

pub fn smootherstep(x: f32) -> f32 {
    let x = clamp01(x);
    x * x * x * (x * (x * 6.0 - 15.0) + 10.0)
}

/// Map range with smootherstep interpolation and clamping.
pub fn map_range_smootherstep(
    value: f32,
    from_min: f32,
    from_max: f32,
    to_min: f32,
    to_max: f32,
) -> f32 {
    let span = from_max - from_min;
    if span.abs() <= f32::EPSILON {
        return to_min;
    }
    let t = smootherstep((value - from_min) / span);
    to_min + (to_max - to_min) * t
}

/// Mask before the contrast remap: the contrast-scaled layer mask mixed with
/// the linear-burn composite by the inverted contrast.
pub fn blended_mask(mask: f32, alpha: f32, contrast: f32) -> f32 {
    let c = effective_contrast(contrast);
    let scaled = clamp01(mask * c * MASK_CONTRAST_SCALE);
    let burn = linear_burn(mask, alpha);
    clamp01(lerp(scaled, burn, burn_weight(contrast)))
}

/// Final `Layer Mask` output of a layer with a microblend.
pub fn layer_mask(mask: f32, alpha: f32, contrast: f32, opacity: f32) -> f32 {
    let inverted = 1.0 - effective_contrast(contrast);
    map_range_smootherstep(blended_mask(mask, alpha, contrast), inverted, 1.0, 0.0, opacity)
}

/// `Layer Mask` output of a layer without a microblend texture.
pub fn plain_layer_mask(mask: f32, opacity: f32) -> f32 {
    clamp01(mask * opacity)
}

/// Flips the tangent channels of a microblend normal sample when the
/// strength is not positive, mirroring the bump direction.
pub fn orient_microblend_normal(rgb: [f32; 3], strength: f32) -> [f32; 3] {
    if strength > 0.0 {
        rgb
    } else {
        [1.0 - rgb[0], 1.0 - rgb[1], rgb[2]]
    }
}

/// Strength fed to the microblend normal-map decode, suppressed where the
/// layer mask is fully opaque.
pub fn microblend_normal_weight(strength: f32, contrast: f32, mask: f32) -> f32 {
    clamp01((strength * effective_contrast(contrast)).abs() - mask)
}

/// Decodes a [0,1] normal-map color into a [-1,1] tangent vector.
pub fn decode_normal(rgb: [f32; 3]) -> [f32; 3] {
    [rgb[0] * 2.0 - 1.0, rgb[1] * 2.0 - 1.0, rgb[2] * 2.0 - 1.0]
}

/// Tangent-space perturbation contributed by a microblend sample: the
/// oriented, decoded normal scaled by its weight.
pub fn microblend_perturbation(rgb: [f32; 3], strength: f32, contrast: f32, mask: f32) -> [f32; 3] {
    let n = decode_normal(orient_microblend_normal(rgb, strength));
    let w = microblend_normal_weight(strength, contrast, mask);
    [n[0] * w, n[1] * w, n[2] * w]
}

/// Roughness/metal output levels: input 0 maps to `to_min`, 1 to `to_max`.
pub fn remap_levels(value: f32, to_min: f32, to_max: f32) -> f32 {
    to_min + (to_max - to_min) * clamp01(value)
}
