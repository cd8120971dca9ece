//! Premultiplied-RGBA8 blending primitives for the CPU painter.

pub type PremulRgba8 = [u8; 4];

/// Source-over blend of `src` onto `dst`, with an extra opacity applied to
/// the source. Both sides are premultiplied.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

pub fn premul(r: u8, g: u8, b: u8, a: u8) -> PremulRgba8 {
    [
        mul_div255(u16::from(r), u16::from(a)),
        mul_div255(u16::from(g), u16::from(a)),
        mul_div255(u16::from(b), u16::from(a)),
        a,
    ]
}

fn mul_div255(a: u16, b: u16) -> u8 {
    let v = u32::from(a) * u32::from(b) + 128;
    (((v + (v >> 8)) >> 8) & 0xFF) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_source_replaces_destination() {
        let out = over([0, 0, 0, 255], [255, 0, 0, 255], 1.0);
        assert_eq!(out, [255, 0, 0, 255]);
    }

    #[test]
    fn transparent_source_is_a_noop() {
        let dst = [10, 20, 30, 255];
        assert_eq!(over(dst, [0, 0, 0, 0], 1.0), dst);
        assert_eq!(over(dst, [255, 255, 255, 255], 0.0), dst);
    }

    #[test]
    fn half_opacity_mixes() {
        let out = over([0, 0, 0, 255], [255, 255, 255, 255], 0.5);
        // 128/255 of the source over black.
        assert!(out[0] >= 126 && out[0] <= 130, "got {}", out[0]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn premul_scales_color_by_alpha() {
        assert_eq!(premul(255, 255, 255, 255), [255, 255, 255, 255]);
        let half = premul(255, 0, 0, 128);
        assert_eq!(half[3], 128);
        assert!(half[0] >= 127 && half[0] <= 129);
        assert_eq!(half[1], 0);
    }
}
