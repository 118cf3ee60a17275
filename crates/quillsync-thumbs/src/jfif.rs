//! JFIF APP0 density patching
//!
//! Reading devices want thumbnail JPEGs to declare a real pixel
//! density; encoders either omit the JFIF APP0 segment entirely or
//! write a 1:1 aspect-ratio placeholder. [`ensure_density`] splices a
//! minimal APP0 after the SOI marker when it is missing and rewrites
//! the density fields in place when one is already there.

/// Density unit written into the APP0 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiUnit {
    None = 0,
    PixelsPerInch = 1,
    PixelsPerCm = 2,
}

const APP0_MARKER: [u8; 2] = [0xFF, 0xE0];
// "JFIF\0" + version 1.2
const JFIF_TAG: [u8; 7] = [0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x02];
// identifier only, for matching an existing segment
const JFIF_ID: [u8; 5] = [0x4A, 0x46, 0x49, 0x46, 0x00];

/// Makes sure the JPEG carries a JFIF APP0 segment with the given
/// density. Returns the (possibly rebuilt) JPEG and whether a new
/// segment had to be inserted.
pub fn ensure_density(
    jpeg: Vec<u8>,
    unit: DpiUnit,
    xdensity: u16,
    ydensity: u16,
) -> (Vec<u8>, bool) {
    if jpeg.len() < 4 {
        return (jpeg, false);
    }

    if jpeg[2..4] == APP0_MARKER {
        // APP0 present: rewrite unit + densities in place when it
        // really is a JFIF segment, leave anything else untouched.
        let mut jpeg = jpeg;
        if jpeg.len() >= 18 && jpeg[6..11] == JFIF_ID {
            jpeg[13] = unit as u8;
            jpeg[14..16].copy_from_slice(&xdensity.to_be_bytes());
            jpeg[16..18].copy_from_slice(&ydensity.to_be_bytes());
        }
        return (jpeg, false);
    }

    let mut patched = Vec::with_capacity(jpeg.len() + 18);
    patched.extend_from_slice(&jpeg[..2]); // SOI
    patched.extend_from_slice(&APP0_MARKER);
    patched.extend_from_slice(&0x10u16.to_be_bytes()); // segment length
    patched.extend_from_slice(&JFIF_TAG);
    patched.push(unit as u8);
    patched.extend_from_slice(&xdensity.to_be_bytes());
    patched.extend_from_slice(&ydensity.to_be_bytes());
    patched.extend_from_slice(&0u16.to_be_bytes()); // no thumbnail segment
    patched.extend_from_slice(&jpeg[2..]);
    (patched, true)
}
