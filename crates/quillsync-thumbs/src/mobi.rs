//! MOBI/AZW3 thumbnail extraction
//!
//! A MOBI book is a PalmDB container: a record offset table up front,
//! record 0 holding the MOBI header plus EXTH metadata records, and
//! image records further in. The product id (ASIN), the content
//! distribution marker (EBOK/PDOC) and the cover/thumbnail record
//! indices all come from EXTH. Combo KF8 files carry a second header
//! record whose metadata takes precedence.
//!
//! Every read is bounds-checked; malformed offsets produce errors, not
//! panics.

use image::imageops::FilterType;

use crate::{jfif, thumb_file_name, Thumb, ThumbError};

// PalmDB header offsets
const TYPE_CREATOR: usize = 60;
const NUM_PDB_RECORDS: usize = 76;
const FIRST_PDB_RECORD: usize = 78;

// record 0 offsets
const CRYPTO_TYPE: usize = 12;
const MOBI_HEADER_BASE: usize = 16;
const MOBI_HEADER_LENGTH: usize = 20;
const FIRST_RESC_RECORD: usize = 108;

// EXTH records of interest
const EXTH_ASIN: i32 = 113;
const EXTH_KF8_OFFSET: i32 = 121;
const EXTH_COVER_OFFSET: i32 = 201;
const EXTH_THUMB_OFFSET: i32 = 202;
const EXTH_CDE_TYPE: i32 = 501;
const EXTH_CDE_CONTENT_KEY: i32 = 504;

/// Extracts the thumbnail artifact from MOBI container bytes.
///
/// Returns `Ok(None)` for books that legitimately yield no thumbnail
/// (personal documents, no cover, no product id) and an error for
/// containers that cannot be parsed.
pub fn extract(data: &[u8], width: u32, height: u32) -> Result<Option<Thumb>, ThumbError> {
    let meta = parse_metadata(data)?;

    if meta.cde_type != b"EBOK" {
        // personal documents never get thumbnails
        return Ok(None);
    }
    let asin = if meta.cde_key.is_empty() { &meta.asin } else { &meta.cde_key };
    let asin = String::from_utf8_lossy(asin).into_owned();
    let cde_type = String::from_utf8_lossy(&meta.cde_type).into_owned();
    let Some(file_name) = thumb_file_name(&asin, &cde_type) else {
        return Ok(None);
    };
    let Some(cover_index) = meta.cover_index else {
        return Ok(None);
    };

    // An embedded thumbnail already larger than the target size is
    // good as is, just converted to JPEG. Otherwise the cover is
    // scaled down.
    let mut jpeg = None;
    if let Some(thumb_index) = meta.thumb_index {
        let img = image::load_from_memory(section(data, thumb_index)?)?;
        if img.width() > width && img.height() > height {
            jpeg = Some(encode_jpeg(&img)?);
        }
    }
    let jpeg = match jpeg {
        Some(jpeg) => jpeg,
        None => {
            let img = image::load_from_memory(section(data, cover_index)?)?;
            let img = img.resize_to_fill(width, height, FilterType::Lanczos3);
            encode_jpeg(&img)?
        }
    };

    let (jpeg, _) = jfif::ensure_density(jpeg, jfif::DpiUnit::PixelsPerInch, 300, 300);
    Ok(Some(Thumb { file_name, jpeg }))
}

#[derive(Debug, Default)]
struct Metadata {
    asin: Vec<u8>,
    cde_type: Vec<u8>,
    cde_key: Vec<u8>,
    cover_index: Option<usize>,
    thumb_index: Option<usize>,
}

fn parse_metadata(data: &[u8]) -> Result<Metadata, ThumbError> {
    if data.len() < FIRST_PDB_RECORD || &data[TYPE_CREATOR..TYPE_CREATOR + 8] != b"BOOKMOBI" {
        return Err(ThumbError::malformed("not a PalmDB book container"));
    }

    let rec0 = section(data, 0)?;
    if get_u16(rec0, CRYPTO_TYPE)? != 0 {
        return Err(ThumbError::Unsupported("encrypted book".to_string()));
    }

    let mut meta = Metadata {
        asin: read_exth_first(rec0, EXTH_ASIN)?.unwrap_or_default(),
        cde_type: read_exth_first(rec0, EXTH_CDE_TYPE)?.unwrap_or_default(),
        cde_key: read_exth_first(rec0, EXTH_CDE_CONTENT_KEY)?.unwrap_or_default(),
        ..Metadata::default()
    };

    // combo files: metadata from the KF8 boilerplate record wins
    if let Some(kf8_off) = read_exth_first(rec0, EXTH_KF8_OFFSET)? {
        let kf8 = get_i32(&kf8_off, 0)?;
        if kf8 >= 0 {
            let kfrec0 = section(data, kf8 as usize)?;
            if let Some(v) = read_exth_first(kfrec0, EXTH_ASIN)? {
                meta.asin = v;
            }
            if let Some(v) = read_exth_first(kfrec0, EXTH_CDE_TYPE)? {
                meta.cde_type = v;
            }
            if let Some(v) = read_exth_first(kfrec0, EXTH_CDE_CONTENT_KEY)? {
                meta.cde_key = v;
            }
        }
    }

    let first_image = get_i32(rec0, FIRST_RESC_RECORD)?;
    meta.cover_index = image_index(rec0, EXTH_COVER_OFFSET, first_image)?;
    meta.thumb_index = image_index(rec0, EXTH_THUMB_OFFSET, first_image)?;
    Ok(meta)
}

/// Image record index from an EXTH offset record, relative to the
/// first image record. Negative values mean "not present".
fn image_index(rec0: &[u8], exth_id: i32, first_image: i32) -> Result<Option<usize>, ThumbError> {
    let Some(value) = read_exth_first(rec0, exth_id)? else {
        return Ok(None);
    };
    let index = get_i32(&value, 0)?;
    if index < 0 || first_image < 0 {
        return Ok(None);
    }
    Ok(Some((index + first_image) as usize))
}

// ---------------------------------------------------------------------------
// PalmDB plumbing
// ---------------------------------------------------------------------------

fn get(data: &[u8], ofs: usize, len: usize) -> Result<&[u8], ThumbError> {
    data.get(ofs..ofs + len)
        .ok_or_else(|| ThumbError::malformed(format!("read of {len} bytes at {ofs} out of bounds")))
}

fn get_u16(data: &[u8], ofs: usize) -> Result<u16, ThumbError> {
    let b = get(data, ofs, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn get_i32(data: &[u8], ofs: usize) -> Result<i32, ThumbError> {
    let b = get(data, ofs, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// One PalmDB record, located through the offset table.
fn section(data: &[u8], secno: usize) -> Result<&[u8], ThumbError> {
    let nsec = get_u16(data, NUM_PDB_RECORDS)? as usize;
    if secno >= nsec {
        return Err(ThumbError::malformed(format!(
            "record {secno} out of range [0, {nsec})"
        )));
    }
    let start = get_i32(data, FIRST_PDB_RECORD + secno * 8)? as usize;
    let end = if secno == nsec - 1 {
        data.len()
    } else {
        get_i32(data, FIRST_PDB_RECORD + (secno + 1) * 8)? as usize
    };
    if start > end || end > data.len() {
        return Err(ThumbError::malformed(format!(
            "record {secno} bounds {start}..{end} invalid"
        )));
    }
    Ok(&data[start..end])
}

/// First EXTH record payload with the given id, if any.
fn read_exth_first(rec0: &[u8], wanted: i32) -> Result<Option<Vec<u8>>, ThumbError> {
    let ebase = MOBI_HEADER_BASE + get_i32(rec0, MOBI_HEADER_LENGTH)?.max(0) as usize;
    let count = get_i32(rec0, ebase + 8)?;

    let mut pos = ebase + 12;
    for _ in 0..count {
        let id = get_i32(rec0, pos)?;
        let len = get_i32(rec0, pos + 4)?;
        if len < 8 {
            return Err(ThumbError::malformed(format!("EXTH record {id} length {len}")));
        }
        if id == wanted {
            return Ok(Some(get(rec0, pos + 8, len as usize - 8)?.to_vec()));
        }
        pos += len as usize;
    }
    Ok(None)
}

fn encode_jpeg(img: &image::DynamicImage) -> Result<Vec<u8>, ThumbError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 75);
    img.write_with_encoder(encoder)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal two-record BOOKMOBI container: record 0 with
    /// the given EXTH records, record 1 with the given payload.
    fn build_mobi(exth: &[(i32, Vec<u8>)], record1: &[u8]) -> Vec<u8> {
        let mobi_header_len = 104; // covers FIRST_RESC_RECORD
        let ebase = MOBI_HEADER_BASE + mobi_header_len;

        let mut rec0 = vec![0u8; ebase + 12];
        // crypto type 0 is already in place
        rec0[MOBI_HEADER_LENGTH..MOBI_HEADER_LENGTH + 4]
            .copy_from_slice(&(mobi_header_len as i32).to_be_bytes());
        // first image record is record 1
        rec0[FIRST_RESC_RECORD..FIRST_RESC_RECORD + 4].copy_from_slice(&1i32.to_be_bytes());
        rec0[ebase..ebase + 4].copy_from_slice(b"EXTH");
        rec0[ebase + 8..ebase + 12].copy_from_slice(&(exth.len() as i32).to_be_bytes());
        for (id, payload) in exth {
            rec0.extend_from_slice(&id.to_be_bytes());
            rec0.extend_from_slice(&((payload.len() + 8) as i32).to_be_bytes());
            rec0.extend_from_slice(payload);
        }

        let header_len = FIRST_PDB_RECORD + 2 * 8;
        let mut data = vec![0u8; header_len];
        data[TYPE_CREATOR..TYPE_CREATOR + 8].copy_from_slice(b"BOOKMOBI");
        data[NUM_PDB_RECORDS..NUM_PDB_RECORDS + 2].copy_from_slice(&2u16.to_be_bytes());
        data[FIRST_PDB_RECORD..FIRST_PDB_RECORD + 4]
            .copy_from_slice(&(header_len as i32).to_be_bytes());
        let rec1_start = header_len + rec0.len();
        data[FIRST_PDB_RECORD + 8..FIRST_PDB_RECORD + 12]
            .copy_from_slice(&(rec1_start as i32).to_be_bytes());
        data.extend_from_slice(&rec0);
        data.extend_from_slice(record1);
        data
    }

    fn cover_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(w, h);
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 75);
        img.write_with_encoder(encoder).unwrap();
        buf
    }

    #[test]
    fn rejects_non_book_data() {
        assert!(matches!(
            extract(b"not a book at all, sorry", 100, 100),
            Err(ThumbError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_encrypted_books() {
        let mut data = build_mobi(&[], b"payload");
        // crypto type field of record 0
        let rec0_start = FIRST_PDB_RECORD + 2 * 8;
        data[rec0_start + CRYPTO_TYPE..rec0_start + CRYPTO_TYPE + 2]
            .copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Unsupported(_))));
    }

    #[test]
    fn personal_documents_yield_no_thumbnail() {
        let data = build_mobi(
            &[
                (EXTH_ASIN, b"B000TEST01".to_vec()),
                (EXTH_CDE_TYPE, b"PDOC".to_vec()),
                (EXTH_COVER_OFFSET, 0i32.to_be_bytes().to_vec()),
            ],
            &cover_jpeg(600, 800),
        );
        assert_eq!(extract(&data, 330, 470).unwrap(), None);
    }

    #[test]
    fn missing_asin_yields_no_thumbnail() {
        let data = build_mobi(
            &[
                (EXTH_CDE_TYPE, b"EBOK".to_vec()),
                (EXTH_COVER_OFFSET, 0i32.to_be_bytes().to_vec()),
            ],
            &cover_jpeg(600, 800),
        );
        assert_eq!(extract(&data, 330, 470).unwrap(), None);
    }

    #[test]
    fn purchased_book_produces_named_jfif_thumbnail() {
        let data = build_mobi(
            &[
                (EXTH_ASIN, b"B000TEST01".to_vec()),
                (EXTH_CDE_TYPE, b"EBOK".to_vec()),
                (EXTH_COVER_OFFSET, 0i32.to_be_bytes().to_vec()),
            ],
            &cover_jpeg(660, 940),
        );
        let thumb = extract(&data, 330, 470).unwrap().unwrap();
        assert_eq!(thumb.file_name, "thumbnail_B000TEST01_EBOK_portrait.jpg");
        // JPEG with a JFIF APP0 segment carrying 300 DPI
        assert_eq!(&thumb.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&thumb.jpeg[2..4], &[0xFF, 0xE0]);
        assert_eq!(&thumb.jpeg[14..16], &300u16.to_be_bytes());

        let img = image::load_from_memory(&thumb.jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (330, 470));
    }

    #[test]
    fn cde_content_key_wins_over_asin() {
        let data = build_mobi(
            &[
                (EXTH_ASIN, b"B000TEST01".to_vec()),
                (EXTH_CDE_CONTENT_KEY, b"B000KEY999".to_vec()),
                (EXTH_CDE_TYPE, b"EBOK".to_vec()),
                (EXTH_COVER_OFFSET, 0i32.to_be_bytes().to_vec()),
            ],
            &cover_jpeg(600, 800),
        );
        let thumb = extract(&data, 330, 470).unwrap().unwrap();
        assert_eq!(thumb.file_name, "thumbnail_B000KEY999_EBOK_portrait.jpg");
    }

    #[test]
    fn book_without_cover_yields_no_thumbnail() {
        let data = build_mobi(
            &[
                (EXTH_ASIN, b"B000TEST01".to_vec()),
                (EXTH_CDE_TYPE, b"EBOK".to_vec()),
            ],
            b"not an image",
        );
        assert_eq!(extract(&data, 330, 470).unwrap(), None);
    }

    #[test]
    fn truncated_record_table_is_malformed() {
        let mut data = build_mobi(&[], b"x");
        data.truncate(FIRST_PDB_RECORD + 3);
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Malformed(_))));
    }
}
