//! KFX thumbnail extraction
//!
//! A KFX file is a `CONT` container: a fixed little-endian header, an
//! Ion-encoded info block locating the entity index and the document
//! symbol table, and a series of `ENTY` entities addressed by symbol
//! ids. Book metadata lives in the `$490` entity; the cover image is
//! found by following `kindle_title_metadata.cover_image` to a `$164`
//! external-resource entity and from there to the `$417` raw-media
//! entity holding the actual image bytes.
//!
//! DRM, compression and unknown versions are rejected up front.

pub mod ion;

use image::imageops::FilterType;

use crate::{jfif, thumb_file_name, Thumb, ThumbError};
use ion::{Parser, SymbolTable, Value, SYSTEM_MAX_ID};

// entity types
const SYM_EXTERNAL_RESOURCE: u64 = 164;
const SYM_RAW_MEDIA: u64 = 417;
const SYM_BOOK_METADATA: u64 = 490;

// container info fields
const F_COMPRESSION: u64 = 410;
const F_DRM_SCHEME: u64 = 411;
const F_INDEX_TAB_OFFSET: u64 = 413;
const F_INDEX_TAB_LENGTH: u64 = 414;
const F_DOC_SYM_OFFSET: u64 = 415;
const F_DOC_SYM_LENGTH: u64 = 416;

// metadata fields
const F_LOCATION: u64 = 165;
const F_METADATA: u64 = 258;
const F_VALUE: u64 = 307;
const F_CATEGORIZED_METADATA: u64 = 491;
const F_KEY: u64 = 492;
const F_CATEGORY: u64 = 495;

const CONTAINER_HEADER_LEN: usize = 18;
const ENTITY_HEADER_LEN: usize = 10;
const INDEX_ENTRY_LEN: usize = 24;
const MAX_CONTAINER_VERSION: u16 = 2;
const MAX_ENTITY_VERSION: u16 = 1;

/// Extracts the thumbnail artifact from KFX container bytes.
pub fn extract(data: &[u8], width: u32, height: u32) -> Result<Option<Thumb>, ThumbError> {
    let header = ContainerHeader::parse(data)?;
    let info = container_info(region(data, header.info_offset, header.info_size)?)?;

    let symbols = SymbolTable::parse(region(data, info.doc_sym_offset, info.doc_sym_length)?)?;
    let entities = read_entities(
        data,
        &header,
        region(data, info.index_tab_offset, info.index_tab_length)?,
        &symbols,
    )?;

    let meta = book_metadata(&entities, &symbols)?;
    if meta.cde_type != "EBOK" || meta.asin.is_empty() || meta.cover.is_empty() {
        // only purchased books with a cover get thumbnails
        return Ok(None);
    }
    let Some(file_name) = thumb_file_name(&meta.asin, &meta.cde_type) else {
        return Ok(None);
    };

    let resource = find_entity(&entities, &symbols, SYM_EXTERNAL_RESOURCE, &meta.cover)
        .ok_or_else(|| ThumbError::malformed("cover image not in external resources"))?;
    let location = parse_entity_value(resource.payload)?
        .field(F_LOCATION)
        .and_then(|v| v.text(&symbols))
        .ok_or_else(|| ThumbError::malformed("cover resource has no location"))?;

    let media = find_entity(&entities, &symbols, SYM_RAW_MEDIA, &location)
        .ok_or_else(|| ThumbError::malformed("cover image raw media not found"))?;

    let img = image::load_from_memory(media.payload)?;
    let img = img.resize_to_fill(width, height, FilterType::Lanczos3);
    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 75);
    img.write_with_encoder(encoder)?;
    let (jpeg, _) = jfif::ensure_density(jpeg, jfif::DpiUnit::PixelsPerInch, 300, 300);

    Ok(Some(Thumb { file_name, jpeg }))
}

// ---------------------------------------------------------------------------
// Container plumbing
// ---------------------------------------------------------------------------

struct ContainerHeader {
    size: usize,
    info_offset: usize,
    info_size: usize,
}

impl ContainerHeader {
    fn parse(data: &[u8]) -> Result<Self, ThumbError> {
        if data.len() < CONTAINER_HEADER_LEN {
            return Err(ThumbError::malformed("container header truncated"));
        }
        if &data[..4] != b"CONT" {
            return Err(ThumbError::malformed("wrong signature for KFX container"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MAX_CONTAINER_VERSION {
            return Err(ThumbError::Unsupported(format!(
                "KFX container version {version}"
            )));
        }
        let size = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if size < CONTAINER_HEADER_LEN {
            return Err(ThumbError::malformed("invalid KFX container header size"));
        }
        Ok(Self {
            size,
            info_offset: u32::from_le_bytes([data[10], data[11], data[12], data[13]]) as usize,
            info_size: u32::from_le_bytes([data[14], data[15], data[16], data[17]]) as usize,
        })
    }
}

struct ContainerInfo {
    index_tab_offset: usize,
    index_tab_length: usize,
    doc_sym_offset: usize,
    doc_sym_length: usize,
}

fn container_info(data: &[u8]) -> Result<ContainerInfo, ThumbError> {
    let mut parser = Parser::new(data)?;
    let (_, value) = parser
        .next()?
        .ok_or_else(|| ThumbError::malformed("empty container info"))?;

    ensure_plain(&value, "container")?;

    let field = |id: u64, name: &str| -> Result<usize, ThumbError> {
        value
            .field(id)
            .and_then(Value::as_int)
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .ok_or_else(|| ThumbError::malformed(format!("container info missing {name}")))
    };
    let info = ContainerInfo {
        index_tab_offset: field(F_INDEX_TAB_OFFSET, "index table offset")?,
        index_tab_length: field(F_INDEX_TAB_LENGTH, "index table length")?,
        doc_sym_offset: field(F_DOC_SYM_OFFSET, "document symbols offset")?,
        doc_sym_length: field(F_DOC_SYM_LENGTH, "document symbols length")?,
    };
    if info.doc_sym_length == 0 {
        return Err(ThumbError::Unsupported(
            "no document symbols found".to_string(),
        ));
    }
    Ok(info)
}

/// Compression and DRM must be absent for both containers and entities.
fn ensure_plain(value: &Value, what: &str) -> Result<(), ThumbError> {
    if value.field(F_COMPRESSION).and_then(Value::as_int).unwrap_or(0) != 0 {
        return Err(ThumbError::Unsupported(format!("{what} compression")));
    }
    if value.field(F_DRM_SCHEME).and_then(Value::as_int).unwrap_or(0) != 0 {
        return Err(ThumbError::Unsupported(format!("{what} DRM")));
    }
    Ok(())
}

fn region(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ThumbError> {
    data.get(offset..offset + len)
        .ok_or_else(|| ThumbError::malformed(format!("region {offset}+{len} out of bounds")))
}

struct Entity<'a> {
    id: u64,
    entity_type: u64,
    payload: &'a [u8],
}

fn read_entities<'a>(
    data: &'a [u8],
    header: &ContainerHeader,
    index: &[u8],
    symbols: &SymbolTable,
) -> Result<Vec<Entity<'a>>, ThumbError> {
    if index.len() % INDEX_ENTRY_LEN != 0 {
        return Err(ThumbError::malformed("entity index length not a multiple of entry size"));
    }

    let mut entities = Vec::new();
    for entry in index.chunks_exact(INDEX_ENTRY_LEN) {
        let id = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64;
        let entity_type = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]) as u64;
        let offset = u64::from_le_bytes(entry[8..16].try_into().unwrap()) as usize;
        let size = u64::from_le_bytes(entry[16..24].try_into().unwrap()) as usize;

        if !symbols.contains_id(id) {
            return Err(ThumbError::malformed(format!("entity id {id} not in symbol table")));
        }
        if !symbols.contains_id(entity_type) {
            return Err(ThumbError::malformed(format!(
                "entity type {entity_type} not in symbol table"
            )));
        }

        let start = offset + header.size;
        let body = region(data, start, size)?;
        if body.len() < ENTITY_HEADER_LEN {
            return Err(ThumbError::malformed("entity header truncated"));
        }
        if &body[..4] != b"ENTY" {
            return Err(ThumbError::malformed("wrong signature for KFX entity"));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version > MAX_ENTITY_VERSION {
            return Err(ThumbError::Unsupported(format!("KFX entity version {version}")));
        }
        let header_size = u32::from_le_bytes([body[6], body[7], body[8], body[9]]) as usize;
        if header_size < ENTITY_HEADER_LEN || header_size > body.len() {
            return Err(ThumbError::malformed("invalid KFX entity header size"));
        }

        let mut info_parser = Parser::new(&body[ENTITY_HEADER_LEN..header_size])?;
        if let Some((_, info)) = info_parser.next()? {
            ensure_plain(&info, "entity")?;
        }

        entities.push(Entity {
            id,
            entity_type,
            payload: &body[header_size..],
        });
    }
    Ok(entities)
}

/// First Ion value of an entity payload.
fn parse_entity_value(payload: &[u8]) -> Result<Value, ThumbError> {
    let mut parser = Parser::new(payload)?;
    parser
        .next()?
        .map(|(_, value)| value)
        .ok_or_else(|| ThumbError::malformed("empty entity payload"))
}

/// Entity of the given type whose id corresponds to `name` in the
/// document symbol table.
fn find_entity<'a, 'e>(
    entities: &'e [Entity<'a>],
    symbols: &SymbolTable,
    entity_type: u64,
    name: &str,
) -> Option<&'e Entity<'a>> {
    let id = symbols.id_by_name(name)?.checked_sub(SYSTEM_MAX_ID)?;
    entities
        .iter()
        .find(|e| e.entity_type == entity_type && e.id == id)
}

#[derive(Debug, Default)]
struct BookMetadata {
    asin: String,
    cde_type: String,
    cover: String,
}

fn book_metadata(entities: &[Entity<'_>], symbols: &SymbolTable) -> Result<BookMetadata, ThumbError> {
    let mut candidates = entities.iter().filter(|e| e.entity_type == SYM_BOOK_METADATA);
    let meta_entity = candidates
        .next()
        .ok_or_else(|| ThumbError::Unsupported("no book metadata found".to_string()))?;
    if candidates.next().is_some() {
        return Err(ThumbError::malformed("ambiguous book metadata"));
    }

    let value = parse_entity_value(meta_entity.payload)?;
    let Some(Value::List(categories)) = value.field(F_CATEGORIZED_METADATA) else {
        return Err(ThumbError::malformed("no categorized metadata"));
    };

    let mut meta = BookMetadata::default();
    let mut found = false;
    for category in categories {
        let name = category.field(F_CATEGORY).and_then(|v| v.text(symbols));
        if name.as_deref() != Some("kindle_title_metadata") {
            continue;
        }
        found = true;
        if let Some(Value::List(properties)) = category.field(F_METADATA) {
            for property in properties {
                let key = property.field(F_KEY).and_then(|v| v.text(symbols));
                let value = property.field(F_VALUE).and_then(|v| v.text(symbols));
                let (Some(key), Some(value)) = (key, value) else { continue };
                match key.as_str() {
                    "ASIN" => meta.asin = value,
                    "cde_content_type" => meta.cde_type = value,
                    "cover_image" => meta.cover = value,
                    _ => {}
                }
            }
        }
        break;
    }
    if !found {
        return Err(ThumbError::Unsupported("no kindle book metadata found".to_string()));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::ion::emit;
    use super::*;

    const IMPORT_MAX: u64 = 834;

    struct Fixture {
        asin: &'static str,
        cde_type: &'static str,
        with_cover: bool,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                asin: "B000KFXT01",
                cde_type: "EBOK",
                with_cover: true,
            }
        }
    }

    fn cover_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(w, h);
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 75);
        img.write_with_encoder(encoder).unwrap();
        buf
    }

    fn entity(id: u64, entity_type: u64, info_plain: bool, payload: &[u8]) -> (u64, u64, Vec<u8>) {
        let info = emit::document(&[emit::strukt(&[
            (F_COMPRESSION, emit::int(0)),
            (F_DRM_SCHEME, emit::int(if info_plain { 0 } else { 2 })),
        ])]);
        let mut body = Vec::new();
        body.extend_from_slice(b"ENTY");
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&((ENTITY_HEADER_LEN + info.len()) as u32).to_le_bytes());
        body.extend_from_slice(&info);
        body.extend_from_slice(payload);
        (id, entity_type, body)
    }

    /// Assembles a complete single-storage KFX container around the
    /// given entities.
    fn container(entities: &[(u64, u64, Vec<u8>)]) -> Vec<u8> {
        let doc_syms = emit::document(&[emit::annotated(
            &[3],
            emit::strukt(&[
                (
                    7, // imports
                    emit::list(&[emit::strukt(&[
                        (5, emit::string("YJ_symbols")), // name
                        (6, emit::int(10)),              // version
                        (9, emit::int(IMPORT_MAX)),      // max_id
                    ])]),
                ),
                (
                    8, // symbols
                    emit::list(&[emit::string("resource/cover"), emit::string("resource/media")]),
                ),
            ]),
        )]);

        let doc_sym_offset = CONTAINER_HEADER_LEN;
        let index_offset = doc_sym_offset + doc_syms.len();
        let index_len = entities.len() * INDEX_ENTRY_LEN;
        let mut entity_region = Vec::new();
        let mut index = Vec::new();
        for (id, entity_type, body) in entities {
            let abs = index_offset + index_len + entity_region.len();
            index.extend_from_slice(&(*id as u32).to_le_bytes());
            index.extend_from_slice(&(*entity_type as u32).to_le_bytes());
            index.extend_from_slice(&((abs - CONTAINER_HEADER_LEN) as u64).to_le_bytes());
            index.extend_from_slice(&(body.len() as u64).to_le_bytes());
            entity_region.extend_from_slice(body);
        }

        let info_offset = index_offset + index_len + entity_region.len();
        let info = emit::document(&[emit::strukt(&[
            (409, emit::string("CR!TEST")),
            (F_COMPRESSION, emit::int(0)),
            (F_DRM_SCHEME, emit::int(0)),
            (412, emit::int(4096)),
            (F_INDEX_TAB_OFFSET, emit::int(index_offset as u64)),
            (F_INDEX_TAB_LENGTH, emit::int(index_len as u64)),
            (F_DOC_SYM_OFFSET, emit::int(doc_sym_offset as u64)),
            (F_DOC_SYM_LENGTH, emit::int(doc_syms.len() as u64)),
        ])]);

        let mut data = Vec::new();
        data.extend_from_slice(b"CONT");
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&(CONTAINER_HEADER_LEN as u32).to_le_bytes());
        data.extend_from_slice(&(info_offset as u32).to_le_bytes());
        data.extend_from_slice(&(info.len() as u32).to_le_bytes());
        data.extend_from_slice(&doc_syms);
        data.extend_from_slice(&index);
        data.extend_from_slice(&entity_region);
        data.extend_from_slice(&info);
        data
    }

    fn book(fixture: Fixture) -> Vec<u8> {
        let mut properties = vec![
            emit::strukt(&[(F_KEY, emit::string("ASIN")), (F_VALUE, emit::string(fixture.asin))]),
            emit::strukt(&[
                (F_KEY, emit::string("cde_content_type")),
                (F_VALUE, emit::string(fixture.cde_type)),
            ]),
        ];
        if fixture.with_cover {
            properties.push(emit::strukt(&[
                (F_KEY, emit::string("cover_image")),
                (F_VALUE, emit::string("resource/cover")),
            ]));
        }
        let metadata = emit::document(&[emit::strukt(&[(
            F_CATEGORIZED_METADATA,
            emit::list(&[emit::strukt(&[
                (F_CATEGORY, emit::string("kindle_title_metadata")),
                (F_METADATA, emit::list(&properties)),
            ])]),
        )])]);

        // "resource/cover" is local symbol 844 -> entity id 835,
        // "resource/media" is 845 -> 836
        let resource = emit::document(&[emit::strukt(&[(
            F_LOCATION,
            emit::string("resource/media"),
        )])]);

        container(&[
            entity(500, SYM_BOOK_METADATA, true, &metadata),
            entity(835, SYM_EXTERNAL_RESOURCE, true, &resource),
            entity(836, SYM_RAW_MEDIA, true, &cover_jpeg(660, 940)),
        ])
    }

    #[test]
    fn rejects_wrong_signature() {
        assert!(matches!(
            extract(b"NOPE0000000000000000", 100, 100),
            Err(ThumbError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_newer_container_version() {
        let mut data = book(Fixture::default());
        data[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Unsupported(_))));
    }

    #[test]
    fn purchased_book_produces_thumbnail() {
        let data = book(Fixture::default());
        let thumb = extract(&data, 330, 470).unwrap().unwrap();
        assert_eq!(thumb.file_name, "thumbnail_B000KFXT01_EBOK_portrait.jpg");
        let img = image::load_from_memory(&thumb.jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (330, 470));
        // density patched to 300 DPI
        assert_eq!(&thumb.jpeg[14..16], &300u16.to_be_bytes());
    }

    #[test]
    fn personal_document_yields_no_thumbnail() {
        let data = book(Fixture {
            cde_type: "PDOC",
            ..Fixture::default()
        });
        assert_eq!(extract(&data, 330, 470).unwrap(), None);
    }

    #[test]
    fn book_without_cover_yields_no_thumbnail() {
        let data = book(Fixture {
            with_cover: false,
            ..Fixture::default()
        });
        assert_eq!(extract(&data, 330, 470).unwrap(), None);
    }

    #[test]
    fn drm_entity_is_rejected() {
        let metadata = emit::document(&[emit::strukt(&[])]);
        let data = container(&[entity(500, SYM_BOOK_METADATA, false, &metadata)]);
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Unsupported(_))));
    }

    #[test]
    fn missing_metadata_entity_is_reported() {
        let data = container(&[]);
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Unsupported(_))));
    }

    #[test]
    fn entity_id_outside_symbol_table_is_malformed() {
        let metadata = emit::document(&[emit::strukt(&[])]);
        let data = container(&[entity(5000, SYM_BOOK_METADATA, true, &metadata)]);
        assert!(matches!(extract(&data, 100, 100), Err(ThumbError::Malformed(_))));
    }
}
