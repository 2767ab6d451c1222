use crate::*;
use anyhow::Result;

#[test]
fn new_file_geometry_512() -> Result<()> {
    let h = FileHeader::new(512)?;
    assert_eq!(h.dir, 512);
    assert_eq!(h.dir_size, 512);
    assert_eq!(h.dir_bits, 6);
    assert_eq!(h.dir_entries(), 64);
    assert_eq!(h.bucket_size, 512);
    assert_eq!(h.bucket_elems, 17);
    assert_eq!(h.next_block, 2048);
    assert_eq!(h.avail.table.capacity(), 38);
    assert_eq!(h.avail.next, 0);
    Ok(())
}

#[test]
fn new_file_geometry_4096() -> Result<()> {
    let h = FileHeader::new(4096)?;
    assert_eq!(h.dir_bits, 9);
    assert_eq!(h.bucket_elems, 167);
    Ok(())
}

#[test]
fn block_size_must_be_power_of_two() {
    assert!(matches!(FileHeader::new(1000), Err(LayoutError::BlockSize(1000))));
    assert!(matches!(FileHeader::new(256), Err(LayoutError::BlockSize(256))));
}

#[test]
fn header_survives_encoding() -> Result<()> {
    let mut h = FileHeader::new(1024)?;
    h.next_block = 9 * 1024;
    h.avail.next = 8 * 1024;
    h.avail.table.insert(AvailElem::new(5000, 300), false);
    h.avail.table.insert(AvailElem::new(6000, 100), false);

    let bytes = h.encode();
    assert_eq!(bytes.len(), 1024);
    assert_eq!(FileHeader::peek_block_size(&bytes[..HEADER_PREFIX_BYTES])?, 1024);
    assert_eq!(FileHeader::decode(&bytes)?, h);
    Ok(())
}

#[test]
fn magic_classification() {
    assert!(FileHeader::classify_magic(MAGIC).is_ok());
    assert!(matches!(
        FileHeader::classify_magic(MAGIC_32),
        Err(LayoutError::BadFileOffset)
    ));
    assert!(matches!(
        FileHeader::classify_magic(MAGIC_ORIGINAL),
        Err(LayoutError::BadFileOffset)
    ));
    for m in [MAGIC, MAGIC_32, MAGIC_ORIGINAL] {
        assert!(matches!(
            FileHeader::classify_magic(m.swap_bytes()),
            Err(LayoutError::ByteSwapped)
        ));
    }
    assert!(matches!(
        FileHeader::classify_magic(0xdead_beef),
        Err(LayoutError::BadMagic(0xdead_beef))
    ));
}

#[test]
fn inconsistent_header_is_rejected() -> Result<()> {
    let mut h = FileHeader::new(512)?;
    h.bucket_elems = 3;
    assert!(matches!(FileHeader::decode(&h.encode()), Err(LayoutError::Corrupt(_))));

    let mut h = FileHeader::new(512)?;
    h.dir_bits = 7;
    assert!(matches!(FileHeader::decode(&h.encode()), Err(LayoutError::Corrupt(_))));
    Ok(())
}

#[test]
fn truncated_header_is_rejected() -> Result<()> {
    let bytes = FileHeader::new(512)?.encode();
    assert!(FileHeader::decode(&bytes[..100]).is_err());
    assert!(FileHeader::decode(&bytes[..10]).is_err());
    Ok(())
}
