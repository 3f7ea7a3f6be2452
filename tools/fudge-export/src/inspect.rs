//! Human-readable bundle summary (`inspect` command)

use std::fmt::Write;

use anyhow::{Result, bail};
use fudge_common::{
    ATLAS_WIDTHS, BundleHeader, SoundDescriptor, TextureHeader, entry_data, entry_type, read_slot,
};

/// Describe the header and every used index slot of a bundle
pub fn describe(bundle: &[u8]) -> Result<String> {
    let Some(header) = BundleHeader::from_bytes(bundle) else {
        bail!("Not a bundle file (bad magic or truncated header)");
    };
    if bundle.len() < header.total_length() {
        bail!(
            "Bundle is truncated: {} bytes, header describes {}",
            bundle.len(),
            header.total_length()
        );
    }

    let mut out = String::new();
    writeln!(out, "Bundle version {}, {} bytes", header.version, header.total_length())?;
    writeln!(out, "  index: {:>8} bytes", header.index_length)?;
    writeln!(out, "  vram:  {:>8} bytes ({} pages)", header.vram_length, header.page_count())?;
    writeln!(out, "  spu:   {:>8} bytes", header.spu_length)?;
    writeln!(out, "  data:  {:>8} bytes", header.data_length)?;

    let atlases: Vec<String> = ATLAS_WIDTHS
        .iter()
        .zip(header.atlas_counts)
        .map(|(width, count)| format!("{count}x{width}"))
        .collect();
    writeln!(out, "  atlases: {}", atlases.join(", "))?;
    writeln!(out, "  hash table: {} buckets + {} chained", header.buckets, header.chained)?;
    writeln!(out)?;

    for index in 0..header.slot_count() {
        let Some(slot) = read_slot(bundle, &header, index) else {
            bail!("Index slot {index} is out of bounds");
        };
        if slot.hash == 0 && slot.length == 0 {
            continue;
        }

        write!(
            out,
            "  [{index:4}] {:#010x} {:<12} offset {:#08x} length {:6}",
            slot.hash,
            entry_type::name(slot.type_id),
            slot.offset,
            slot.length
        )?;

        let payload = entry_data(bundle, &slot).unwrap_or_default();
        match slot.type_id {
            entry_type::TEXTURE | entry_type::INTERLACED_TEXTURE => {
                if let Some(texture) = TextureHeader::from_bytes(payload) {
                    write!(
                        out,
                        "  {} frame(s), {} mip(s), {}bpp",
                        texture.frame_count, texture.mip_levels, texture.bpp
                    )?;
                }
            }
            entry_type::SOUND => {
                if let Some(sound) = SoundDescriptor::from_bytes(payload) {
                    let channels = if sound.is_stereo() { "stereo" } else { "mono" };
                    write!(out, "  {channels}, rate {:#06x}", sound.sample_rate)?;
                }
            }
            _ => {}
        }
        if slot.chain != 0 {
            write!(out, "  -> {}", slot.chain)?;
        }
        writeln!(out)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::PackOptions;
    use crate::bundle::BundleBuilder;

    #[test]
    fn test_describe_lists_entries() {
        let mut builder = BundleBuilder::new();
        builder.add_entry("level1", entry_type::FILE, &[1, 2, 3]).unwrap();
        builder.add_entry("blob", 0x8001, &[0; 8]).unwrap();
        let bundle = builder.build(&PackOptions::default()).unwrap();

        let text = describe(&bundle.bytes).unwrap();
        assert!(text.contains("2 buckets + 1 chained"));
        assert!(text.contains("-> 2"));
        assert!(text.contains("file"));
        assert!(text.contains("custom"));
        assert!(text.contains("length      3"));
    }

    #[test]
    fn test_describe_rejects_garbage() {
        assert!(describe(b"not a bundle").is_err());

        let bundle = BundleBuilder::new().build(&PackOptions::default()).unwrap();
        assert!(describe(&bundle.bytes[..100]).is_err());
    }
}
